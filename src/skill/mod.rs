// Copyright 2026 Tender Archive Contributors

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Portal Skill (C2, §4.1): all portal-specific HTML/locator knowledge lives behind
//! this trait. Adding a new portal family means implementing `Skill`, never adding a
//! branch inside a monolithic scraper.

pub mod nic;

use std::collections::HashMap;
use std::sync::Arc;

use crate::browser::Session;
use crate::error::ExtractError;
use crate::types::{Department, Tender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastChangeSignal {
	Changed,
	Unchanged,
	Unknown,
}

pub trait Skill: Send + Sync {
	/// Fetch and parse the organisation/department list. Order is the portal's own
	/// table order — never re-sorted (§3: a deterministic order is an invariant, not
	/// an implementation detail).
	fn list_departments(&self, session: &Session, org_list_url: &str) -> Result<Vec<Department>, ExtractError>;

	/// Land on `dept`'s tender list page. Returns `false` if the department has no
	/// reachable list (e.g. zero tenders) rather than erroring.
	fn open_department(&self, session: &Session, base_url: &str, dept: &Department) -> Result<Option<String>, ExtractError>;

	/// Extract every tender id on the department's list page(s), in portal order,
	/// deduplicated within this call.
	fn extract_tender_ids(&self, session: &Session, list_url: &str) -> Result<Vec<String>, ExtractError>;

	/// Extract one tender's full detail row. `Ok(None)` is a soft miss (row vanished
	/// mid-scrape) and must never be treated as an error.
	fn extract_tender_details(
		&self,
		session: &Session,
		base_url: &str,
		tender_id: &str,
	) -> Result<Option<Tender>, ExtractError>;

	/// Cheap, optional "did anything change" probe. `Unknown` must never block a run.
	fn detect_fast_change(&self, _session: &Session, _org_list_url: &str) -> FastChangeSignal {
		FastChangeSignal::Unknown
	}
}

/// Maps `skill_id -> Arc<dyn Skill>` (§4.1). Populated once at startup from the set
/// of portal families this deployment knows about. `Arc` (rather than `Box`) lets a
/// run hand the same skill instance to every long-lived worker thread without
/// borrowing from the registry's lifetime.
#[derive(Default, Clone)]
pub struct SkillRegistry {
	skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
	pub fn new() -> Self {
		SkillRegistry { skills: HashMap::new() }
	}

	pub fn register(&mut self, skill_id: impl Into<String>, skill: Arc<dyn Skill>) {
		self.skills.insert(skill_id.into(), skill);
	}

	pub fn get(&self, skill_id: &str) -> Option<Arc<dyn Skill>> {
		self.skills.get(skill_id).cloned()
	}

	/// The default registry: the NIC/eProcure-family skill under id `"nic"`, the
	/// dominant portal family this crate targets (§4.1), sized from its own hardcoded
	/// defaults. Production code should prefer [`SkillRegistry::with_config`].
	pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("nic", Arc::new(nic::NicSkill::new()));
        registry
	}

	/// Like [`SkillRegistry::with_defaults`], but threads the validated
	/// `js_batch_threshold`/`js_batch_size` knobs (§4.2) into the NIC skill instead of
	/// letting it fall back to its own hardcoded defaults.
	pub fn with_config(config: &crate::config::Config) -> Self {
		let mut registry = Self::new();
		registry.register("nic", Arc::new(nic::NicSkill::with_batching(config.js_batch_threshold, config.js_batch_size)));
		registry
	}
}
