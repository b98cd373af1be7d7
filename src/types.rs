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

//! Core data model (§3). These are semantic, in-memory shapes; `database::models`
//! holds the diesel-facing row types that get (de)serialized to/from Postgres.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortalCategory {
	Central,
	State,
	Psu,
	Custom,
}

/// Portal configuration, immutable within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portal {
	pub name: String,
	pub base_url: String,
	pub org_list_url: String,
	pub skill_id: String,
	pub category: PortalCategory,
	pub rate_limit_rpm: u32,
	pub cooldown_seconds: u32,
}

impl Portal {
	pub fn name_norm(&self) -> String {
		crate::normalize::norm_portal_name(&self.name)
	}
}

/// A department row as shown on the portal's organisation list. Transient to a run;
/// never persisted as a first-class entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Department {
	pub serial_no: String,
	pub name: String,
	pub tender_count_text: String,
	pub tender_count: Option<u64>,
	pub direct_url: Option<String>,
}

impl Department {
	pub fn name_norm(&self) -> String {
		crate::normalize::norm_department_name(&self.name)
	}

	/// The (name, tender_count) pair used by quick-delta comparisons (§4.5).
	pub fn snapshot_key(&self) -> (String, Option<u64>) {
		(self.name_norm(), self.tender_count)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleStatus {
	Active,
	Cancelled,
	Archived,
}

impl Default for LifecycleStatus {
	fn default() -> Self {
		LifecycleStatus::Active
	}
}

/// The persisted entity. Identity is `(portal_name_norm, tender_id_norm)` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tender {
	pub portal_name: String,
	pub tender_id_raw: String,
	pub tender_id_extracted: String,
	pub department_name: String,
	pub title_ref: String,
	pub organisation_chain: String,
	pub published_at_text: String,
	pub closing_at_text: String,
	pub opening_at_text: String,
	pub closing_at_ist: Option<DateTime<Utc>>,
	pub emd_amount_text: String,
	pub emd_amount_numeric: Option<BigDecimal>,
	pub tender_value_text: String,
	pub tender_value_numeric: Option<BigDecimal>,
	pub location: String,
	pub contract_type: String,
	pub inviting_officer: String,
	pub work_description: String,
	pub direct_url: String,
	pub status_url: String,
	pub lifecycle_status: LifecycleStatus,
	pub raw_json: serde_json::Value,
}

impl Tender {
	pub fn portal_name_norm(&self) -> String {
		crate::normalize::norm_portal_name(&self.portal_name)
	}

	pub fn tender_id_norm(&self) -> String {
		crate::normalize::norm_tender_id(&self.tender_id_extracted)
	}

	pub fn closing_at_text_norm(&self) -> String {
		self.closing_at_text.trim().to_string()
	}

	pub fn dedup_key(&self) -> (String, String) {
		(self.portal_name_norm(), self.tender_id_norm())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeMode {
	OnlyNew,
	FullRescrape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
	Running,
	Completed,
	Failed,
	Cancelled,
}

/// One scraping attempt of one portal. `id` is assigned by the datastore on
/// `begin_run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
	pub id: i64,
	pub portal_name: String,
	pub scope_mode: ScopeMode,
	pub started_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
	pub status: RunStatus,
	pub expected_total_tenders: i64,
	pub extracted_total_tenders: i64,
	pub skipped_existing_total: i64,
	pub changed_closing_date_count: i64,
	pub error_message: Option<String>,
	pub output_file_path: Option<String>,
}

impl Run {
	pub fn duration_seconds(&self) -> Option<i64> {
		self.completed_at.map(|end| (end - self.started_at).num_seconds())
	}
}

/// Monotone progress counters a Run may update during its lifetime (§3 invariant 5).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunCounters {
	pub expected_total_tenders: i64,
	pub extracted_total_tenders: i64,
	pub skipped_existing_total: i64,
	pub changed_closing_date_count: i64,
}

/// Durable partial snapshot of a Run, written by the checkpoint saver and read back
/// on resume (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
	pub portal_name: String,
	pub run_id: i64,
	pub saved_at_iso: DateTime<Utc>,
	pub processed_department_names_norm: HashSet<String>,
	pub all_tender_details: Vec<Tender>,
	pub counters: RunCounters,
}

impl Checkpoint {
	pub fn new(portal_name: impl Into<String>, run_id: i64) -> Self {
		Self {
			portal_name: portal_name.into(),
			run_id,
			saved_at_iso: Utc::now(),
			processed_department_names_norm: HashSet::new(),
			all_tender_details: Vec::new(),
			counters: RunCounters::default(),
		}
	}
}
