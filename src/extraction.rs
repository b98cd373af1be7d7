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

//! Extraction Engine (C4, §4.3): applies a Skill to a Session for one department.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::browser::Session;
use crate::database::SkipSnapshot;
use crate::error::ExtractErrorKind;
use crate::events::{Event, EventBus};
use crate::normalize::norm_tender_id;
use crate::ratelimit::RateLimiter;
use crate::skill::Skill;
use crate::types::{Department, Portal, Tender};

const OPEN_DEPARTMENT_RETRIES: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
	Oversized,
	Captcha,
}

/// Outcome of extracting one department (§4.3).
#[derive(Debug, Clone, Default)]
pub struct DepartmentResult {
	pub department_name: String,
	pub expected: usize,
	pub extracted: usize,
	pub skipped_existing: usize,
	pub soft_miss: usize,
	pub changed_closing_date: usize,
	pub duration_ms: u128,
	pub errors: Vec<String>,
	pub reason: Option<SkipReason>,
	pub tenders: Vec<Tender>,
}

pub struct ExtractionEngine<'a> {
	skill: &'a dyn Skill,
	rate_limiter: &'a RateLimiter,
	events: &'a EventBus,
	department_row_ceiling: usize,
}

impl<'a> ExtractionEngine<'a> {
	pub fn new(skill: &'a dyn Skill, rate_limiter: &'a RateLimiter, events: &'a EventBus, department_row_ceiling: usize) -> Self {
		ExtractionEngine { skill, rate_limiter, events, department_row_ceiling }
	}

	/// Execute one department end-to-end (§4.3 algorithm). `skip_snapshot` is the
	/// live-tender delta input (§4.5); `cancelled` is polled at every suspension
	/// point (§5).
	pub fn run_department(
		&self,
		session: &Session,
		portal: &Portal,
		dept: &Department,
		skip_snapshot: &SkipSnapshot,
		cancelled: &AtomicBool,
	) -> DepartmentResult {
		let started = Instant::now();
		let mut result = DepartmentResult { department_name: dept.name.clone(), ..Default::default() };
		self.events.publish(Event::DepartmentStarted {
			portal_name: portal.name.clone(),
			department_name: dept.name.clone(),
		});

		let list_url = match self.open_with_retries(session, portal, dept) {
			Ok(Some(url)) => url,
			Ok(None) => {
				result.duration_ms = started.elapsed().as_millis();
				return result;
			}
			Err(e) if e.kind == ExtractErrorKind::CaptchaRequired => {
				result.reason = Some(SkipReason::Captcha);
				result.duration_ms = started.elapsed().as_millis();
				return result;
			}
			Err(e) => {
				result.errors.push(e.detail.clone());
				self.events.publish(Event::DepartmentFailed {
					portal_name: portal.name.clone(),
					department_name: dept.name.clone(),
					detail: e.detail,
					retryable: e.is_retryable(),
				});
				result.duration_ms = started.elapsed().as_millis();
				return result;
			}
		};

		let tender_ids = match self.skill.extract_tender_ids(session, &list_url) {
			Ok(ids) => ids,
			Err(e) if e.kind == ExtractErrorKind::CaptchaRequired => {
				result.reason = Some(SkipReason::Captcha);
				result.duration_ms = started.elapsed().as_millis();
				return result;
			}
			Err(e) => {
				result.errors.push(e.detail.clone());
				result.duration_ms = started.elapsed().as_millis();
				return result;
			}
		};
		result.expected = tender_ids.len();

		if tender_ids.len() > self.department_row_ceiling {
			result.reason = Some(SkipReason::Oversized);
			result.duration_ms = started.elapsed().as_millis();
			return result;
		}

		let mut changed_already_counted = HashSet::new();
		for raw_id in &tender_ids {
			if cancelled.load(Ordering::Relaxed) {
				break;
			}
			let id_norm = norm_tender_id(raw_id);

			let waited = self.rate_limiter.acquire();
			if waited > Duration::from_millis(0) {
				self.events.publish(Event::RateLimited { portal_name: portal.name.clone(), waited_ms: waited.as_millis() as u64 });
			}
			let details = match self.skill.extract_tender_details(session, &portal.base_url, raw_id) {
				Ok(Some(t)) => t,
				Ok(None) => {
					result.soft_miss += 1;
					continue;
				}
				Err(e) => {
					result.errors.push(e.detail);
					continue;
				}
			};

			if let Some(prev_closing) = skip_snapshot.get(&id_norm) {
				let current_closing = details.closing_at_text_norm();
				if &current_closing == prev_closing {
					result.skipped_existing += 1;
					self.events.publish(Event::TenderSkippedUnchanged {
						portal_name: portal.name.clone(),
						tender_id_norm: id_norm,
					});
					continue;
				}
				if changed_already_counted.insert(id_norm.clone()) {
					result.changed_closing_date += 1;
					self.events.publish(Event::TenderClosingDateChanged {
						portal_name: portal.name.clone(),
						tender_id_norm: id_norm.clone(),
					});
				}
			}

			result.extracted += 1;
			self.events.publish(Event::TenderExtracted { portal_name: portal.name.clone(), tender_id_norm: id_norm });
			result.tenders.push(details);
		}

		self.events.publish(Event::DepartmentCompleted {
			portal_name: portal.name.clone(),
			department_name: dept.name.clone(),
			tender_count: result.tenders.len(),
		});
		result.duration_ms = started.elapsed().as_millis();
		result
	}

	fn open_with_retries(
		&self,
		session: &Session,
		portal: &Portal,
		dept: &Department,
	) -> Result<Option<String>, crate::error::ExtractError> {
		let mut last_err = None;
		for attempt in 0..=OPEN_DEPARTMENT_RETRIES {
			match self.skill.open_department(session, &portal.base_url, dept) {
				Ok(url) => return Ok(url),
				Err(e) if e.is_retryable() && attempt < OPEN_DEPARTMENT_RETRIES => {
					last_err = Some(e);
				}
				Err(e) => return Err(e),
			}
		}
		Err(last_err.unwrap())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::ExtractError;
	use crate::skill::FastChangeSignal;
	use crate::types::{LifecycleStatus, PortalCategory};

	struct StubSkill {
		ids: Vec<&'static str>,
		closing: &'static str,
		captcha_on_list: bool,
	}

	impl Skill for StubSkill {
		fn list_departments(&self, _s: &Session, _u: &str) -> Result<Vec<Department>, ExtractError> {
			Ok(vec![])
		}
		fn open_department(&self, _s: &Session, _b: &str, _d: &Department) -> Result<Option<String>, ExtractError> {
			Ok(Some("https://example/list".into()))
		}
		fn extract_tender_ids(&self, _s: &Session, _u: &str) -> Result<Vec<String>, ExtractError> {
			if self.captcha_on_list {
				return Err(ExtractError::captcha("captcha wall on list page"));
			}
			Ok(self.ids.iter().map(|s| s.to_string()).collect())
		}
		fn extract_tender_details(&self, _s: &Session, _b: &str, id: &str) -> Result<Option<Tender>, ExtractError> {
			Ok(Some(Tender {
				portal_name: "goa".into(),
				tender_id_raw: id.into(),
				tender_id_extracted: id.into(),
				department_name: "PWD".into(),
				title_ref: "x".into(),
				organisation_chain: "x".into(),
				published_at_text: "".into(),
				closing_at_text: self.closing.into(),
				opening_at_text: "".into(),
				closing_at_ist: None,
				emd_amount_text: "".into(),
				emd_amount_numeric: None,
				tender_value_text: "".into(),
				tender_value_numeric: None,
				location: "".into(),
				contract_type: "".into(),
				inviting_officer: "".into(),
				work_description: "".into(),
				direct_url: "".into(),
				status_url: "".into(),
				lifecycle_status: LifecycleStatus::Active,
				raw_json: serde_json::json!({}),
			}))
		}
		fn detect_fast_change(&self, _s: &Session, _u: &str) -> FastChangeSignal {
			FastChangeSignal::Unknown
		}
	}

	fn portal() -> Portal {
		Portal {
			name: "goa".into(),
			base_url: "https://example".into(),
			org_list_url: "https://example/orgs".into(),
			skill_id: "nic".into(),
			category: PortalCategory::State,
			rate_limit_rpm: 6000,
			cooldown_seconds: 0,
		}
	}

	#[test]
	fn unchanged_tender_is_skipped_not_extracted() {
		let skill = StubSkill { ids: vec!["2026_PWD_1"], closing: "2099-01-01", captcha_on_list: false };
		let rl = RateLimiter::new(6000);
		let bus = EventBus::new(100);
		let engine = ExtractionEngine::new(&skill, &rl, &bus, 15_000);
		let session = Session::open().unwrap();
		let mut snap = SkipSnapshot::new();
		snap.insert(norm_tender_id("2026_PWD_1"), "2099-01-01".to_string());
		let dept = Department { serial_no: "1".into(), name: "PWD".into(), tender_count_text: "1".into(), tender_count: Some(1), direct_url: Some("/pwd".into()) };
		let result = engine.run_department(&session, &portal(), &dept, &snap, &AtomicBool::new(false));
		assert_eq!(result.skipped_existing, 1);
		assert_eq!(result.extracted, 0);
	}

	#[test]
	fn changed_closing_date_is_reextracted_and_counted_once() {
		let skill = StubSkill { ids: vec!["2026_PWD_1"], closing: "2099-06-01", captcha_on_list: false };
		let rl = RateLimiter::new(6000);
		let bus = EventBus::new(100);
		let engine = ExtractionEngine::new(&skill, &rl, &bus, 15_000);
		let session = Session::open().unwrap();
		let mut snap = SkipSnapshot::new();
		snap.insert(norm_tender_id("2026_PWD_1"), "2099-01-01".to_string());
		let dept = Department { serial_no: "1".into(), name: "PWD".into(), tender_count_text: "1".into(), tender_count: Some(1), direct_url: Some("/pwd".into()) };
        let result = engine.run_department(&session, &portal(), &dept, &snap, &AtomicBool::new(false));
		assert_eq!(result.changed_closing_date, 1);
		assert_eq!(result.extracted, 1);
	}

	#[test]
	fn oversized_department_is_skipped_cleanly() {
		let ids: Vec<&'static str> = vec!["a"; 10];
		let skill = StubSkill { ids, closing: "2099-01-01", captcha_on_list: false };
		let rl = RateLimiter::new(6000);
		let bus = EventBus::new(100);
		let engine = ExtractionEngine::new(&skill, &rl, &bus, 5);
		let session = Session::open().unwrap();
		let dept = Department { serial_no: "1".into(), name: "PWD".into(), tender_count_text: "10".into(), tender_count: Some(10), direct_url: Some("/pwd".into()) };
		let result = engine.run_department(&session, &portal(), &dept, &SkipSnapshot::new(), &AtomicBool::new(false));
		assert_eq!(result.reason, Some(SkipReason::Oversized));
	}

	#[test]
	fn captcha_wall_is_skipped_not_reported_as_an_error() {
		let skill = StubSkill { ids: vec![], closing: "2099-01-01", captcha_on_list: true };
		let rl = RateLimiter::new(6000);
		let bus = EventBus::new(100);
		let engine = ExtractionEngine::new(&skill, &rl, &bus, 15_000);
		let session = Session::open().unwrap();
		let dept = Department { serial_no: "1".into(), name: "PWD".into(), tender_count_text: "0".into(), tender_count: Some(0), direct_url: Some("/pwd".into()) };
		let result = engine.run_department(&session, &portal(), &dept, &SkipSnapshot::new(), &AtomicBool::new(false));
		assert_eq!(result.reason, Some(SkipReason::Captcha));
		assert!(result.errors.is_empty());
	}
}
