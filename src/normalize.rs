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

//! Normalization used as the dedup key (§3, §8 property 2: `norm(norm(x)) = norm(x)`).
//! These functions are pure and referentially transparent by design: they are the
//! one place the invariant "same id + same closing date = skip" can be checked
//! against, and they must never depend on anything but their input.

use once_cell::sync::Lazy;
use regex::Regex;

/// `portal_name_norm`: trim + lowercase. Matches the datastore's unique index,
/// which is built on `lower(trim(portal_name))`.
pub fn norm_portal_name(name: &str) -> String {
	name.trim().to_lowercase()
}

/// `department_name_norm`: trim + lowercase, used for department uniqueness within
/// a portal and for quick-delta comparisons.
pub fn norm_department_name(name: &str) -> String {
	name.trim().to_lowercase()
}

static BRACKETED_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\[\]]+)\]").unwrap());
static TENDER_ID_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*tender\s*id\s*[:#-]?\s*").unwrap());
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-]+").unwrap());
static LEADING_TRAILING_UNDERSCORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^_+|_+$").unwrap());

/// Extract the canonical tender id from a title cell. Prefers the bracketed token
/// (e.g. `Some Work Title [2026_PWD_000123_1]`); falls back to the raw displayed id
/// only when no bracketed token exists. Never returns the serial number (§9
/// historical swap bug: a prior implementation wrote `serial_no` into this field).
pub fn extract_canonical_tender_id<'a>(title_cell: &'a str, displayed_id: &'a str) -> &'a str {
	match BRACKETED_ID.captures(title_cell) {
		Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(displayed_id),
		None => displayed_id,
	}
}

/// `tender_id_norm`: strip `Tender ID:`-style prefixes, remove bracket wrapping,
/// uppercase, unify whitespace/dash separators to underscore, trim leading/trailing
/// underscores. Idempotent: `norm(norm(x)) == norm(x)`.
pub fn norm_tender_id(raw: &str) -> String {
	let stripped = TENDER_ID_PREFIX.replace(raw.trim(), "");
	let no_brackets: String = stripped.chars().filter(|c| *c != '[' && *c != ']').collect();
	let upper = no_brackets.trim().to_uppercase();
	let underscored = SEPARATORS.replace_all(&upper, "_");
	LEADING_TRAILING_UNDERSCORE.replace_all(&underscored, "").to_string()
}

/// Values that normalize to one of these are never persisted (§8 property 8).
const INVALID_NORMALIZED_IDS: &[&str] = &["", "NAN", "NONE", "NULL", "N/A", "-", "--"];

pub fn is_invalid_tender_id(normalized: &str) -> bool {
	INVALID_NORMALIZED_IDS.contains(&normalized)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn prefers_bracketed_id_over_displayed_serial() {
		let title = "Supply of Pipes [2026_PWD_000123_1]";
		assert_eq!(extract_canonical_tender_id(title, "42"), "2026_PWD_000123_1");
	}

	#[test]
	fn falls_back_to_displayed_id_without_brackets() {
		let title = "Supply of Pipes";
		assert_eq!(extract_canonical_tender_id(title, "2026_PWD_000123_1"), "2026_PWD_000123_1");
	}

	#[test]
	fn normalizes_prefix_brackets_case_and_separators() {
		assert_eq!(norm_tender_id("Tender ID: [2026-pwd-000123 1]"), "2026_PWD_000123_1");
		assert_eq!(norm_tender_id("  2026_pwd_000123_1  "), "2026_PWD_000123_1");
	}

	#[test]
	fn normalization_is_idempotent() {
		let once = norm_tender_id("Tender ID: [2026-pwd-000123 1]");
		let twice = norm_tender_id(&once);
		assert_eq!(once, twice);
	}

	#[test]
	fn recognizes_invalid_ids() {
		for v in ["", "nan", "None", "NULL", "n/a", "-", "--"] {
			assert!(is_invalid_tender_id(&norm_tender_id(v)), "{} should be invalid", v);
		}
		assert!(!is_invalid_tender_id(&norm_tender_id("2026_PWD_1")));
	}

	#[test]
	fn portal_name_norm_is_trim_lowercase() {
		assert_eq!(norm_portal_name("  Himachal Pradesh  "), "himachal pradesh");
	}
}
