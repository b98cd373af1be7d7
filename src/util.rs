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

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Asia::Kolkata;
use fern::colors::{Color, ColoredLevelConfig};
use log::*;
use std::path::Path;

/// panics if directory creation fails for any reason other than it already existing
pub fn create_dir(path: &Path) {
	match std::fs::create_dir_all(path) {
		Err(e) => {
			error!("{}", e);
			std::process::exit(0x0100);
		}
		Ok(_) => (),
	}
}

/// Initialize crate-wide logging: colored level output on stdout, plus a rotating
/// file sink under `log_dir`. Mirrors the source's `fern::Dispatch` setup, with our
/// own crate's target carrying the configurable `file_lvl` while dependencies stay
/// at `Info`.
pub fn init_logger(std_lvl: LevelFilter, file_lvl: LevelFilter, log_dir: &Path) {
	let colors = ColoredLevelConfig::new()
		.info(Color::Green)
		.warn(Color::Yellow)
		.error(Color::Red)
		.debug(Color::Blue)
		.trace(Color::Magenta);

	create_dir(log_dir);
	let log_file = log_dir.join(format!("{}.log", chrono::Local::now().format("%Y-%m-%d")));

	let file_dispatch = fern::Dispatch::new()
		.level(LevelFilter::Info)
		.level_for("tender_archive", file_lvl)
		.chain(fern::log_file(log_file).expect("failed to create tender_archive log file"));

	fern::Dispatch::new()
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} [{}][{}] {}",
				chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
				record.target(),
				colors.color(record.level()),
				message,
			))
		})
		.chain(file_dispatch)
		.chain(fern::Dispatch::new().level(std_lvl).chain(std::io::stdout()))
		.apply()
		.expect("could not init logging, was it already initialized?");
}

/// `now()` in IST. All closing-date comparisons in this crate go through this
/// function rather than the local system timezone (invariant 3: closing_at_ist is
/// interpreted in IST regardless of the reader's locale).
pub fn now_ist() -> DateTime<chrono_tz::Tz> {
	Kolkata.from_utc_datetime(&chrono::Utc::now().naive_utc())
}

/// Accepted closing-date formats, tried in order; first match wins (see §6). Applied
/// to `published_at_text` and `opening_at_text` too, since the portal uses the same
/// format family for all three fields.
const DATE_FORMATS: &[&str] = &["%d-%b-%Y %I:%M %p", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d", "%d/%m/%Y %H:%M", "%d/%m/%Y"];

/// Parse a portal-rendered date/time string into an IST timestamp. Returns `None`
/// (never an error) if no accepted format matches; callers must treat that as
/// "possibly live" per invariant 4, not as a dropped row.
pub fn parse_closing_date(text: &str) -> Option<DateTime<chrono_tz::Tz>> {
	let text = text.trim();
	if text.is_empty() {
		return None;
	}
	for fmt in DATE_FORMATS {
		if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
			return Kolkata.from_local_datetime(&dt).single();
		}
		if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
			return Kolkata.from_local_datetime(&d.and_hms(0, 0, 0)).single();
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_day_month_name_year() {
		let dt = parse_closing_date("20-Feb-2026 10:00 AM").unwrap();
		assert_eq!(dt.format("%Y-%m-%dT%H:%M:%S").to_string(), "2026-02-20T10:00:00");
		assert_eq!(dt.format("%z").to_string(), "+0530");
	}

	#[test]
	fn parses_slash_date_only() {
		let dt = parse_closing_date("20/02/2026").unwrap();
		assert_eq!(dt.format("%Y-%m-%d").to_string(), "2026-02-20");
	}

	#[test]
	fn unparseable_text_yields_none() {
		assert!(parse_closing_date("whenever, maybe").is_none());
		assert!(parse_closing_date("").is_none());
	}
}
