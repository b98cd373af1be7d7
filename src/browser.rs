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

//! Browser Session (C3, §4.2). "Browser" here means an HTTP client plus an HTML
//! parse tree, not a driven browser process: the portal family this crate targets
//! renders its tender tables server-side, so a fetch + parse round trip is a
//! transparent substitute for navigation (§4.1 allows either).

use scraper::{Html, Selector};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::ExtractError;

const MAX_RETRIES: u8 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const BASE_BACKOFF_MS: u64 = 2_000;
const MAX_BACKOFF_MS: u64 = 60_000;

/// One portal session: a dedicated `reqwest::blocking::Client` (cookie jar scoped to
/// this session, matching a dedicated browser profile in the driven-browser model)
/// plus the poisoned flag the pool checks before reuse.
pub struct Session {
	client: reqwest::blocking::Client,
	poisoned: bool,
}

impl Session {
	/// Scoped acquisition: build the client up front so `open()` either fully
	/// succeeds or the Session never exists to leak a connection pool.
	pub fn open() -> Result<Self, ExtractError> {
		let client = reqwest::blocking::Client::builder()
			.cookie_store(true)
			.timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
			.gzip(true)
			.build()
			.map_err(ExtractError::from)?;
		Ok(Session { client, poisoned: false })
	}

	pub fn is_poisoned(&self) -> bool {
		self.poisoned
	}

	pub fn poison(&mut self) {
		self.poisoned = true;
	}

	/// Fetch `url` and parse it into a DOM tree, retrying transient failures up to
	/// `MAX_RETRIES` times with exponential backoff plus full jitter (§7: base 2s,
	/// cap 60s). A non-transient failure (4xx, parse error) is surfaced immediately.
	pub fn navigate(&self, url: &str) -> Result<Html, ExtractError> {
		let mut last_err = None;
		for attempt in 0..=MAX_RETRIES {
			match self.fetch_once(url) {
				Ok(html) => return Ok(html),
				Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
					std::thread::sleep(backoff_delay(attempt));
					last_err = Some(e);
				}
				Err(e) => return Err(e),
			}
		}
		Err(last_err.unwrap_or_else(|| ExtractError::fatal(format!("exhausted retries for {}", url))))
	}

	fn fetch_once(&self, url: &str) -> Result<Html, ExtractError> {
		let resp = self.client.get(url).send()?;
		if !resp.status().is_success() {
			let status = resp.status();
			return if status.is_server_error() || status.as_u16() == 429 {
				Err(ExtractError::transient(format!("{} returned {}", url, status)))
			} else {
				Err(ExtractError::fatal(format!("{} returned {}", url, status)))
			};
		}
		let body = resp.text()?;
		Ok(Html::parse_document(&body))
	}

	/// Select every element matching `selector` within `doc`, returning their inner
	/// text trimmed. Used for both department-list and tender-detail row scraping.
	pub fn select_text<'a>(doc: &'a Html, selector: &Selector) -> Vec<String> {
		doc.select(selector).map(|el| el.text().collect::<String>().trim().to_string()).collect()
	}
}

/// `base * 2^attempt`, capped at `MAX_BACKOFF_MS`, then full-jittered down to a
/// uniform value in `[0, cap]` so retrying workers don't all wake up in lockstep.
fn backoff_delay(attempt: u8) -> Duration {
	let exp_ms = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(10));
	let cap_ms = exp_ms.min(MAX_BACKOFF_MS);
	Duration::from_millis(pseudo_random_millis(cap_ms))
}

/// Uniform pseudo-random value in `[0, bound)`, seeded off the wall clock. Not
/// cryptographic, just enough spread to avoid synchronized retries without pulling
/// in a dedicated RNG crate for one call site.
fn pseudo_random_millis(bound: u64) -> u64 {
	if bound == 0 {
		return 0;
	}
	let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().subsec_nanos();
	nanos as u64 % bound
}
