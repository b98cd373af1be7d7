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

//! Typed, validated configuration. Re-architects the "dictionary of strings"
//! settings style of the source into enumerated options with validated ranges
//! (see design notes §9): unknown TOML keys are a hard error, and numeric knobs
//! are checked against their documented valid range at construction time rather
//! than at first use.

use serde::Deserialize;
use std::{convert::TryFrom, env, path::PathBuf};

use crate::error::{Error, Result};

/// Raw, on-disk shape of the configuration file. Validated into a [`Config`] via
/// `TryFrom`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
	#[serde(default = "default_workers")]
	pub workers: usize,
	#[serde(default = "default_js_batch_threshold")]
	pub js_batch_threshold: usize,
	#[serde(default = "default_js_batch_size")]
	pub js_batch_size: usize,
	#[serde(default = "default_checkpoint_interval_secs")]
	pub checkpoint_interval_secs: u64,
	#[serde(default = "default_department_row_ceiling")]
	pub department_row_ceiling: usize,
	#[serde(default = "default_final_sweep_cap")]
	pub final_sweep_cap: usize,
	#[serde(default)]
	pub run_timeout_secs: u64,
	#[serde(default)]
	pub base_urls_path: Option<PathBuf>,
	#[serde(default)]
	pub data_dir: Option<PathBuf>,
	#[serde(default)]
	pub database_url: Option<String>,
}

/// Clamp the host's core count into the validated `[1, 8]` worker range (§4.4):
/// enough parallelism on a big box without spawning more Sessions than a portal's
/// rate limit could plausibly use.
fn default_workers() -> usize {
	num_cpus::get().clamp(1, 8)
}
fn default_js_batch_threshold() -> usize {
	3000
}
fn default_js_batch_size() -> usize {
	2000
}
fn default_checkpoint_interval_secs() -> u64 {
	120
}
fn default_department_row_ceiling() -> usize {
	15_000
}
fn default_final_sweep_cap() -> usize {
	50
}

/// Platform-local data directory, falling back to a relative `data/` if the OS
/// can't report one (e.g. no `$HOME`). Mirrors the source's own local-data-dir
/// lookup rather than defaulting straight to a relative path.
fn default_data_dir() -> PathBuf {
	dirs::data_local_dir().map(|d| d.join("tender-archive")).unwrap_or_else(|| PathBuf::from("data"))
}

impl Default for RawConfig {
	fn default() -> Self {
		Self {
			workers: default_workers(),
			js_batch_threshold: default_js_batch_threshold(),
			js_batch_size: default_js_batch_size(),
			checkpoint_interval_secs: default_checkpoint_interval_secs(),
			department_row_ceiling: default_department_row_ceiling(),
			final_sweep_cap: default_final_sweep_cap(),
			run_timeout_secs: 0,
			base_urls_path: None,
			data_dir: None,
			database_url: None,
		}
	}
}

/// Validated runtime configuration. Every field here has already passed its
/// documented range check; downstream code never re-validates these values.
#[derive(Debug, Clone)]
pub struct Config {
	pub workers: usize,
	pub js_batch_threshold: usize,
	pub js_batch_size: usize,
	pub checkpoint_interval_secs: u64,
	pub department_row_ceiling: usize,
	pub final_sweep_cap: usize,
	pub run_timeout_secs: u64,
	pub base_urls_path: PathBuf,
	pub data_dir: PathBuf,
	pub database_url: String,
}

impl Config {
	/// Load configuration from an optional TOML file, then apply environment
	/// variable overrides the same way the source's `Database::new` pulled
	/// `DATABASE_URL` out of a `.env` file: `dotenv().ok()` first, `env::var`
	/// second, explicit file values take precedence over both.
	pub fn load(path: Option<&std::path::Path>) -> Result<Config> {
		dotenv::dotenv().ok();

		let mut raw = match path {
			Some(p) => {
				let text = std::fs::read_to_string(p)?;
				toml::from_str(&text)?
			}
			None => RawConfig::default(),
		};

		if raw.database_url.is_none() {
			raw.database_url = env::var("DATABASE_URL").ok();
		}
		if raw.data_dir.is_none() {
			raw.data_dir = env::var("TENDER_ARCHIVE_DATA_DIR").ok().map(PathBuf::from);
		}
		if raw.base_urls_path.is_none() {
			raw.base_urls_path = env::var("TENDER_ARCHIVE_BASE_URLS").ok().map(PathBuf::from);
		}

		Config::try_from(raw)
	}

	pub fn checkpoint_dir(&self) -> PathBuf {
		self.data_dir.join("checkpoints")
	}

	pub fn backups_dir(&self) -> PathBuf {
		self.data_dir.join("backups")
	}

	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}

	/// `None` when unset (0, the default): a run is then only bounded by how long
	/// its departments take. `Some` maps a per-run deadline onto the Worker Pool's
	/// cancellation signal (§4.5 "Deadlines... are mapped to cancellation").
	pub fn run_timeout(&self) -> Option<std::time::Duration> {
		if self.run_timeout_secs == 0 {
			None
		} else {
			Some(std::time::Duration::from_secs(self.run_timeout_secs))
		}
	}
}

impl TryFrom<RawConfig> for Config {
	type Error = Error;

	fn try_from(raw: RawConfig) -> Result<Config> {
		if !(1..=8).contains(&raw.workers) {
			return Err(Error::Config(format!("workers must be in [1, 8], got {}", raw.workers)));
		}
		if !(100..=10_000).contains(&raw.js_batch_threshold) {
			return Err(Error::Config(format!(
				"js_batch_threshold must be in [100, 10000], got {}",
				raw.js_batch_threshold
			)));
		}
		if !(500..=5_000).contains(&raw.js_batch_size) {
			return Err(Error::Config(format!(
				"js_batch_size must be in [500, 5000], got {}",
				raw.js_batch_size
			)));
		}
		if raw.checkpoint_interval_secs == 0 {
			return Err(Error::Config("checkpoint_interval_secs must be > 0".into()));
		}
		if raw.department_row_ceiling == 0 {
			return Err(Error::Config("department_row_ceiling must be > 0".into()));
		}

		let database_url = raw
			.database_url
			.ok_or_else(|| Error::Config("database_url not set (config file or DATABASE_URL)".into()))?;
		let data_dir = raw.data_dir.unwrap_or_else(default_data_dir);
		let base_urls_path = raw.base_urls_path.unwrap_or_else(|| PathBuf::from("base_urls.csv"));

		Ok(Config {
			workers: raw.workers,
			js_batch_threshold: raw.js_batch_threshold,
			js_batch_size: raw.js_batch_size,
			checkpoint_interval_secs: raw.checkpoint_interval_secs,
			department_row_ceiling: raw.department_row_ceiling,
			final_sweep_cap: raw.final_sweep_cap,
			run_timeout_secs: raw.run_timeout_secs,
			base_urls_path,
			data_dir,
			database_url,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_out_of_range_workers() {
		let mut raw = RawConfig::default();
		raw.workers = 9;
		raw.database_url = Some("postgres://x".into());
		assert!(Config::try_from(raw).is_err());
	}

	#[test]
	fn rejects_missing_database_url() {
		let raw = RawConfig::default();
		assert!(Config::try_from(raw).is_err());
	}

	#[test]
	fn accepts_defaults_with_database_url() {
		let mut raw = RawConfig::default();
		raw.database_url = Some("postgres://x".into());
		let cfg = Config::try_from(raw).unwrap();
		assert!((1..=8).contains(&cfg.workers));
		assert_eq!(cfg.js_batch_threshold, 3000);
	}

	#[test]
	fn unknown_keys_rejected_at_parse_time() {
		let toml = "workers = 2\nbogus_key = 1\n";
		let err = toml::from_str::<RawConfig>(toml).unwrap_err();
		assert!(err.to_string().contains("bogus_key"));
	}
}
