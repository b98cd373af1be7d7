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

//! Tiered backups (§4.7). On a successful run, the datastore takes a `pg_dump` of
//! itself into daily/weekly/monthly/yearly tiers and prunes each tier down to its
//! retention count. Runs inline with `finalize_run` but never fails the Run: a
//! backup problem is logged, not propagated.

use chrono::Utc;
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::Result;
use crate::util::create_dir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
	Daily,
	Weekly,
	Monthly,
	Yearly,
}

impl Tier {
	fn dirname(self) -> &'static str {
		match self {
			Tier::Daily => "daily",
			Tier::Weekly => "weekly",
			Tier::Monthly => "monthly",
			Tier::Yearly => "yearly",
		}
	}

	fn default_retention(self) -> usize {
		match self {
			Tier::Daily => 7,
			Tier::Weekly => 16,
			Tier::Monthly => 24,
			Tier::Yearly => 7,
		}
	}

	fn all() -> [Tier; 4] {
		[Tier::Daily, Tier::Weekly, Tier::Monthly, Tier::Yearly]
	}
}

pub struct BackupManager {
	root: PathBuf,
	daily_retention: usize,
}

impl BackupManager {
	pub fn new(root: impl Into<PathBuf>, daily_retention: usize) -> Self {
		let root = root.into();
		for tier in Tier::all() {
			create_dir(&root.join(tier.dirname()));
		}
		BackupManager { root, daily_retention: daily_retention.max(1) }
	}

	fn retention_for(&self, tier: Tier) -> usize {
		if tier == Tier::Daily {
			self.daily_retention
		} else {
			tier.default_retention()
		}
	}

	/// Dump `database_url` into every tier directory and prune each to its retention
	/// count. Never returns an error to the caller's run path; failures are logged and
	/// swallowed so a backup hiccup never fails a completed Run.
	pub fn snapshot(&self, database_url: &str) {
        if let Err(e) = self.try_snapshot(database_url) {
            warn!("backup snapshot failed: {}", e);
        }
	}

	fn try_snapshot(&self, database_url: &str) -> Result<()> {
		let stamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
		for tier in Tier::all() {
			let dir = self.root.join(tier.dirname());
			let dest = dir.join(format!("{}.sql", stamp));
			dump_to(database_url, &dest)?;
			self.prune(&dir, self.retention_for(tier))?;
		}
		Ok(())
	}

	fn prune(&self, dir: &Path, keep: usize) -> Result<()> {
		let mut entries: Vec<PathBuf> = fs::read_dir(dir)?.filter_map(|e| e.ok()).map(|e| e.path()).collect();
		entries.sort();
		if entries.len() > keep {
			for stale in &entries[..entries.len() - keep] {
				let _ = fs::remove_file(stale);
			}
		}
		Ok(())
	}
}

fn dump_to(database_url: &str, dest: &Path) -> Result<()> {
	let output = Command::new("pg_dump").arg("--format=plain").arg(database_url).output()?;
	if !output.status.success() {
		return Err(format!("pg_dump exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr)).into());
	}
	fs::write(dest, &output.stdout)?;
	Ok(())
}
