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

//! The Datastore (C8, §4.7): strict dedup persistence, the live/expired skip
//! snapshot, and backup tiers. [`Datastore`] is the seam tests run against without a
//! live Postgres; [`PgDatastore`] is the diesel + r2d2 production implementation.

pub mod backup;
pub mod batch;
pub mod models;
pub mod schema;

use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel_migrations::embed_migrations;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::normalize::{is_invalid_tender_id, norm_portal_name, norm_tender_id};
use crate::types::{RunStatus, ScopeMode, Tender};
use backup::BackupManager;
use models::{NewRun, NewTender, RunRow, TenderRow};

embed_migrations!("migrations");

/// Result of `replace_run_tenders` (§4.7).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
	pub inserted: usize,
	pub updated: usize,
	pub skipped_invalid: usize,
}

/// The skip snapshot: for every persisted tender of a portal whose closing is still
/// live (in the future) or unparseable, its normalized closing-date text. Delta logic
/// (§4.2) treats an identical-id, identical-text match against this map as "no
/// change, skip re-extraction."
pub type SkipSnapshot = HashMap<String, String>;

/// The persistence seam (§4.7). Implemented by [`PgDatastore`] in production and by
/// an in-memory fake in tests, so extraction/orchestration logic never needs a live
/// Postgres to exercise.
pub trait Datastore: Send + Sync {
	fn begin_run(&self, portal_name: &str, scope_mode: ScopeMode) -> Result<i64>;

	fn get_live_skip_snapshot(&self, portal_name: &str) -> Result<SkipSnapshot>;

	fn replace_run_tenders(&self, run_id: i64, rows: &[Tender]) -> Result<ReplaceOutcome>;

	fn update_run_progress(
		&self,
		run_id: i64,
		expected_total_tenders: i64,
		extracted_total_tenders: i64,
		skipped_existing_total: i64,
	) -> Result<()>;

	fn finalize_run(&self, run_id: i64, status: RunStatus, error: Option<&str>) -> Result<()>;
}

type PgPool = Pool<ConnectionManager<PgConnection>>;

/// diesel + r2d2 connection-pooled Postgres datastore. Migrations run once at
/// construction, before any other operation is permitted (§4.7 "Migrations").
pub struct PgDatastore {
	pool: PgPool,
	backups: BackupManager,
	database_url: String,
}

impl PgDatastore {
	pub fn connect(database_url: &str, backups_dir: impl Into<std::path::PathBuf>, daily_retention: usize) -> Result<Self> {
		let manager = ConnectionManager::<PgConnection>::new(database_url);
		let pool = Pool::builder().build(manager).map_err(|e| Error::Config(format!("pool build failed: {}", e)))?;
		{
			let conn = pool.get()?;
			embedded_migrations::run(&conn)?;
		}
		Ok(PgDatastore {
			pool,
			backups: BackupManager::new(backups_dir, daily_retention),
			database_url: database_url.to_string(),
		})
	}

	fn conn(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>> {
		Ok(self.pool.get()?)
	}
}

impl Datastore for PgDatastore {
	fn begin_run(&self, portal_name: &str, scope_mode: ScopeMode) -> Result<i64> {
		use schema::runs::dsl;
		let conn = self.conn()?;
		let new_run = NewRun::starting(portal_name, scope_mode, Utc::now());
		let row: RunRow = diesel::insert_into(dsl::runs).values(&new_run).get_result(&conn)?;
		Ok(row.id)
	}

	fn get_live_skip_snapshot(&self, portal_name: &str) -> Result<SkipSnapshot> {
		use schema::tenders::dsl;
		let conn = self.conn()?;
		let target = norm_portal_name(portal_name);
		let rows: Vec<TenderRow> =
			dsl::tenders.filter(dsl::portal_name_norm.eq(&target)).load(&conn)?;

		let now = crate::util::now_ist();
		let mut snapshot = SkipSnapshot::new();
		for row in rows {
			let is_live = match crate::util::parse_closing_date(&row.closing_at_text) {
				Some(closing) => closing >= now,
				None => true,
			};
			if is_live {
				snapshot.insert(row.tender_id_norm, row.closing_at_text.trim().to_string());
			}
		}
		Ok(snapshot)
	}

	fn replace_run_tenders(&self, run_id: i64, rows: &[Tender]) -> Result<ReplaceOutcome> {
		use schema::tenders::dsl;
		let conn = self.conn()?;
		let now = Utc::now();

		let mut deduped: HashMap<(String, String), NewTender> = HashMap::new();
		let mut skipped_invalid = 0usize;
		for t in rows {
			let key = t.dedup_key();
			if is_invalid_tender_id(&key.1) {
				skipped_invalid += 1;
				continue;
			}
			deduped.insert(key, NewTender::from_domain(t, run_id, now));
		}
		let to_upsert: Vec<NewTender> = deduped.into_values().collect();

		let existing_keys: HashSet<(String, String)> = dsl::tenders
			.filter(dsl::portal_name_norm.eq_any(to_upsert.iter().map(|t| t.portal_name_norm.clone()).collect::<HashSet<_>>()))
			.select((dsl::portal_name_norm, dsl::tender_id_norm))
			.load::<(String, String)>(&conn)?
			.into_iter()
			.collect();

		let mut inserted = 0usize;
		let mut updated = 0usize;
		for t in &to_upsert {
			if existing_keys.contains(&(t.portal_name_norm.clone(), t.tender_id_norm.clone())) {
				updated += 1;
			} else {
				inserted += 1;
			}
		}

		conn.transaction(|| -> Result<()> {
			batch::upsert_all(&conn, &to_upsert)?;
			Ok(())
		})?;

		Ok(ReplaceOutcome { inserted, updated, skipped_invalid })
	}

	fn update_run_progress(
		&self,
		run_id: i64,
		expected_total_tenders: i64,
		extracted_total_tenders: i64,
		skipped_existing_total: i64,
	) -> Result<()> {
		use schema::runs::dsl;
		let conn = self.conn()?;
		diesel::update(dsl::runs.find(run_id))
			.set((
				dsl::expected_total_tenders.eq(expected_total_tenders),
				dsl::extracted_total_tenders.eq(extracted_total_tenders),
				dsl::skipped_existing_total.eq(skipped_existing_total),
			))
			.execute(&conn)?;
		Ok(())
	}

	fn finalize_run(&self, run_id: i64, status: RunStatus, error: Option<&str>) -> Result<()> {
		use schema::runs::dsl;
		let conn = self.conn()?;
		let status_str = match status {
			RunStatus::Completed => "completed",
			RunStatus::Failed => "failed",
			RunStatus::Cancelled => "cancelled",
			RunStatus::Running => "running",
		};
		diesel::update(dsl::runs.find(run_id))
			.set((dsl::status.eq(status_str), dsl::completed_at.eq(Some(Utc::now())), dsl::error_message.eq(error)))
			.execute(&conn)?;

		if status == RunStatus::Completed {
			self.backups.snapshot(&self.database_url);
		}
		Ok(())
	}
}

/// In-memory fake satisfying [`Datastore`], used by orchestrator/extraction tests so
/// they never need a live Postgres instance (§8 scenarios).
#[derive(Default)]
pub struct FakeDatastore {
	inner: Mutex<FakeInner>,
}

#[derive(Default)]
struct FakeInner {
	next_run_id: i64,
	runs: HashMap<i64, (String, RunStatus)>,
	tenders: HashMap<(String, String), Tender>,
}

impl FakeDatastore {
	pub fn new() -> Self {
		FakeDatastore { inner: Mutex::new(FakeInner { next_run_id: 1, ..Default::default() }) }
	}

	pub fn tender_count(&self) -> usize {
		self.inner.lock().unwrap().tenders.len()
	}
}

impl Datastore for FakeDatastore {
	fn begin_run(&self, portal_name: &str, _scope_mode: ScopeMode) -> Result<i64> {
		let mut inner = self.inner.lock().unwrap();
		let id = inner.next_run_id;
		inner.next_run_id += 1;
		inner.runs.insert(id, (portal_name.to_string(), RunStatus::Running));
		Ok(id)
	}

	fn get_live_skip_snapshot(&self, portal_name: &str) -> Result<SkipSnapshot> {
		let inner = self.inner.lock().unwrap();
		let target = norm_portal_name(portal_name);
		let now = crate::util::now_ist();
		let mut snapshot = SkipSnapshot::new();
		for ((pname, tid), t) in inner.tenders.iter() {
			if pname != &target {
				continue;
			}
			let is_live = match crate::util::parse_closing_date(&t.closing_at_text) {
				Some(closing) => closing >= now,
				None => true,
			};
			if is_live {
				snapshot.insert(tid.clone(), t.closing_at_text.trim().to_string());
			}
		}
		Ok(snapshot)
	}

	fn replace_run_tenders(&self, _run_id: i64, rows: &[Tender]) -> Result<ReplaceOutcome> {
		let mut inner = self.inner.lock().unwrap();
		let mut outcome = ReplaceOutcome::default();
		for t in rows {
			let key = t.dedup_key();
			if is_invalid_tender_id(&key.1) {
				outcome.skipped_invalid += 1;
				continue;
			}
			if inner.tenders.insert(key, t.clone()).is_some() {
				outcome.updated += 1;
			} else {
				outcome.inserted += 1;
			}
		}
		Ok(outcome)
	}

	fn update_run_progress(&self, _run_id: i64, _e: i64, _x: i64, _s: i64) -> Result<()> {
		Ok(())
	}

	fn finalize_run(&self, run_id: i64, status: RunStatus, _error: Option<&str>) -> Result<()> {
		let mut inner = self.inner.lock().unwrap();
		if let Some(entry) = inner.runs.get_mut(&run_id) {
			entry.1 = status;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::LifecycleStatus;

	fn sample_tender(portal: &str, id: &str, closing: &str) -> Tender {
		Tender {
			portal_name: portal.into(),
			tender_id_raw: id.into(),
			tender_id_extracted: id.into(),
			department_name: "PWD".into(),
			title_ref: "Supply of pipes".into(),
			organisation_chain: "PWD > Zone 1".into(),
			published_at_text: "2026-01-01".into(),
			closing_at_text: closing.into(),
			opening_at_text: "2026-01-02".into(),
			closing_at_ist: None,
			emd_amount_text: "".into(),
			emd_amount_numeric: None,
			tender_value_text: "".into(),
			tender_value_numeric: None,
			location: "".into(),
			contract_type: "".into(),
			inviting_officer: "".into(),
			work_description: "".into(),
			direct_url: "https://example".into(),
			status_url: "https://example/status".into(),
			lifecycle_status: LifecycleStatus::Active,
			raw_json: serde_json::json!({}),
		}
	}

	#[test]
	fn fake_datastore_dedups_on_portal_and_tender_id() {
		let ds = FakeDatastore::new();
		let run_id = ds.begin_run("goa", ScopeMode::OnlyNew).unwrap();
		let first = sample_tender("goa", "2026_PWD_1", "2099-01-01");
		let second = sample_tender("goa", "2026_pwd_1", "2099-01-01");
		let outcome = ds.replace_run_tenders(run_id, &[first, second]).unwrap();
		assert_eq!(outcome.inserted + outcome.updated, 1);
		assert_eq!(ds.tender_count(), 1);
	}

	#[test]
	fn invalid_ids_are_dropped_not_stored() {
		let ds = FakeDatastore::new();
		let run_id = ds.begin_run("goa", ScopeMode::OnlyNew).unwrap();
		let outcome = ds.replace_run_tenders(run_id, &[sample_tender("goa", "n/a", "2099-01-01")]).unwrap();
		assert_eq!(outcome.skipped_invalid, 1);
		assert_eq!(ds.tender_count(), 0);
	}

	#[test]
	fn skip_snapshot_excludes_expired_tenders() {
		let ds = FakeDatastore::new();
		let run_id = ds.begin_run("goa", ScopeMode::OnlyNew).unwrap();
		ds.replace_run_tenders(
			run_id,
			&[sample_tender("goa", "LIVE_1", "2099-01-01"), sample_tender("goa", "DEAD_1", "2000-01-01")],
		)
		.unwrap();
		let snap = ds.get_live_skip_snapshot("goa").unwrap();
		assert!(snap.contains_key(&norm_tender_id("LIVE_1")));
		assert!(!snap.contains_key(&norm_tender_id("DEAD_1")));
	}
}
