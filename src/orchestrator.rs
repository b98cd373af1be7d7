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

//! Portal Orchestrator (C6, §4.5) and the crate's one externally-visible blocking
//! entry point, `run_portal` (§4.9).

use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browser::Session;
use crate::checkpoint::{CheckpointSaver, CheckpointStore, RunAccumulator};
use crate::config::Config;
use crate::database::{Datastore, PgDatastore};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::extraction::DepartmentResult;
use crate::ratelimit::RateLimiter;
use crate::skill::{Skill, SkillRegistry};
use crate::types::{Checkpoint, Department, Portal, RunCounters, RunStatus, ScopeMode, Tender};
use crate::workers::{PoolOutcome, Task, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
	Idle,
	Preflight,
	FetchingDepartments,
	ComputingDelta,
	Scheduling,
	Scraping,
	Finalizing,
	Completed,
	Failed,
	Cancelled,
}

/// Mirrors the `Run` row; the value `run_portal` returns to its caller (§4.9).
#[derive(Debug, Clone)]
pub struct RunSummary {
	pub run_id: i64,
	pub portal_name: String,
	pub status: RunStatus,
	pub expected_total_tenders: i64,
	pub extracted_total_tenders: i64,
	pub skipped_existing_total: i64,
	pub changed_closing_date_count: i64,
	pub skipped_invalid_total: i64,
	pub error_message: Option<String>,
}

/// `(name_norm, tender_count)` per department as of the portal's last completed run,
/// used by the quick-delta department policy (§4.5). Persisted alongside checkpoints
/// since it is recovery-adjacent, write-once-per-run state.
struct DepartmentSnapshotStore {
	dir: std::path::PathBuf,
}

impl DepartmentSnapshotStore {
	fn new(dir: impl Into<std::path::PathBuf>) -> Self {
		let dir = dir.into();
		crate::util::create_dir(&dir);
		DepartmentSnapshotStore { dir }
	}

	fn path(&self, portal_name_norm: &str) -> std::path::PathBuf {
		self.dir.join(format!("{}.json", portal_name_norm))
	}

	fn load(&self, portal_name_norm: &str) -> HashMap<String, Option<u64>> {
		let path = self.path(portal_name_norm);
		std::fs::read_to_string(&path).ok().and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
	}

	fn save(&self, portal_name_norm: &str, snapshot: &HashMap<String, Option<u64>>) -> Result<()> {
		let path = self.path(portal_name_norm);
		let tmp = path.with_extension("json.tmp");
		std::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
		std::fs::rename(&tmp, &path)?;
		Ok(())
	}
}

/// Load `base_urls.csv` (§6): minimally `Name, BaseURL, Keyword` per row, case
/// sensitive on `Name`, optional extra columns ignored.
pub fn load_portals(path: &std::path::Path) -> Result<Vec<Portal>> {
	let mut reader = csv::ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_path(path)?;
	let mut portals = Vec::new();
	for record in reader.records() {
		let record = record?;
		let name = record.get(0).unwrap_or("").to_string();
		let base_url = record.get(1).unwrap_or("").to_string();
		if name.is_empty() || base_url.is_empty() {
			continue;
		}
		portals.push(Portal {
			org_list_url: format!("{}/organisations", base_url.trim_end_matches('/')),
			skill_id: "nic".to_string(),
			category: crate::types::PortalCategory::State,
			rate_limit_rpm: 120,
			cooldown_seconds: 0,
			name,
			base_url,
		});
	}
	Ok(portals)
}

/// The single blocking entry point (§4.9): wires Config → Datastore → EventBus →
/// Orchestrator and runs one portal to a terminal state.
pub fn run_portal(name: &str, scope_mode: ScopeMode, workers: usize) -> Result<RunSummary> {
	let config = Config::load(None)?;
	crate::util::init_logger(log::LevelFilter::Info, log::LevelFilter::Debug, &config.logs_dir());

	let portals = load_portals(&config.base_urls_path)?;
	let portal = portals.into_iter().find(|p| p.name == name).ok_or_else(|| Error::UnknownPortal(name.to_string()))?;

	let datastore: Arc<dyn Datastore> = Arc::new(PgDatastore::connect(&config.database_url, config.backups_dir(), 7)?);
	let events = Arc::new(EventBus::new(4096));
	let registry = SkillRegistry::with_config(&config);

	let orchestrator = Orchestrator::new(&config, datastore, Arc::clone(&events), &registry);
	orchestrator.run(&portal, scope_mode, workers)
}

pub struct Orchestrator<'a> {
	config: &'a Config,
	datastore: Arc<dyn Datastore>,
	events: Arc<EventBus>,
	registry: &'a SkillRegistry,
	checkpoints: Arc<CheckpointStore>,
	dept_snapshots: DepartmentSnapshotStore,
}

impl<'a> Orchestrator<'a> {
	pub fn new(config: &'a Config, datastore: Arc<dyn Datastore>, events: Arc<EventBus>, registry: &'a SkillRegistry) -> Self {
		Orchestrator {
			config,
			datastore,
			events,
			registry,
			checkpoints: Arc::new(CheckpointStore::new(config.checkpoint_dir())),
			dept_snapshots: DepartmentSnapshotStore::new(config.checkpoint_dir().join("dept_snapshots")),
		}
	}

	/// Drive one portal through the §4.5 state machine to a terminal state.
	pub fn run(&self, portal: &Portal, scope_mode: ScopeMode, workers: usize) -> Result<RunSummary> {
		let mut state = RunState::Preflight;
		let portal_norm = portal.name_norm();
		let skill: Arc<dyn Skill> = self
			.registry
			.get(&portal.skill_id)
			.ok_or_else(|| Error::Config(format!("no skill registered for id {}", portal.skill_id)))?;

		// Preflight: a temporary Session verifies the portal is reachable; its list
		// call also serves FetchingDepartments, since a fresh fetch is what
		// "reachable" means here.
		let preflight_session = Session::open().map_err(|e| Error::Msg(e.detail))?;
		let departments_result = skill.list_departments(&preflight_session, &portal.org_list_url);
		if departments_result.is_err() {
			state = RunState::Failed;
			warn!("preflight failed for portal {}", portal.name);
		}

		let resumed = self.checkpoints.load(&portal_norm)?;
		let run_id = match &resumed {
			Some(cp) => cp.run_id,
			None => self.datastore.begin_run(&portal.name, scope_mode)?,
		};
		self.events.publish(Event::RunStarted { portal_name: portal.name.clone(), run_id });

		let departments = match departments_result {
			Ok(d) => {
				state = RunState::FetchingDepartments;
				d
			}
			Err(e) => {
				self.datastore.finalize_run(run_id, RunStatus::Failed, Some(&e.detail))?;
				self.events.publish(Event::RunFailed { portal_name: portal.name.clone(), run_id, detail: e.detail.clone() });
				return Ok(self.summary(run_id, portal, RunStatus::Failed, RunCounters::default(), 0, Some(e.detail)));
			}
		};

		state = RunState::ComputingDelta;
		let skip_snapshot = Arc::new(self.datastore.get_live_skip_snapshot(&portal.name)?);
		let previous_dept_snapshot = self.dept_snapshots.load(&portal_norm);
		let target_departments = self.select_departments(&departments, &previous_dept_snapshot, scope_mode, &resumed);

		state = RunState::Scheduling;
		let accumulator: Arc<Mutex<Vec<Tender>>> = Arc::new(Mutex::new(resumed.as_ref().map(|c| c.all_tender_details.clone()).unwrap_or_default()));
		let processed_departments: Arc<Mutex<HashSet<String>>> =
			Arc::new(Mutex::new(resumed.as_ref().map(|c| c.processed_department_names_norm.clone()).unwrap_or_default()));
		let counters: Arc<Mutex<RunCounters>> =
			Arc::new(Mutex::new(resumed.map(|c| c.counters).unwrap_or_default()));
		let rate_limiter = Arc::new(RateLimiter::new(portal.rate_limit_rpm));

		let run_accumulator = Arc::new(RunAccumulator {
			portal_name: portal.name.clone(),
			run_id,
			tenders: Arc::clone(&accumulator),
			processed_departments: Arc::clone(&processed_departments),
			counters: Arc::clone(&counters),
		});
		let saver = CheckpointSaver::start(
			Arc::clone(&self.checkpoints),
			Arc::clone(&self.datastore),
			Arc::clone(&run_accumulator),
			Arc::clone(&self.events),
			Duration::from_secs(self.config.checkpoint_interval_secs),
		);

		state = RunState::Scraping;
		let outcome = self.scrape(
			portal,
			Arc::clone(&skill),
			workers,
			Arc::clone(&rate_limiter),
			Arc::clone(&skip_snapshot),
			&target_departments,
			Arc::clone(&accumulator),
			Arc::clone(&processed_departments),
			Arc::clone(&counters),
		);
		self.check_scrape_outcome(&outcome, workers, run_id, portal)?;

		// Final verification sweep: re-visit a bounded number of departments that the
		// delta pass skipped, to catch tenders added mid-run (§4.5). Departments this
		// run (or a prior, resumed attempt) already processed stay excluded; the sweep
		// targets what the delta never touched, not a second pass over everything.
		let already_covered = processed_departments.lock().unwrap().clone();
		let sweep_candidates: Vec<Department> =
			departments.iter().filter(|d| !already_covered.contains(&d.name_norm())).cloned().collect();
		let sweep_set: Vec<Department> = sweep_candidates.into_iter().take(self.config.final_sweep_cap).collect();
		if !sweep_set.is_empty() {
			let sweep_outcome = self.scrape(
				portal,
				Arc::clone(&skill),
				workers,
				Arc::clone(&rate_limiter),
				Arc::clone(&skip_snapshot),
				&sweep_set,
				Arc::clone(&accumulator),
				Arc::clone(&processed_departments),
				Arc::clone(&counters),
			);
			self.check_scrape_outcome(&sweep_outcome, workers, run_id, portal)?;
		}

		saver.stop_and_join();

		state = RunState::Finalizing;
		let all_tenders = accumulator.lock().unwrap().clone();
		let counters = *counters.lock().unwrap();
		let outcome = self.datastore.replace_run_tenders(run_id, &all_tenders)?;
		self.datastore.update_run_progress(
			run_id,
			counters.expected_total_tenders,
			counters.extracted_total_tenders,
			counters.skipped_existing_total,
		)?;
		self.datastore.finalize_run(run_id, RunStatus::Completed, None)?;
		self.checkpoints.clear(&portal_norm)?;

		let mut new_snapshot = HashMap::new();
		for d in &departments {
			new_snapshot.insert(d.name_norm(), d.tender_count);
		}
		self.dept_snapshots.save(&portal_norm, &new_snapshot)?;

		state = RunState::Completed;
		info!(
			"portal {} run {} completed: {} extracted, {} skipped, {} upserted ({} inserted / {} updated), {} invalid ids dropped",
			portal.name,
			run_id,
			counters.extracted_total_tenders,
			counters.skipped_existing_total,
			outcome.inserted + outcome.updated,
			outcome.inserted,
			outcome.updated,
			outcome.skipped_invalid,
		);
		self.events.publish(Event::RunCompleted { portal_name: portal.name.clone(), run_id });

		debug_assert_eq!(state, RunState::Completed);
		Ok(self.summary(run_id, portal, RunStatus::Completed, counters, outcome.skipped_invalid as i64, None))
	}

	fn select_departments(
		&self,
		departments: &[Department],
		previous_snapshot: &HashMap<String, Option<u64>>,
		scope_mode: ScopeMode,
		resumed: &Option<Checkpoint>,
	) -> Vec<Department> {
		let processed: HashSet<String> =
			resumed.as_ref().map(|c| c.processed_department_names_norm.clone()).unwrap_or_default();

		departments
			.iter()
			.filter(|d| !processed.contains(&d.name_norm()))
			.filter(|d| match scope_mode {
				ScopeMode::FullRescrape => true,
				ScopeMode::OnlyNew => {
					let key = d.name_norm();
					match previous_snapshot.get(&key) {
						Some(prev_count) => *prev_count != d.tender_count,
						None => true,
					}
				}
			})
			.cloned()
			.collect()
	}

	#[allow(clippy::too_many_arguments)]
	fn scrape(
		&self,
		portal: &Portal,
		skill: Arc<dyn Skill>,
		workers: usize,
		rate_limiter: Arc<RateLimiter>,
		skip_snapshot: Arc<crate::database::SkipSnapshot>,
		departments: &[Department],
		accumulator: Arc<Mutex<Vec<Tender>>>,
		processed_departments: Arc<Mutex<HashSet<String>>>,
		counters: Arc<Mutex<RunCounters>>,
	) -> PoolOutcome {
		let (tx, rx) = flume::unbounded::<Task>();
		for dept in departments {
			let _ = tx.send(Task { department: dept.clone() });
		}
		drop(tx);

		let pool = WorkerPool::spawn(
			workers.max(1),
			portal.clone(),
			skill,
			rate_limiter,
			Arc::clone(&self.events),
			self.config.department_row_ceiling,
			skip_snapshot,
			rx,
			move |result: DepartmentResult| {
				accumulator.lock().unwrap().extend(result.tenders.clone());
				processed_departments.lock().unwrap().insert(crate::normalize::norm_department_name(&result.department_name));
				let mut c = counters.lock().unwrap();
				c.expected_total_tenders += result.expected as i64;
				c.extracted_total_tenders += result.extracted as i64;
				c.skipped_existing_total += result.skipped_existing as i64;
				c.changed_closing_date_count += result.changed_closing_date as i64;
			},
		);
		if let Some(timeout) = self.config.run_timeout() {
			pool.cancel_after(timeout);
		}
		pool.join()
	}

	/// Turn a drained pool's outcome into the crate-wide fatal errors it implies
	/// (§4.5/§7): a deadline that fired becomes `Error::Cancelled`, every worker
	/// giving up permanently becomes `Error::WorkerPanicked`. Either way the Run row
	/// is finalized before the error propagates, so no run is left `running` forever.
	fn check_scrape_outcome(&self, outcome: &PoolOutcome, workers: usize, run_id: i64, portal: &Portal) -> Result<()> {
		if outcome.cancelled {
			self.datastore.finalize_run(run_id, RunStatus::Cancelled, Some("run exceeded configured timeout"))?;
			self.events.publish(Event::RunFailed {
				portal_name: portal.name.clone(),
				run_id,
				detail: "cancelled: run timeout exceeded".into(),
			});
			return Err(Error::Cancelled);
		}
		if outcome.retired >= workers.max(1) {
			self.datastore.finalize_run(run_id, RunStatus::Failed, Some("all workers panicked"))?;
			self.events.publish(Event::RunFailed {
				portal_name: portal.name.clone(),
				run_id,
				detail: "all workers panicked".into(),
			});
			return Err(Error::WorkerPanicked);
		}
		Ok(())
	}

	fn summary(
		&self,
		run_id: i64,
		portal: &Portal,
		status: RunStatus,
		counters: RunCounters,
		skipped_invalid_total: i64,
		error: Option<String>,
	) -> RunSummary {
		RunSummary {
			run_id,
			portal_name: portal.name.clone(),
			status,
			expected_total_tenders: counters.expected_total_tenders,
			extracted_total_tenders: counters.extracted_total_tenders,
			skipped_existing_total: counters.skipped_existing_total,
			changed_closing_date_count: counters.changed_closing_date_count,
			skipped_invalid_total,
			error_message: error,
		}
	}
}
