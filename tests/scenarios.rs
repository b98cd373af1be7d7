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

//! End-to-end portal runs against `FakeDatastore` and an in-process `Skill` double.
//! No Postgres, no network: these exercise the orchestrator's state machine and
//! delta logic the same way a live run would drive them.

use std::convert::TryFrom;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tender_archive::browser::Session;
use tender_archive::config::{Config, RawConfig};
use tender_archive::database::{Datastore, FakeDatastore};
use tender_archive::error::ExtractError;
use tender_archive::events::EventBus;
use tender_archive::orchestrator::Orchestrator;
use tender_archive::skill::{FastChangeSignal, Skill, SkillRegistry};
use tender_archive::types::{Department, LifecycleStatus, Portal, PortalCategory, RunStatus, ScopeMode, Tender};

fn test_config() -> Config {
	let tmp = tempfile::tempdir().unwrap();
	let mut raw = RawConfig::default();
	raw.database_url = Some("postgres://unused".into());
	raw.data_dir = Some(tmp.path().to_path_buf());
	raw.final_sweep_cap = 50;
	std::mem::forget(tmp);
	TryFrom::try_from(raw).unwrap()
}

fn portal(name: &str) -> Portal {
	Portal {
		name: name.to_string(),
		base_url: "https://example.test".into(),
		org_list_url: "https://example.test/orgs".into(),
		skill_id: "fake".into(),
		category: PortalCategory::State,
		rate_limit_rpm: 6_000,
		cooldown_seconds: 0,
	}
}

fn tender(portal_name: &str, id: &str, dept: &str, closing: &str) -> Tender {
	Tender {
		portal_name: portal_name.into(),
		tender_id_raw: id.into(),
		tender_id_extracted: id.into(),
		department_name: dept.into(),
		title_ref: format!("Work under {}", dept),
		organisation_chain: dept.into(),
		published_at_text: "01-Jan-2026 10:00 AM".into(),
		closing_at_text: closing.into(),
		opening_at_text: "02-Jan-2026 10:00 AM".into(),
		closing_at_ist: None,
		emd_amount_text: "".into(),
		emd_amount_numeric: None,
		tender_value_text: "".into(),
		tender_value_numeric: None,
		location: "".into(),
		contract_type: "".into(),
		inviting_officer: "".into(),
		work_description: "".into(),
		direct_url: "https://example.test/tender".into(),
		status_url: "https://example.test/status".into(),
		lifecycle_status: LifecycleStatus::Active,
		raw_json: serde_json::json!({}),
	}
}

/// A department's current row set, swappable between runs so a test can simulate
/// closing-date changes or newly-appeared invalid rows without a second type.
#[derive(Clone)]
struct FixtureDepartment {
	dept: Department,
	tenders: Vec<Tender>,
}

/// Drives the orchestrator against a fixed in-memory department/tender fixture.
/// `call_count` lets a test assert how many times the list was fetched (S5/S6
/// rely on this to confirm resume skips already-processed departments).
struct FixtureSkill {
	departments: Mutex<Vec<FixtureDepartment>>,
	list_calls: AtomicUsize,
}

impl FixtureSkill {
	fn new(fixtures: Vec<FixtureDepartment>) -> Self {
		FixtureSkill { departments: Mutex::new(fixtures), list_calls: AtomicUsize::new(0) }
	}
}

impl Skill for FixtureSkill {
	fn list_departments(&self, _session: &Session, _org_list_url: &str) -> Result<Vec<Department>, ExtractError> {
		self.list_calls.fetch_add(1, Ordering::SeqCst);
		Ok(self.departments.lock().unwrap().iter().map(|f| f.dept.clone()).collect())
	}

	fn open_department(&self, _session: &Session, _base_url: &str, dept: &Department) -> Result<Option<String>, ExtractError> {
		Ok(Some(format!("https://example.test/dept/{}", dept.name_norm())))
	}

	fn extract_tender_ids(&self, _session: &Session, list_url: &str) -> Result<Vec<String>, ExtractError> {
		let fixtures = self.departments.lock().unwrap();
		let found = fixtures.iter().find(|f| list_url.ends_with(&f.dept.name_norm()));
		Ok(found.map(|f| f.tenders.iter().map(|t| t.tender_id_raw.clone()).collect()).unwrap_or_default())
	}

	fn extract_tender_details(&self, _session: &Session, _base_url: &str, tender_id: &str) -> Result<Option<Tender>, ExtractError> {
		let fixtures = self.departments.lock().unwrap();
		for f in fixtures.iter() {
			if let Some(t) = f.tenders.iter().find(|t| t.tender_id_raw == tender_id) {
				return Ok(Some(t.clone()));
			}
		}
		Ok(None)
	}

	fn detect_fast_change(&self, _session: &Session, _org_list_url: &str) -> FastChangeSignal {
		FastChangeSignal::Unknown
	}
}

fn registry_with(skill: Arc<FixtureSkill>) -> SkillRegistry {
	let mut registry = SkillRegistry::new();
	registry.register("fake", skill);
	registry
}

fn pwd_department(count: u64) -> Department {
	Department { serial_no: "1".into(), name: "PWD".into(), tender_count_text: count.to_string(), tender_count: Some(count), direct_url: Some("/pwd".into()) }
}

#[test]
fn s1_first_run_inserts_every_tender() {
	let config = test_config();
	let ds: Arc<dyn Datastore> = Arc::new(FakeDatastore::new());
	let events = Arc::new(EventBus::new(256));
	let fixtures = vec![FixtureDepartment {
		dept: pwd_department(3),
		tenders: vec![
			tender("hp", "2026_PWD_1", "PWD", "20-Feb-2026 10:00 AM"),
			tender("hp", "2026_PWD_2", "PWD", "20-Feb-2026 10:00 AM"),
			tender("hp", "2026_PWD_3", "PWD", "20-Feb-2026 10:00 AM"),
		],
	}];
	let skill = Arc::new(FixtureSkill::new(fixtures));
	let registry = registry_with(Arc::clone(&skill));
	let orch = Orchestrator::new(&config, Arc::clone(&ds), events, &registry);

	let summary = orch.run(&portal("hp"), ScopeMode::OnlyNew, 1).unwrap();

	assert_eq!(summary.status, RunStatus::Completed);
	assert_eq!(summary.extracted_total_tenders, 3);
	assert_eq!(summary.skipped_existing_total, 0);
	assert_eq!(ds.tender_count(), 3);
	assert!(!config.checkpoint_dir().join("hp.json").exists());
}

#[test]
fn s2_second_run_with_no_changes_skips_everything() {
	let config = test_config();
	let ds: Arc<dyn Datastore> = Arc::new(FakeDatastore::new());
	let events = Arc::new(EventBus::new(256));
	let fixtures = vec![FixtureDepartment {
		dept: pwd_department(3),
		tenders: vec![
			tender("hp", "2026_PWD_1", "PWD", "20-Feb-2026 10:00 AM"),
			tender("hp", "2026_PWD_2", "PWD", "20-Feb-2026 10:00 AM"),
			tender("hp", "2026_PWD_3", "PWD", "20-Feb-2026 10:00 AM"),
		],
	}];
	let skill = Arc::new(FixtureSkill::new(fixtures));
	let registry = registry_with(Arc::clone(&skill));

	let first = Orchestrator::new(&config, Arc::clone(&ds), Arc::clone(&events), &registry);
	first.run(&portal("hp"), ScopeMode::OnlyNew, 1).unwrap();

	let second = Orchestrator::new(&config, Arc::clone(&ds), events, &registry);
	let summary = second.run(&portal("hp"), ScopeMode::OnlyNew, 1).unwrap();

	assert_eq!(summary.extracted_total_tenders, 0);
	assert_eq!(summary.skipped_existing_total, 3);
	assert_eq!(summary.changed_closing_date_count, 0);
	assert_eq!(ds.tender_count(), 3);
}

#[test]
fn s3_extended_closing_date_is_reextracted_once() {
	let config = test_config();
	let ds: Arc<dyn Datastore> = Arc::new(FakeDatastore::new());
	let events = Arc::new(EventBus::new(256));

	let first_fixtures = vec![FixtureDepartment {
		dept: pwd_department(3),
		tenders: vec![
			tender("hp", "2026_PWD_1", "PWD", "20-Feb-2026 10:00 AM"),
			tender("hp", "2026_PWD_2", "PWD", "20-Feb-2026 10:00 AM"),
			tender("hp", "2026_PWD_3", "PWD", "20-Feb-2026 10:00 AM"),
		],
	}];
	let first_skill = Arc::new(FixtureSkill::new(first_fixtures));
	let first_registry = registry_with(Arc::clone(&first_skill));
	let first = Orchestrator::new(&config, Arc::clone(&ds), Arc::clone(&events), &first_registry);
	first.run(&portal("hp"), ScopeMode::OnlyNew, 1).unwrap();

	let second_fixtures = vec![FixtureDepartment {
		dept: pwd_department(3),
		tenders: vec![
			tender("hp", "2026_PWD_1", "PWD", "20-Feb-2026 10:00 AM"),
			tender("hp", "2026_PWD_2", "PWD", "25-Feb-2026 10:00 AM"),
			tender("hp", "2026_PWD_3", "PWD", "20-Feb-2026 10:00 AM"),
		],
	}];
	let second_skill = Arc::new(FixtureSkill::new(second_fixtures.clone()));
	let second_registry = registry_with(Arc::clone(&second_skill));
	let second = Orchestrator::new(&config, Arc::clone(&ds), Arc::clone(&events), &second_registry);
	let summary = second.run(&portal("hp"), ScopeMode::OnlyNew, 1).unwrap();

	assert_eq!(summary.skipped_existing_total, 2);
	assert_eq!(summary.changed_closing_date_count, 1);
	assert_eq!(ds.tender_count(), 3);

	let third_skill = Arc::new(FixtureSkill::new(second_fixtures));
	let third_registry = registry_with(Arc::clone(&third_skill));
	let third = Orchestrator::new(&config, Arc::clone(&ds), events, &third_registry);
	let summary = third.run(&portal("hp"), ScopeMode::OnlyNew, 1).unwrap();

	assert_eq!(summary.skipped_existing_total, 3);
	assert_eq!(summary.changed_closing_date_count, 0);
}

#[test]
fn s4_invalid_tender_id_is_dropped_not_errored() {
	let config = test_config();
	let ds: Arc<dyn Datastore> = Arc::new(FakeDatastore::new());
	let events = Arc::new(EventBus::new(256));
	let fixtures = vec![FixtureDepartment {
		dept: pwd_department(4),
		tenders: vec![
			tender("hp", "2026_PWD_1", "PWD", "20-Feb-2026 10:00 AM"),
			tender("hp", "2026_PWD_2", "PWD", "20-Feb-2026 10:00 AM"),
			tender("hp", "2026_PWD_3", "PWD", "20-Feb-2026 10:00 AM"),
			tender("hp", "-", "PWD", "20-Feb-2026 10:00 AM"),
		],
	}];
	let skill = Arc::new(FixtureSkill::new(fixtures));
	let registry = registry_with(Arc::clone(&skill));
	let orch = Orchestrator::new(&config, Arc::clone(&ds), events, &registry);

	let summary = orch.run(&portal("hp"), ScopeMode::OnlyNew, 1).unwrap();

	assert_eq!(summary.status, RunStatus::Completed);
	assert_eq!(summary.skipped_invalid_total, 1);
	assert_eq!(ds.tender_count(), 3);
}

#[test]
fn s5_resume_skips_already_processed_departments() {
	let config = test_config();
	let ds: Arc<dyn Datastore> = Arc::new(FakeDatastore::new());
	let events = Arc::new(EventBus::new(256));

	let mut fixtures = Vec::new();
	for n in 0..10 {
		let dept_name = format!("dept{}", n);
		fixtures.push(FixtureDepartment {
			dept: Department { serial_no: n.to_string(), name: dept_name.clone(), tender_count_text: "1".into(), tender_count: Some(1), direct_url: Some(format!("/{}", dept_name)) },
			tenders: vec![tender("hp", &format!("2026_{}_1", dept_name), &dept_name, "20-Feb-2026 10:00 AM")],
		});
	}

	// Simulate a crash after 6 of the 10 departments were flushed: write a
	// checkpoint directly, the same shape the background saver would have
	// produced, instead of killing a real process mid-run.
	let processed: std::collections::HashSet<String> = fixtures[..6].iter().map(|f| f.dept.name_norm()).collect();
	let already_extracted: Vec<Tender> = fixtures[..6].iter().flat_map(|f| f.tenders.clone()).collect();
	ds.replace_run_tenders(1, &already_extracted).unwrap();

	let checkpoints = tender_archive::checkpoint::CheckpointStore::new(config.checkpoint_dir());
	let mut checkpoint = tender_archive::types::Checkpoint::new("hp", 1);
	checkpoint.processed_department_names_norm = processed;
	checkpoint.all_tender_details = already_extracted;
	checkpoints.save(&checkpoint).unwrap();

	let skill = Arc::new(FixtureSkill::new(fixtures));
	let registry = registry_with(Arc::clone(&skill));
	let orch = Orchestrator::new(&config, Arc::clone(&ds), events, &registry);
	let summary = orch.run(&portal("hp"), ScopeMode::OnlyNew, 2).unwrap();

	assert_eq!(summary.status, RunStatus::Completed);
	assert_eq!(ds.tender_count(), 10);
	assert!(!config.checkpoint_dir().join("hp.json").exists());
}

#[test]
fn s6_oversized_department_is_skipped_and_run_still_completes() {
	let mut config = test_config();
	config.department_row_ceiling = 15_000;
	let ds: Arc<dyn Datastore> = Arc::new(FakeDatastore::new());
	let events = Arc::new(EventBus::new(256));

	let oversized_tenders: Vec<Tender> =
		(0..16_000).map(|i| tender("hp", &format!("2026_BIG_{}", i), "Big Dept", "20-Feb-2026 10:00 AM")).collect();
	let small_tenders = vec![tender("hp", "2026_PWD_1", "PWD", "20-Feb-2026 10:00 AM")];

	let fixtures = vec![
		FixtureDepartment {
			dept: Department { serial_no: "1".into(), name: "Big Dept".into(), tender_count_text: "16000".into(), tender_count: Some(16_000), direct_url: Some("/big".into()) },
			tenders: oversized_tenders,
		},
		FixtureDepartment { dept: pwd_department(1), tenders: small_tenders },
	];
	let skill = Arc::new(FixtureSkill::new(fixtures));
	let registry = registry_with(Arc::clone(&skill));
	let orch = Orchestrator::new(&config, Arc::clone(&ds), events, &registry);

	let summary = orch.run(&portal("hp"), ScopeMode::OnlyNew, 2).unwrap();

	assert_eq!(summary.status, RunStatus::Completed);
	assert_eq!(summary.extracted_total_tenders, 1);
	assert_eq!(ds.tender_count(), 1);
}
