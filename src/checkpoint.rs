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

//! Crash-recovery checkpoints (§4.6). A checkpoint is written to a temp file and
//! renamed into place so a reader never observes a partially-written file; loss on
//! crash is bounded to the interval between saves.

use log::warn;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::database::Datastore;
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::types::{Checkpoint, RunCounters, Tender};
use crate::util::create_dir;

pub struct CheckpointStore {
	dir: PathBuf,
}

impl CheckpointStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		let dir = dir.into();
		create_dir(&dir);
		CheckpointStore { dir }
	}

	fn path_for(&self, portal_name_norm: &str) -> PathBuf {
		self.dir.join(format!("{}.json", portal_name_norm))
	}

	/// Write `checkpoint` atomically: serialize to a sibling `.tmp` file, `fsync`-free
	/// rename over the final path. A reader can never see a half-written file.
	pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
		let final_path = self.path_for(&crate::normalize::norm_portal_name(&checkpoint.portal_name));
		let tmp_path = final_path.with_extension("json.tmp");
		let json = serde_json::to_vec_pretty(checkpoint)?;
		fs::write(&tmp_path, &json)?;
		fs::rename(&tmp_path, &final_path)?;
		Ok(())
	}

	/// Load a previously-saved checkpoint for a portal, if one exists.
	pub fn load(&self, portal_name_norm: &str) -> Result<Option<Checkpoint>> {
		let path = self.path_for(portal_name_norm);
		if !path.exists() {
			return Ok(None);
		}
		let text = fs::read_to_string(&path)?;
		let checkpoint: Checkpoint = serde_json::from_str(&text)?;
		Ok(Some(checkpoint))
	}

	/// Remove a portal's checkpoint once its run completes successfully. A stale
	/// checkpoint left behind would otherwise be replayed into the next run.
	pub fn clear(&self, portal_name_norm: &str) -> Result<()> {
		let path = self.path_for(portal_name_norm);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
	}

	pub fn exists(&self, portal_name_norm: &str) -> bool {
		self.path_for(portal_name_norm).exists()
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}
}

/// Snapshot of in-flight Run state the orchestrator hands the saver each tick. The
/// saver never mutates this; it only reads and persists.
pub struct RunAccumulator {
	pub portal_name: String,
	pub run_id: i64,
	pub tenders: Arc<Mutex<Vec<Tender>>>,
	pub processed_departments: Arc<Mutex<HashSet<String>>>,
	pub counters: Arc<Mutex<RunCounters>>,
}

/// Periodic background saver (C7, §4.6). Sleeps `interval` between flushes; on each
/// tick it snapshots the accumulator, writes it to disk atomically, upserts the same
/// tenders into the datastore, and updates the Run row's live counters. A failed tick
/// is logged and retried next tick — it never crashes the Run (§4.6 step 5).
pub struct CheckpointSaver {
	stop: Arc<AtomicBool>,
	handle: Option<JoinHandle<()>>,
}

impl CheckpointSaver {
	pub fn start(
		store: Arc<CheckpointStore>,
		datastore: Arc<dyn Datastore>,
		accumulator: Arc<RunAccumulator>,
		events: Arc<EventBus>,
		interval: Duration,
	) -> Self {
		let stop = Arc::new(AtomicBool::new(false));
		let stop_clone = Arc::clone(&stop);

		let handle = std::thread::spawn(move || {
			while !stop_clone.load(Ordering::Relaxed) {
				std::thread::sleep(interval);
				if stop_clone.load(Ordering::Relaxed) {
					break;
				}
				match tick(&store, datastore.as_ref(), &accumulator) {
					Ok(()) => events.publish(Event::CheckpointSaved {
						portal_name: accumulator.portal_name.clone(),
						run_id: accumulator.run_id,
					}),
					Err(e) => warn!("checkpoint tick failed for {}: {}", accumulator.portal_name, e),
				}
			}
		});

		CheckpointSaver { stop, handle: Some(handle) }
	}

	/// Signal the background thread to stop and block until it exits. The caller is
	/// still responsible for one final save/upsert on clean finalization — the saver
	/// only guarantees periodic ticks while running, not a flush-on-stop.
	pub fn stop_and_join(mut self) {
		self.stop.store(true, Ordering::Relaxed);
		if let Some(handle) = self.handle.take() {
			let _ = handle.join();
		}
	}
}

impl Drop for CheckpointSaver {
	fn drop(&mut self) {
		self.stop.store(true, Ordering::Relaxed);
	}
}

fn tick(store: &CheckpointStore, datastore: &dyn Datastore, accumulator: &RunAccumulator) -> Result<()> {
	let tenders = accumulator.tenders.lock().unwrap().clone();
	let processed = accumulator.processed_departments.lock().unwrap().clone();
	let counters = *accumulator.counters.lock().unwrap();

	let checkpoint = Checkpoint {
		portal_name: accumulator.portal_name.clone(),
		run_id: accumulator.run_id,
		saved_at_iso: chrono::Utc::now(),
		processed_department_names_norm: processed,
		all_tender_details: tenders.clone(),
		counters,
	};
	store.save(&checkpoint)?;

	datastore.replace_run_tenders(accumulator.run_id, &tenders)?;
	datastore.update_run_progress(
		accumulator.run_id,
		counters.expected_total_tenders,
		counters.extracted_total_tenders,
		counters.skipped_existing_total,
	)?;
	Ok(())
}
