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

//! Worker Pool (C5, §4.4). Each worker owns one Browser Session for the life of the
//! run, so this is deliberately not a `threadpool::ThreadPool::execute` per-task
//! model (that would hand a fresh task to whichever thread is free, with no session
//! affinity) — workers here are long-lived threads draining a shared FIFO queue,
//! matching the "one Session per worker, never shared" contract.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::browser::Session;
use crate::database::SkipSnapshot;
use crate::events::{Event, EventBus};
use crate::extraction::{DepartmentResult, ExtractionEngine};
use crate::ratelimit::RateLimiter;
use crate::skill::Skill;
use crate::types::{Department, Portal};

const MAX_RESTARTS: u8 = 2;

/// Minimum heartbeat cadence per active worker (§4.8): a consumer watching the Event
/// Bus treats a worker's absence for `stuck_timeout` (default 300s) as stuck, so a
/// gap this wide would never be mistaken for progress.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A single department task plus enough context for a worker to process it without
/// reaching back into orchestrator state (keeps workers decoupled, per §4.4).
pub struct Task {
	pub department: Department,
}

/// Outcome of draining a pool to completion (§4.4/§4.5): how many workers gave up
/// permanently, and whether the drain ended via cancellation rather than an empty
/// queue.
pub struct PoolOutcome {
	pub retired: usize,
	pub cancelled: bool,
}

pub struct WorkerPool {
	handles: Vec<JoinHandle<()>>,
	heartbeat_handles: Vec<JoinHandle<()>>,
	cancelled: Arc<AtomicBool>,
	retired: Arc<AtomicUsize>,
}

impl WorkerPool {
	/// Spawn `size` workers, each opening its own Session and draining `rx` until the
	/// queue is closed or `cancelled` is set. `on_result` is called from whichever
	/// worker thread completes a department; callers must make it `Send + Sync` and
	/// internally synchronized (the orchestrator passes a mutex-guarded accumulator).
	pub fn spawn<F>(
		size: usize,
		portal: Portal,
		skill: Arc<dyn Skill>,
		rate_limiter: Arc<RateLimiter>,
		events: Arc<EventBus>,
		department_row_ceiling: usize,
		skip_snapshot: Arc<SkipSnapshot>,
		rx: flume::Receiver<Task>,
		on_result: F,
	) -> WorkerPool
	where
		F: Fn(DepartmentResult) + Send + Sync + 'static,
	{
		let cancelled = Arc::new(AtomicBool::new(false));
		let retired = Arc::new(AtomicUsize::new(0));
		let on_result = Arc::new(on_result);
		let mut handles = Vec::with_capacity(size);
		let mut heartbeat_handles = Vec::with_capacity(size);

		for worker_id in 0..size {
			let portal = portal.clone();
			let skill = Arc::clone(&skill);
			let rate_limiter = Arc::clone(&rate_limiter);
			let events = Arc::clone(&events);
			let skip_snapshot = Arc::clone(&skip_snapshot);
			let rx = rx.clone();
			let cancelled = Arc::clone(&cancelled);
			let retired = Arc::clone(&retired);
			let on_result = Arc::clone(&on_result);

			let handle = std::thread::spawn(move || {
				run_worker(
					worker_id,
					&portal,
					skill.as_ref(),
					&rate_limiter,
					&events,
					department_row_ceiling,
					&skip_snapshot,
					&rx,
					&cancelled,
					&retired,
					on_result.as_ref(),
				)
			});
			handles.push(handle);

			let heartbeat_portal_name = portal.name.clone();
			let heartbeat_events = Arc::clone(&events);
			let heartbeat_cancelled = Arc::clone(&cancelled);
			heartbeat_handles.push(std::thread::spawn(move || {
				const POLL: Duration = Duration::from_millis(100);
				while !heartbeat_cancelled.load(Ordering::Relaxed) {
					let mut waited = Duration::from_secs(0);
					while waited < HEARTBEAT_INTERVAL {
						if heartbeat_cancelled.load(Ordering::Relaxed) {
							return;
						}
						std::thread::sleep(POLL);
						waited += POLL;
					}
					heartbeat_events.publish(Event::Heartbeat { portal_name: heartbeat_portal_name.clone(), worker_id });
				}
			}));
		}

		WorkerPool { handles, heartbeat_handles, cancelled, retired }
	}

	/// Broadcast cancellation (§4.4, §5): every worker finishes its in-flight tender
	/// or aborts at the next suspension point, returns its Session, and stops.
	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::Relaxed);
	}

	/// Arrange for `cancel()` to fire on its own after `timeout` (§4.5 "deadlines...
	/// are mapped to cancellation"), without blocking the caller. The returned handle
	/// is a detached timer; dropping it does not cancel the timeout.
	pub fn cancel_after(&self, timeout: Duration) {
		let cancelled = Arc::clone(&self.cancelled);
		std::thread::spawn(move || {
			std::thread::sleep(timeout);
			cancelled.store(true, Ordering::Relaxed);
		});
	}

	/// Block until every worker has drained the queue or been cancelled. Heartbeat
	/// tickers are cancelled alongside the workers so this never waits the full
	/// `HEARTBEAT_INTERVAL` on a portal that finished early.
	pub fn join(self) -> PoolOutcome {
		for handle in self.handles {
			let _ = handle.join();
		}
		let cancelled = self.cancelled.load(Ordering::Relaxed);
		self.cancelled.store(true, Ordering::Relaxed);
		for handle in self.heartbeat_handles {
			let _ = handle.join();
		}
		PoolOutcome { retired: self.retired.load(Ordering::Relaxed), cancelled }
	}
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
	worker_id: usize,
	portal: &Portal,
	skill: &dyn Skill,
	rate_limiter: &RateLimiter,
	events: &EventBus,
	department_row_ceiling: usize,
	skip_snapshot: &SkipSnapshot,
	rx: &flume::Receiver<Task>,
	cancelled: &AtomicBool,
	retired: &AtomicUsize,
	on_result: &(dyn Fn(DepartmentResult) + Send + Sync),
) {
	let mut restarts = 0u8;
	let mut session = match Session::open() {
		Ok(s) => s,
		Err(_) => return,
	};

	while let Ok(task) = rx.recv() {
		if cancelled.load(Ordering::Relaxed) {
			break;
		}
		if session.is_poisoned() {
			session = match Session::open() {
				Ok(s) => s,
				Err(_) => break,
			};
		}

		let engine = ExtractionEngine::new(skill, rate_limiter, events, department_row_ceiling);
		let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
			engine.run_department(&session, portal, &task.department, skip_snapshot, cancelled)
		}));

		match outcome {
			Ok(result) => on_result(result),
			Err(_) if restarts < MAX_RESTARTS => {
				restarts += 1;
				session.poison();
				events.publish(Event::WorkerCrashed {
					worker_id,
					department_name: task.department.name.clone(),
					attempt: restarts,
				});
				events.publish(Event::WorkerRestarted { worker_id });
			}
			Err(_) => {
				retired.fetch_add(1, Ordering::Relaxed);
				events.publish(Event::WorkerRetiredPermanently {
					worker_id,
					department_name: task.department.name.clone(),
				});
				break;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::database::SkipSnapshot;
	use crate::skill::nic::NicSkill;
	use crate::types::PortalCategory;
	use std::sync::Mutex;

	fn portal() -> Portal {
		Portal {
			name: "goa".into(),
			base_url: "https://example".into(),
			org_list_url: "https://example/orgs".into(),
			skill_id: "nic".into(),
			category: PortalCategory::State,
			rate_limit_rpm: 6000,
			cooldown_seconds: 0,
		}
	}

	#[test]
	fn empty_queue_lets_all_workers_exit_cleanly() {
		let (tx, rx) = flume::unbounded::<Task>();
		drop(tx);
		let results = Arc::new(Mutex::new(Vec::new()));
		let results_clone = Arc::clone(&results);
		let pool = WorkerPool::spawn(
			2,
			portal(),
			Arc::new(NicSkill::new()),
			Arc::new(RateLimiter::new(6000)),
			Arc::new(EventBus::new(100)),
			15_000,
			Arc::new(SkipSnapshot::new()),
			rx,
			move |r| results_clone.lock().unwrap().push(r),
		);
		let outcome = pool.join();
		assert!(results.lock().unwrap().is_empty());
		assert_eq!(outcome.retired, 0);
	}

	#[test]
	fn cancel_is_observable_before_join() {
		let (_tx, rx) = flume::unbounded::<Task>();
		let pool = WorkerPool::spawn(
			1,
			portal(),
			Arc::new(NicSkill::new()),
			Arc::new(RateLimiter::new(6000)),
			Arc::new(EventBus::new(100)),
			15_000,
			Arc::new(SkipSnapshot::new()),
			rx,
			|_| {},
		);
		pool.cancel();
		let outcome = pool.join();
		assert!(outcome.cancelled);
	}

	#[test]
	fn cancel_after_fires_the_timeout_on_its_own() {
		let (_tx, rx) = flume::unbounded::<Task>();
		let pool = WorkerPool::spawn(
			1,
			portal(),
			Arc::new(NicSkill::new()),
			Arc::new(RateLimiter::new(6000)),
			Arc::new(EventBus::new(100)),
			15_000,
			Arc::new(SkipSnapshot::new()),
			rx,
			|_| {},
		);
		pool.cancel_after(Duration::from_millis(10));
		std::thread::sleep(Duration::from_millis(100));
		let outcome = pool.join();
		assert!(outcome.cancelled);
	}
}
