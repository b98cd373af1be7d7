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

//! Non-blocking, bounded Event Bus (§4.4). Workers publish without ever waiting on a
//! slow consumer; a full bus drops its oldest entry rather than applying backpressure
//! to the worker pool.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
	RunStarted { portal_name: String, run_id: i64 },
	DepartmentStarted { portal_name: String, department_name: String },
	DepartmentCompleted { portal_name: String, department_name: String, tender_count: usize },
	DepartmentFailed { portal_name: String, department_name: String, detail: String, retryable: bool },
	TenderExtracted { portal_name: String, tender_id_norm: String },
	TenderSkippedUnchanged { portal_name: String, tender_id_norm: String },
	TenderClosingDateChanged { portal_name: String, tender_id_norm: String },
	WorkerCrashed { worker_id: usize, department_name: String, attempt: u8 },
	WorkerRestarted { worker_id: usize },
	WorkerRetiredPermanently { worker_id: usize, department_name: String },
	CheckpointSaved { portal_name: String, run_id: i64 },
	RunCompleted { portal_name: String, run_id: i64 },
	RunFailed { portal_name: String, run_id: i64, detail: String },
	RateLimited { portal_name: String, waited_ms: u64 },
	Heartbeat { portal_name: String, worker_id: usize },
}

struct Inner {
	buf: VecDeque<(u64, Event)>,
	dropped: u64,
	next_seq: u64,
}

/// A bounded ring buffer behind a mutex. Publish never blocks the caller beyond the
/// lock itself; when full, the oldest event is evicted to make room (§4.4 invariant:
/// publishers never wait on a slow subscriber).
pub struct EventBus {
	inner: Mutex<Inner>,
	capacity: usize,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		EventBus {
			inner: Mutex::new(Inner { buf: VecDeque::with_capacity(capacity), dropped: 0, next_seq: 0 }),
			capacity: capacity.max(1),
		}
	}

	pub fn publish(&self, event: Event) {
		let mut inner = self.inner.lock();
		if inner.buf.len() >= self.capacity {
			inner.buf.pop_front();
			inner.dropped += 1;
		}
		let seq = inner.next_seq;
		inner.next_seq += 1;
		inner.buf.push_back((seq, event));
	}

	/// Drain everything currently buffered, oldest first.
	pub fn drain(&self) -> Vec<Event> {
		let mut inner = self.inner.lock();
		inner.buf.drain(..).map(|(_, e)| e).collect()
	}

	pub fn dropped_count(&self) -> u64 {
		self.inner.lock().dropped
	}

	pub fn len(&self) -> usize {
		self.inner.lock().buf.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Monotonic-ish wall clock millis, used only for event bus diagnostics/backoff jitter
/// seeding (never for closing-date comparisons, which go through `util::now_ist`).
pub fn now_millis() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::from_secs(0)).as_millis() as u64
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn publish_and_drain_preserves_order() {
		let bus = EventBus::new(10);
		bus.publish(Event::RunStarted { portal_name: "x".into(), run_id: 1 });
		bus.publish(Event::RunCompleted { portal_name: "x".into(), run_id: 1 });
		let drained = bus.drain();
		assert_eq!(drained.len(), 2);
		assert!(matches!(drained[0], Event::RunStarted { .. }));
		assert!(bus.is_empty());
	}

	#[test]
	fn full_bus_drops_oldest_not_newest() {
		let bus = EventBus::new(2);
		bus.publish(Event::CheckpointSaved { portal_name: "a".into(), run_id: 1 });
		bus.publish(Event::CheckpointSaved { portal_name: "b".into(), run_id: 2 });
		bus.publish(Event::CheckpointSaved { portal_name: "c".into(), run_id: 3 });
		assert_eq!(bus.dropped_count(), 1);
		let drained = bus.drain();
		assert_eq!(drained.len(), 2);
		match &drained[0] {
			Event::CheckpointSaved { portal_name, .. } => assert_eq!(portal_name, "b"),
			_ => panic!("wrong event"),
		}
	}
}
