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

//! Per-portal token bucket rate limiter (§4.3, §5). One bucket per portal, shared by
//! every worker touching that portal, so total request rate is bounded regardless of
//! how many workers are assigned to it.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
	tokens: f64,
	capacity: f64,
	refill_per_sec: f64,
	last_refill: Instant,
}

impl Bucket {
	fn refill(&mut self) {
		let now = Instant::now();
		let elapsed = now.duration_since(self.last_refill).as_secs_f64();
		self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
		self.last_refill = now;
	}
}

/// A token bucket limiting requests to `rpm` per minute, with full burst capacity
/// available up front (teacher pattern: cheap, lock-guarded shared state, no
/// background ticker thread).
pub struct RateLimiter {
	bucket: Mutex<Bucket>,
}

impl RateLimiter {
	pub fn new(rpm: u32) -> Self {
		let rpm = rpm.max(1) as f64;
		RateLimiter {
			bucket: Mutex::new(Bucket {
				tokens: rpm,
				capacity: rpm,
				refill_per_sec: rpm / 60.0,
				last_refill: Instant::now(),
			}),
		}
	}

	/// Blocks the calling worker thread until a token is available, returning how long
	/// it waited. Workers call this immediately before every portal HTTP request.
	pub fn acquire(&self) -> Duration {
		let start = Instant::now();
		loop {
			let wait = {
				let mut bucket = self.bucket.lock();
				bucket.refill();
				if bucket.tokens >= 1.0 {
					bucket.tokens -= 1.0;
					None
				} else {
					let deficit = 1.0 - bucket.tokens;
					Some(Duration::from_secs_f64((deficit / bucket.refill_per_sec).max(0.01)))
				}
			};
			match wait {
				None => return start.elapsed(),
				Some(d) => std::thread::sleep(d),
			}
		}
	}

	/// Non-blocking check, for tests and diagnostics.
	pub fn available_tokens(&self) -> f64 {
		let mut bucket = self.bucket.lock();
		bucket.refill();
		bucket.tokens
	}
}
