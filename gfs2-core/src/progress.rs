//! Progress signalling shared by long-running operations (layout, savemeta,
//! restoremeta). Kept separate from logging: a progress event is structured
//! data a CLI can render as a bar, not a human-readable line.

use std::time::{Duration, Instant};

/// A single progress sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
	pub done: u64,
	pub total: u64,
}

impl Progress {
	pub fn percent(&self) -> u64 {
		if self.total == 0 {
			100
		} else {
			self.done.saturating_mul(100) / self.total
		}
	}
}

/// Rate-limits progress callbacks to at most once per second, per spec.
///
/// `gfs2_core` operations accept an `Option<&mut dyn FnMut(Progress)>`
/// reporter; this type is the throttle a caller wraps around its own
/// closure, not something the core itself owns, so the core stays
/// single-threaded and free of hidden state.
pub struct Throttle {
	last: Option<Instant>,
	period: Duration,
}

impl Default for Throttle {
	fn default() -> Self {
		Self::new(Duration::from_secs(1))
	}
}

impl Throttle {
	pub fn new(period: Duration) -> Self {
		Self { last: None, period }
	}

	/// Returns true if a progress event should be emitted now, and resets
	/// the internal clock if so. Always fires for the very first call.
	pub fn ready(&mut self, now: Instant) -> bool {
		match self.last {
			Some(last) if now.duration_since(last) < self.period => false,
			_ => {
				self.last = Some(now);
				true
			}
		}
	}
}

/// A sink for progress events. Implemented for any `FnMut(Progress)` so
/// callers can pass a closure directly.
pub trait ProgressSink {
	fn report(&mut self, progress: Progress);
}

impl<F: FnMut(Progress)> ProgressSink for F {
	fn report(&mut self, progress: Progress) {
		(self)(progress)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn percent_zero_total_is_complete() {
		assert_eq!(Progress { done: 0, total: 0 }.percent(), 100);
	}

	#[test]
	fn percent_half() {
		assert_eq!(Progress { done: 5, total: 10 }.percent(), 50);
	}

	#[test]
	fn throttle_fires_once_per_period() {
		let mut t = Throttle::new(Duration::from_secs(1));
		let t0 = Instant::now();
		assert!(t.ready(t0));
		assert!(!t.ready(t0 + Duration::from_millis(500)));
		assert!(t.ready(t0 + Duration::from_millis(1100)));
	}
}
