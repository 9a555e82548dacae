use std::sync::Mutex;
use std::time::SystemTime;

/// Abstracts over wall-clock time so TTL/lease expiry logic can be driven
/// by a fake clock in tests instead of racing real time.
pub trait Clock: Send + Sync {
	fn now(&self) -> SystemTime;
}

/// The production clock: delegates straight to [`SystemTime::now`].
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> SystemTime {
		SystemTime::now()
	}
}

/// A clock that only moves when told to. Used by tests that need to
/// observe "not yet expired" and "expired" without sleeping.
pub struct FixedClock {
	now: Mutex<SystemTime>,
}

impl FixedClock {
	pub fn new(now: SystemTime) -> Self {
		Self { now: Mutex::new(now) }
	}

	pub fn set(&self, now: SystemTime) {
		*self.now.lock().unwrap() = now;
	}

	pub fn advance(&self, by: std::time::Duration) {
		let mut now = self.now.lock().unwrap();
		*now += by;
	}
}

impl Clock for FixedClock {
	fn now(&self) -> SystemTime {
		*self.now.lock().unwrap()
	}
}
