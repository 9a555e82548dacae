use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A cancellation signal shared between a server and the background
/// workers it spawned. Cloning shares the same underlying flag.
///
/// Grounded on the ticker-plus-cancellation-flag shape of the teacher's
/// `runtime::exec` loop, reworked for real OS threads: instead of a
/// single-threaded poll loop checking an `AtomicBool` between iterations,
/// each worker blocks on a [`Condvar`] so cancellation wakes it
/// immediately instead of waiting out the rest of its tick.
#[derive(Clone)]
pub struct CancelToken {
	inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Default for CancelToken {
	fn default() -> Self {
		Self { inner: Arc::new((Mutex::new(false), Condvar::new())) }
	}
}

impl CancelToken {
	pub fn new() -> Self {
		Self::default()
	}

	/// Signals cancellation and wakes any worker currently sleeping.
	pub fn cancel(&self) {
		let (flag, cvar) = &*self.inner;
		*flag.lock().unwrap() = true;
		cvar.notify_all();
	}

	pub fn is_cancelled(&self) -> bool {
		*self.inner.0.lock().unwrap()
	}

	/// Sleeps for up to `d`, returning early (with `true`) if cancelled.
	/// Returns `false` if the full duration elapsed without cancellation.
	pub fn wait(&self, d: Duration) -> bool {
		let (flag, cvar) = &*self.inner;
		let guard = flag.lock().unwrap();

		if *guard {
			return true;
		}

		let (guard, timeout) = cvar.wait_timeout(guard, d).unwrap();
		!timeout.timed_out() || *guard
	}
}

/// Spawns a thread that calls `f` every `interval` until `cancel` fires.
/// `name` is used as the thread name for diagnostics (shows up in
/// panics and most process inspectors).
pub fn spawn_periodic<F>(name: &str, interval: Duration, cancel: CancelToken, mut f: F) -> JoinHandle<()>
where
	F: FnMut() + Send + 'static,
{
	thread::Builder::new()
		.name(name.to_owned())
		.spawn(move || {
			while !cancel.wait(interval) {
				f();
			}
		})
		.expect("failed to spawn background worker thread")
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	use super::*;

	#[test]
	fn stops_promptly_on_cancel() {
		let cancel = CancelToken::new();
		let ticks = Arc::new(AtomicUsize::new(0));

		let t = {
			let ticks = ticks.clone();
			spawn_periodic("test-worker", Duration::from_secs(60), cancel.clone(), move || {
				ticks.fetch_add(1, Ordering::SeqCst);
			})
		};

		// Give the thread a moment to enter its first wait, then cancel
		// immediately: since the interval is a minute, a slow test here
		// would indicate cancellation isn't waking the condvar.
		thread::sleep(Duration::from_millis(20));
		cancel.cancel();
		t.join().unwrap();
	}

	#[test]
	fn runs_on_each_tick() {
		let cancel = CancelToken::new();
		let ticks = Arc::new(AtomicUsize::new(0));

		let t = {
			let ticks = ticks.clone();
			let cancel2 = cancel.clone();
			spawn_periodic("test-worker", Duration::from_millis(5), cancel.clone(), move || {
				if ticks.fetch_add(1, Ordering::SeqCst) >= 2 {
					cancel2.cancel();
				}
			})
		};

		t.join().unwrap();
		assert!(ticks.load(Ordering::SeqCst) >= 3);
	}
}
