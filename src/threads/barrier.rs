//! A one-shot countdown latch used for worker-pool startup readiness.

use std::sync::{Condvar, Mutex};

/// Arm with the expected number of [`Barrier::release`] calls, then
/// [`Barrier::wait`] until they've all landed. Not reusable without calling
/// [`Barrier::init`] first.
#[derive(Default)]
pub struct Barrier {
	state: Mutex<usize>,
	condvar: Condvar,
}

impl Barrier {
	#[must_use]
	pub fn new() -> Self { Self::default() }

	/// Resets the latch to its un-armed state (count zero).
	pub fn init(&self) { *self.state.lock().expect("barrier lock poisoned") = 0; }

	/// Sets the count to `n`. Call once per startup, before any
	/// [`Barrier::release`].
	pub fn arm(&self, n: usize) { *self.state.lock().expect("barrier lock poisoned") = n; }

	/// Decrements the count; wakes waiters once it reaches zero.
	pub fn release(&self) {
		let mut count = self.state.lock().expect("barrier lock poisoned");
		*count = count.saturating_sub(1);
		if *count == 0 {
			self.condvar.notify_all();
		}
	}

	/// Blocks until the count reaches zero.
	pub fn wait(&self) {
		let mut count = self.state.lock().expect("barrier lock poisoned");
		while *count != 0 {
			count = self.condvar.wait(count).expect("barrier lock poisoned");
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::Barrier;

	#[test]
	fn wait_returns_once_count_reaches_zero() {
		let barrier = Arc::new(Barrier::new());
		barrier.arm(3);

		let mut joins = Vec::new();
		for _ in 0..3 {
			let barrier = Arc::clone(&barrier);
			joins.push(std::thread::spawn(move || barrier.release()));
		}

		barrier.wait();
		for j in joins {
			j.join().unwrap();
		}
	}

	#[test]
	fn init_resets_to_unarmed() {
		let barrier = Barrier::new();
		barrier.arm(1);
		barrier.init();
		barrier.arm(0);
		barrier.wait();
	}
}
