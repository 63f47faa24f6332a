//! Shutdown-signal handling for the `zufsd` binary. Blocks `SIGINT`/`SIGTERM`
//! on the main thread before the daemon spawns any workers, so every spawned
//! thread inherits the mask and only this thread ever observes the signal —
//! matching spec Section 5's note that process signals must never strand a
//! worker mid-wait.

use nix::sys::signal::{SigSet, Signal};
use zufs_core::{Error, Result};

/// Blocks `SIGINT` and `SIGTERM` on the calling thread and returns the set so
/// [`wait_for_one`] can later consume one of them via `sigwait`.
pub fn block_shutdown_signals() -> Result<SigSet> {
	let mut set = SigSet::empty();
	set.add(Signal::SIGINT);
	set.add(Signal::SIGTERM);
	set.thread_block()?;
	Ok(set)
}

/// Blocks until one of the signals in `set` arrives, then returns.
pub fn wait_for_one(set: &SigSet) -> Result<()> {
	set.wait().map_err(Error::from)?;
	Ok(())
}
