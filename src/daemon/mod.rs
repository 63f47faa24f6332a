//! The process-wide daemon object (spec Section 4.L): the single struct
//! constructed once at startup that owns configuration, the kernel
//! transport, and the mount-thread/worker-pool lifecycle. Exists so tests
//! can drive a full `start`/`stop` cycle against a fake transport instead of
//! a real kernel handle, and so the dispatch core itself never reaches for a
//! module-level `static`/`LazyLock` singleton (spec Section 9, "Global
//! state").

use std::sync::{Arc, Mutex};

use zufs_core::{Config, Error, Result, error, info};
use zufs_dispatch::FsType;
use zufs_mount::MountThread;
use zufs_transport::{LinuxTransport, Transport};

/// The daemon's lifecycle: a single forward transition, never reused.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
	Init,
	Running,
	Stopped,
}

/// Owns the resolved configuration, the kernel transport, and the
/// mount-thread lifecycle. Constructed once per process.
pub struct Daemon {
	config: Config,
	transport: Arc<dyn Transport>,
	mount: MountThread,
	state: Mutex<State>,
}

impl Daemon {
	/// Builds a daemon against the real Linux kernel transport, rooted at
	/// `config.root_path`.
	#[must_use]
	pub fn new(config: Config, fs_types: Vec<Arc<dyn FsType>>) -> Self {
		let transport = Arc::new(LinuxTransport::new(config.root_path.clone()));
		Self::with_transport(config, transport, fs_types)
	}

	/// Builds a daemon against an injected transport, for tests that never
	/// touch a real kernel handle.
	#[must_use]
	pub fn with_transport(config: Config, transport: Arc<dyn Transport>, fs_types: Vec<Arc<dyn FsType>>) -> Self {
		Self {
			config,
			mount: MountThread::new(Arc::clone(&transport), fs_types),
			transport,
			state: Mutex::new(State::Init),
		}
	}

	#[must_use]
	pub fn config(&self) -> &Config { &self.config }

	#[must_use]
	pub fn transport(&self) -> &Arc<dyn Transport> { &self.transport }

	/// Applies the configured `mlock_mode`, starts the mount thread, and
	/// notifies the supervisor the daemon is ready. `Init -> Running`; any
	/// other starting state is a programming error.
	pub fn start(&self) -> Result<()> {
		let mut state = self.state.lock().expect("daemon state lock poisoned");
		if *state != State::Init {
			return Err(Error::AlreadyExists("daemon already started".into()));
		}

		if let Some(flags) = self.config.mlock_mode.flags() {
			if let Err(e) = nix::sys::mman::mlockall(flags) {
				error!("mlockall({:?}) failed: {e}", self.config.mlock_mode);
			}
		}

		self.mount.start()?;
		*state = State::Running;
		info!("daemon started");
		Ok(())
	}

	/// Stops the mount thread (which in turn stops the worker pool) and
	/// notifies the supervisor. `Running -> Stopped`; a no-op if the daemon
	/// was never started or is already stopped.
	pub fn stop(&self) {
		let mut state = self.state.lock().expect("daemon state lock poisoned");
		if *state != State::Running {
			return;
		}

		if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]) {
			error!("sd_notify STOPPING=1 failed: {e}");
		}

		self.mount.stop();
		*state = State::Stopped;
		info!("daemon stopped");
	}

	/// Whether the daemon is in the `Running` state; a shutdown-signal
	/// handler polls this.
	#[must_use]
	pub fn is_running(&self) -> bool { *self.state.lock().expect("daemon state lock poisoned") == State::Running }
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use zufs_core::Config;
	use zufs_transport::test_support::FakeTransport;

	use super::Daemon;

	#[test]
	fn starts_once_then_rejects_a_second_start() {
		let daemon = Daemon::with_transport(Config::default(), Arc::new(FakeTransport::default()), Vec::new());
		assert!(!daemon.is_running());

		daemon.start().unwrap();
		assert!(daemon.is_running());

		let err = daemon.start().unwrap_err();
		assert!(matches!(err, zufs_core::Error::AlreadyExists(_)));

		daemon.stop();
		assert!(!daemon.is_running());
	}

	#[test]
	fn stop_before_start_is_a_no_op() {
		let daemon = Daemon::with_transport(Config::default(), Arc::new(FakeTransport::default()), Vec::new());
		daemon.stop();
		assert!(!daemon.is_running());
	}
}
