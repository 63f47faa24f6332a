//! Per-worker thread context and the factory that creates worker threads
//! with a chosen scheduling policy and CPU affinity.

use std::{
	cell::RefCell,
	ffi::c_void,
	sync::{
		Arc,
		atomic::{AtomicI32, AtomicPtr, Ordering},
	},
	thread::JoinHandle,
};

use zufs_core::{Error, Result, error, warn};
use zufs_topology::Topology;

/// Which CPU set a thread should be pinned to.
#[derive(Clone, Copy, Debug, Default)]
pub enum Pin {
	/// No affinity is applied; the thread may run on any CPU.
	#[default]
	None,
	Cpu(usize),
	Node(usize),
}

/// A scheduling policy recognized by the worker factory. Only meaningful
/// together with a non-zero `priority`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SchedPolicy {
	#[default]
	Default,
	RoundRobin,
	Fifo,
}

/// Configuration passed to [`create`] describing how to set up a new worker
/// thread.
#[derive(Clone, Debug, Default)]
pub struct ThreadParams {
	pub policy: SchedPolicy,
	pub priority: i32,
	pub pin: Pin,
	pub name: String,
}

impl ThreadParams {
	#[must_use]
	pub fn named(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Self::default()
		}
	}

	#[must_use]
	pub fn pinned_to_cpu(mut self, cpu: usize) -> Self {
		self.pin = Pin::Cpu(cpu);
		self
	}

	#[must_use]
	pub fn pinned_to_node(mut self, node: usize) -> Self {
		self.pin = Pin::Node(node);
		self
	}
}

/// Distinguishes which kind of worker owns a [`ThreadContext`]; the
/// composition-based replacement for pointer-arithmetic `container_of`
/// downcasts, used by the Zu-Thread layer to assert it is not running on the
/// mount thread.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerKind {
	/// The singleton mount thread, or a thread that called
	/// [`thread_current_init`] to announce itself without being spawned by
	/// this factory.
	Foreign,
	/// A Zu-Thread created by the worker pool.
	Zu,
}

struct Inner {
	one_cpu: Option<usize>,
	nid: Option<usize>,
	kind: WorkerKind,
	private: AtomicPtr<c_void>,
	last_err: AtomicI32,
}

/// A cheaply-cloneable handle to a worker's thread-local record. The only
/// writer of the thread-local slot is the factory's spawn trampoline; every
/// other reader goes through [`current`].
#[derive(Clone)]
pub struct ThreadContext(Arc<Inner>);

impl ThreadContext {
	fn new(pin: Pin, kind: WorkerKind) -> Self {
		let (one_cpu, nid) = match pin {
			Pin::None => (None, None),
			Pin::Cpu(cpu) => (Some(cpu), None),
			Pin::Node(node) => (None, Some(node)),
		};

		Self(Arc::new(Inner {
			one_cpu,
			nid,
			kind,
			private: AtomicPtr::new(std::ptr::null_mut()),
			last_err: AtomicI32::new(0),
		}))
	}

	#[must_use]
	pub fn kind(&self) -> WorkerKind { self.0.kind }

	#[must_use]
	pub fn one_cpu(&self) -> Option<usize> { self.0.one_cpu }

	#[must_use]
	pub fn nid(&self) -> Option<usize> { self.0.nid }

	#[must_use]
	pub fn last_err(&self) -> i32 { self.0.last_err.load(Ordering::Acquire) }

	pub fn set_last_err(&self, err: i32) { self.0.last_err.store(err, Ordering::Release); }

	/// Access to the worker-owned opaque slot. The core never reads or
	/// frees whatever is stored here.
	#[must_use]
	pub fn private_get(&self) -> *mut c_void { self.0.private.load(Ordering::Acquire) }

	pub fn private_set(&self, value: *mut c_void) { self.0.private.store(value, Ordering::Release); }

	fn new_foreign(cpu: usize, nid: usize) -> Self {
		Self(Arc::new(Inner {
			one_cpu: Some(cpu),
			nid: Some(nid),
			kind: WorkerKind::Foreign,
			private: AtomicPtr::new(std::ptr::null_mut()),
			last_err: AtomicI32::new(0),
		}))
	}
}

thread_local! {
	static CURRENT: RefCell<Option<ThreadContext>> = const { RefCell::new(None) };
}

/// Returns this thread's context, if one has been installed by the factory's
/// trampoline or by [`thread_current_init`].
#[must_use]
pub fn current() -> Option<ThreadContext> { CURRENT.with_borrow(Clone::clone) }

/// Installs a minimal context for a thread that was not created through
/// [`create`] (the main/mount thread). Fails with [`Error::AlreadyExists`]
/// if a context is already installed.
pub fn thread_current_init(topology: &Topology) -> Result<()> {
	if current().is_some() {
		return Err(Error::AlreadyExists("thread context already installed".into()));
	}

	let cpu = getcpu(false)?;
	let nid = topology.cpu_to_node(cpu);
	let ctx = ThreadContext::new_foreign(cpu, nid);
	CURRENT.with_borrow_mut(|slot| *slot = Some(ctx));
	Ok(())
}

/// Removes the context installed by [`thread_current_init`]. A no-op if none
/// is present.
pub fn thread_current_fini() { CURRENT.with_borrow_mut(|slot| *slot = None); }

/// The pinned cpu for the current thread's context, falling back to the
/// platform's current-cpu query if no context is installed or the thread is
/// pinned to "all cpus". `warn` logs when that fallback is taken.
pub fn current_cpu(warn: bool) -> Result<usize> {
	match current().and_then(|ctx| ctx.one_cpu()) {
		Some(cpu) => Ok(cpu),
		None => getcpu(warn),
	}
}

fn getcpu(warn: bool) -> Result<usize> {
	if warn {
		warn!("current_cpu: no pinned context, falling back to sched_getcpu()");
	}
	// SAFETY: sched_getcpu has no preconditions; it returns -1 on failure
	// with errno set.
	let ret = unsafe { libc::sched_getcpu() };
	if ret < 0 {
		return Err(Error::Io(std::io::Error::last_os_error()));
	}
	Ok(ret as usize)
}

#[must_use]
pub fn current_nid() -> Option<usize> { current().and_then(|ctx| ctx.nid()) }

#[must_use]
pub fn current_one_cpu() -> Option<usize> { current().and_then(|ctx| ctx.one_cpu()) }

/// An opaque token identifying the current thread's context, for callers
/// that just need to compare identity.
#[must_use]
pub fn thread_self() -> Option<ThreadContext> { current() }

/// A thread spawned by [`create`], joined explicitly by its owner (the
/// worker pool, or `thread_current_fini` equivalents for foreign threads).
pub struct SpawnedThread {
	pub context: ThreadContext,
	join: Option<JoinHandle<()>>,
}

impl SpawnedThread {
	pub fn join(mut self) -> Result<()> {
		match self.join.take().expect("joined twice").join() {
			Ok(()) => Ok(()),
			Err(panic) => Err(Error::Resource(format!("worker thread panicked: {panic:?}"))),
		}
	}
}

/// Creates a thread running `f`, with `params` applied as: explicit
/// scheduling inheritance, the requested policy/priority when non-default,
/// and CPU-set affinity derived from `params.pin`. `f` receives its own
/// [`ThreadContext`], already installed in the thread-local slot before it
/// runs.
pub fn create<F>(params: ThreadParams, kind: WorkerKind, f: F) -> Result<SpawnedThread>
where
	F: FnOnce(&ThreadContext) + Send + 'static,
{
	let ctx = ThreadContext::new(params.pin, kind);
	let trampoline_ctx = ctx.clone();
	let name = params.name.clone();

	let builder = std::thread::Builder::new().name(name.clone());
	let join = builder
		.spawn(move || {
			CURRENT.with_borrow_mut(|slot| *slot = Some(trampoline_ctx.clone()));

			apply_affinity(&trampoline_ctx, &params);
			apply_scheduling(&trampoline_ctx, &params);

			f(&trampoline_ctx);

			CURRENT.with_borrow_mut(|slot| *slot = None);
		})
		.map_err(|e| Error::Resource(format!("spawning thread {name}: {e}")))?;

	Ok(SpawnedThread {
		context: ctx,
		join: Some(join),
	})
}

/// On failure, records the platform errno on `ctx` via `set_last_err` so the
/// worker pool's post-barrier startup check (spec 4.B/4.C: `create()` "fails
/// with `ResourceError` on platform-thread-attribute or creation failure")
/// actually observes a pinning failure instead of letting the worker run
/// unpinned while reporting success.
fn apply_affinity(ctx: &ThreadContext, params: &ThreadParams) {
	match params.pin {
		Pin::None => {},
		Pin::Cpu(cpu) => {
			if !core_affinity::set_for_current(core_affinity::CoreId {
				id: cpu,
			}) {
				error!(cpu, "failed to set cpu affinity for worker thread");
				if ctx.last_err() == 0 {
					ctx.set_last_err(libc::EINVAL);
				}
			}
		},
		Pin::Node(_) => {
			// Node-wide pinning is resolved by the caller (the worker pool
			// always pins to a single cpu per Zu-Thread); kept here for
			// callers that only know a node.
		},
	}
}

/// On failure, records the platform errno on `ctx` via `set_last_err`, same
/// rationale as [`apply_affinity`].
fn apply_scheduling(ctx: &ThreadContext, params: &ThreadParams) {
	if params.policy == SchedPolicy::Default {
		return;
	}

	let policy = match params.policy {
		SchedPolicy::RoundRobin => libc::SCHED_RR,
		SchedPolicy::Fifo => libc::SCHED_FIFO,
		SchedPolicy::Default => unreachable!(),
	};

	let param = libc::sched_param {
		sched_priority: params.priority,
	};

	// SAFETY: `param` is a valid, fully-initialized sched_param for the
	// lifetime of this call; pthread_self() always identifies a live thread.
	let ret = unsafe { libc::pthread_setschedparam(libc::pthread_self(), policy, &param) };
	if ret != 0 {
		error!("pthread_setschedparam({}, {:?}) failed: {}", params.name, params.policy, ret);
		if ctx.last_err() == 0 {
			ctx.set_last_err(ret);
		}
	}
}
