//! Per-worker thread context, the factory that creates worker threads with a
//! chosen scheduling policy and CPU affinity, and the startup barrier the
//! worker pool uses to know when every worker is ready.

pub mod barrier;
pub mod context;

pub use barrier::Barrier;
pub use context::{
	Pin, SchedPolicy, SpawnedThread, ThreadContext, ThreadParams, WorkerKind, create, current, current_cpu,
	current_nid, current_one_cpu, thread_current_fini, thread_current_init, thread_self,
};
