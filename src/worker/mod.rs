//! Zu-Thread: the long-lived per-`(cpu, channel)` dispatcher worker (spec
//! Section 4.E). Each one opens its own kernel handle, maps its own pair of
//! shared regions, and loops blocking in the kernel's "wait-for-operation"
//! call until told to stop.

use std::{
	cell::Cell,
	sync::{
		Arc, OnceLock,
		atomic::{AtomicBool, Ordering},
	},
};

use zufs_core::{Result, debug, error};
use zufs_dispatch::{Session, dispatch};
use zufs_threads::{Barrier, SpawnedThread, ThreadContext, ThreadParams, WorkerKind, create, current};
use zufs_transport::{Handle, MAX_OP_SIZE, MappedRegion, OperationHeader, Transport, H_INTR};

thread_local! {
	/// The interrupt bit of the operation currently being dispatched on
	/// this Zu-Thread, mirroring the original's `op_hdr` pointer (spec
	/// Section 3) without exposing a raw pointer across the dispatch call.
	static ACTIVE_FLAGS: Cell<u32> = const { Cell::new(0) };
}

/// Readable only from inside a Zu-Thread; returns whether the operation
/// currently in flight has the kernel's interrupt flag set. Long-running
/// operation handlers poll this to abort cooperatively. Returns `false`
/// (and logs) when called from anywhere else, per the "container trickery"
/// design note: a [`WorkerKind`] check stands in for the original's
/// `container_of`-based assertion.
#[must_use]
pub fn signal_pending() -> bool {
	match current().map(|ctx| ctx.kind()) {
		Some(WorkerKind::Zu) => ACTIVE_FLAGS.with(Cell::get) & H_INTR != 0,
		_ => {
			error!("signal_pending() called outside a Zu-Thread");
			false
		},
	}
}

/// A started Zu-Thread, owned by the worker pool for the lifetime of one
/// `(cpu, channel)` slot.
pub struct ZuThread {
	pub cpu: usize,
	pub channel: usize,
	context: ThreadContext,
	stop: Arc<AtomicBool>,
	/// Set by the worker itself right after it opens its kernel handle,
	/// so the pool can use *some* worker's handle for `break_all` during
	/// `stop()` without owning the handle itself.
	handle: Arc<OnceLock<Handle>>,
	spawned: Option<SpawnedThread>,
}

impl ZuThread {
	/// Spawns the worker thread and runs it through the entry sequence and
	/// dispatch loop (spec 4.E). Startup failures are recorded on the
	/// returned context's `last_err` rather than propagated here — the pool
	/// detects them only after every worker has released the barrier.
	/// `params` is expected to already carry the `"ZT(i.c)"` name and a
	/// single-cpu pin; only the worker pool constructs it.
	pub fn spawn(
		params: ThreadParams,
		cpu: usize,
		channel: usize,
		transport: Arc<dyn Transport>,
		session: Arc<Session>,
		barrier: Arc<Barrier>,
	) -> Result<Self> {
		let stop = Arc::new(AtomicBool::new(false));
		let handle = Arc::new(OnceLock::new());

		let thread_stop = Arc::clone(&stop);
		let thread_handle = Arc::clone(&handle);
		let spawned = create(params, WorkerKind::Zu, move |ctx| {
			run(ctx, cpu, channel, transport.as_ref(), &session, &barrier, &thread_stop, &thread_handle);
		})?;

		Ok(Self {
			cpu,
			channel,
			context: spawned.context.clone(),
			stop,
			handle,
			spawned: Some(spawned),
		})
	}

	/// Some worker's kernel handle, once its entry sequence has opened one.
	/// Used by the pool to issue a `break_all` during `stop()` — any live
	/// worker's handle works, per the original's "any one worker's handle"
	/// convention.
	#[must_use]
	pub fn kernel_handle(&self) -> Option<&Handle> { self.handle.get() }

	/// The error recorded during this worker's entry sequence, if any
	/// (`0` means either no error yet, or the worker hasn't started).
	#[must_use]
	pub fn last_err(&self) -> i32 { self.context.last_err() }

	/// Sets this worker's `stop` flag; observed between operations (spec
	/// 5's cancellation model). Does not by itself unblock a worker parked
	/// in `wait_for_operation` — the pool's `break_all` does that.
	pub fn request_stop(&self) { self.stop.store(true, Ordering::Release); }

	/// Joins the underlying platform thread. A no-op if already joined.
	pub fn join(&mut self) -> Result<()> {
		match self.spawned.take() {
			Some(spawned) => spawned.join(),
			None => Ok(()),
		}
	}
}

fn run(
	ctx: &ThreadContext,
	cpu: usize,
	channel: usize,
	transport: &dyn Transport,
	session: &Session,
	barrier: &Barrier,
	stop: &AtomicBool,
	handle_slot: &OnceLock<Handle>,
) {
	let entered = entry(cpu, channel, transport);
	let (handle, mut api_region, mut op_buffer) = match entered {
		Ok(parts) => parts,
		Err(e) => {
			error!(cpu, channel, "Zu-Thread entry sequence failed: {e}");
			ctx.set_last_err(e.errno());
			barrier.release();
			return;
		},
	};

	let _ = handle_slot.set(handle);
	let handle = handle_slot.get().expect("just set above");

	barrier.release();

	// SAFETY: both regions stay mapped and are exclusively owned by this
	// worker until the loop below returns, at which point they're dropped
	// (unmapped) before `handle` is closed — the exit sequence of spec 4.E.
	let api_slice = unsafe { api_region.as_slice_mut() };
	let op_slice = unsafe { op_buffer.as_slice_mut() };

	dispatch_loop(transport, handle, session, api_slice, op_slice, stop);
}

fn entry(cpu: usize, channel: usize, transport: &dyn Transport) -> Result<(Handle, MappedRegion, MappedRegion)> {
	let handle = transport.open_handle()?;
	transport.register_worker(&handle, cpu, channel, MAX_OP_SIZE)?;
	let api_region = transport.map_api_region(&handle)?;
	let op_buffer = transport.map_op_buffer(&handle, MAX_OP_SIZE)?;
	Ok((handle, api_region, op_buffer))
}

/// The dispatch loop proper (spec 4.E steps a-c): block for the next
/// operation, dispatch it, write the result back, repeat until `stop`. A
/// `wait_for_operation` error is logged but does **not** skip dispatch — step
/// (c) still runs against whatever is in `op_slice` and the result is still
/// written back, exactly as spec 4.E/5/7 require. Only `stop` may end the
/// loop, so a signal delivered to the process cannot strand this worker's
/// kernel-side channel by leaving it parked with no result ever written back.
fn dispatch_loop(
	transport: &dyn Transport,
	handle: &Handle,
	session: &Session,
	api_slice: &mut [u8],
	op_slice: &mut [u8],
	stop: &AtomicBool,
) {
	while !stop.load(Ordering::Acquire) {
		if let Err(e) = transport.wait_for_operation(handle, op_slice) {
			debug!("wait_for_operation error, dispatching against the buffer anyway: {e}");
		}

		let mut header = match OperationHeader::decode(op_slice) {
			Ok(header) => header,
			Err(e) => {
				error!("malformed operation header, dropping: {e}");
				continue;
			},
		};

		ACTIVE_FLAGS.with(|flags| flags.set(header.flags));
		let _ = dispatch(session, api_slice, &mut header);

		if let Err(e) = header.encode(op_slice) {
			error!("writing back operation result: {e}");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::signal_pending;

	#[test]
	fn signal_pending_is_false_outside_a_zu_thread() { assert!(!signal_pending()); }
}
