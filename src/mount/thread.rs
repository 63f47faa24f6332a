//! The mount thread (spec Section 4.G): the singleton that brings the
//! topology map up, registers compiled-in filesystem types, starts the
//! worker pool on the first successful mount, and dispatches mount-lifecycle
//! messages for the rest of the daemon's life.

use std::sync::{
	Arc, Mutex, OnceLock,
	atomic::{AtomicBool, AtomicU64, Ordering},
};

use zufs_core::{Error, Result, debug, error, info};
use zufs_dispatch::{FsType, PmemRegion, Session, SuperblockOps};
use zufs_pool::WorkerPool;
use zufs_threads::{SpawnedThread, ThreadParams, WorkerKind, create};
use zufs_topology::Topology;
use zufs_transport::{Handle, MOUNT_MSG_ALIGN, MOUNT_MSG_MAX_SIZE, OperationCode, OperationHeader, Transport};

use crate::{message, registry::FsRegistry};

/// State for one live mount: the superblock binding, its dispatch session,
/// and the pmem region/handle it was grabbed from.
struct Mounted {
	handle: u64,
	sbi: Arc<dyn SuperblockOps>,
	// Kept alive for the worker pool's session; never read directly.
	#[allow(dead_code)]
	session: Arc<Session>,
	pmem: PmemRegion,
	// Kept open only to hold the pmem grab alive; released on drop.
	#[allow(dead_code)]
	pmem_handle: Handle,
}

struct Shared {
	transport: Arc<dyn Transport>,
	fs_types: FsRegistry,
	topology: OnceLock<Arc<Topology>>,
	pool: OnceLock<Arc<WorkerPool>>,
	kernel_handle: OnceLock<Handle>,
	mounted: Mutex<Option<Mounted>>,
	next_handle: AtomicU64,
	stop: AtomicBool,
}

/// Owns the mount thread's lifecycle: [`MountThread::start`] spawns it,
/// [`MountThread::stop`] tears it down in the order spec 4.G's "Shutdown"
/// paragraph describes.
pub struct MountThread {
	shared: Arc<Shared>,
	spawned: Mutex<Option<SpawnedThread>>,
}

impl MountThread {
	#[must_use]
	pub fn new(transport: Arc<dyn Transport>, fs_types: Vec<Arc<dyn FsType>>) -> Self {
		Self {
			shared: Arc::new(Shared {
				transport,
				fs_types: FsRegistry::new(fs_types),
				topology: OnceLock::new(),
				pool: OnceLock::new(),
				kernel_handle: OnceLock::new(),
				mounted: Mutex::new(None),
				next_handle: AtomicU64::new(0),
				stop: AtomicBool::new(false),
			}),
			spawned: Mutex::new(None),
		}
	}

	/// Spawns the mount thread, pinned to cpu 0 by convention (spec 4.G).
	/// Its own bring-up (topology init, filesystem registration, the ready
	/// notification) runs inside the spawned thread, not here.
	pub fn start(&self) -> Result<()> {
		let mut guard = self.spawned.lock().expect("mount thread lock poisoned");
		if guard.is_some() {
			return Err(Error::AlreadyExists("mount thread already started".into()));
		}

		let shared = Arc::clone(&self.shared);
		let params = ThreadParams::named("mount-thread").pinned_to_cpu(0);
		let spawned = create(params, WorkerKind::Foreign, move |_ctx| run(&shared))?;
		*guard = Some(spawned);
		Ok(())
	}

	/// Stops the worker pool, signals the mount loop to exit, unblocks its
	/// `receive_mount` wait, joins the thread, then unregisters every
	/// compiled-in filesystem type. Idempotent.
	pub fn stop(&self) {
		if let Some(pool) = self.shared.pool.get() {
			pool.stop();
		}

		self.shared.stop.store(true, Ordering::Release);

		if let Some(handle) = self.shared.kernel_handle.get() {
			if let Err(e) = self.shared.transport.break_all(handle) {
				error!("breaking the mount thread's receive_mount wait: {e}");
			}
		}

		if let Some(spawned) = self.spawned.lock().expect("mount thread lock poisoned").take() {
			if let Err(e) = spawned.join() {
				error!("joining mount thread: {e}");
			}
		}

		if let Some(handle) = self.shared.kernel_handle.get() {
			for fs in self.shared.fs_types.iter() {
				if let Err(e) = self.shared.transport.unregister_fs_type(handle, fs.name()) {
					error!(fs_type = fs.name(), "unregistering filesystem type: {e}");
				}
			}
		}
	}

	/// The topology map, once the mount thread's bring-up has populated it.
	#[must_use]
	pub fn topology(&self) -> Option<Arc<Topology>> { self.shared.topology.get().cloned() }

	/// Whether the worker pool has been started by a prior mount.
	#[must_use]
	pub fn is_pool_started(&self) -> bool { self.shared.pool.get().is_some() }
}

/// The mount thread's bring-up (spec 4.G "Initialization") followed by its
/// main loop (spec 4.G "Main loop"), all run on the spawned thread itself.
fn run(shared: &Shared) {
	let mut buf = message::AlignedBuffer::new(MOUNT_MSG_MAX_SIZE, MOUNT_MSG_ALIGN);

	let handle = match shared.transport.open_handle() {
		Ok(h) => h,
		Err(e) => {
			error!("mount thread: opening kernel handle failed: {e}");
			return;
		},
	};
	let _ = shared.kernel_handle.set(handle);
	let handle = shared.kernel_handle.get().expect("just set above");

	let topology = match Topology::init(shared.transport.as_ref(), handle) {
		Ok(topo) => topo,
		Err(e) => {
			error!("mount thread: topology init failed: {e}");
			return;
		},
	};
	let _ = shared.topology.set(Arc::new(topology));

	for fs in shared.fs_types.iter() {
		if let Err(e) = shared.transport.register_fs_type(handle, fs.name()) {
			error!(fs_type = fs.name(), "registering filesystem type failed: {e}");
			return;
		}
	}

	if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
		debug!("sd_notify READY=1 failed (not running under a supervisor?): {e}");
	}
	info!("mount thread ready");

	while !shared.stop.load(Ordering::Acquire) {
		if let Err(e) = shared.transport.receive_mount(buf.as_mut_slice()) {
			error!("receive_mount failed, ending mount thread: {e}");
			break;
		}

		if shared.stop.load(Ordering::Acquire) {
			break;
		}

		let mut header = match OperationHeader::decode(buf.as_mut_slice()) {
			Ok(header) => header,
			Err(e) => {
				error!("malformed mount message, dropping: {e}");
				continue;
			},
		};

		match handle_message(shared, &header, buf.as_mut_slice()) {
			Ok(()) => header.set_ok(),
			Err(e) => {
				error!("mount message handling failed: {e}");
				header.set_result(&e);
			},
		}

		if let Err(e) = header.encode(buf.as_mut_slice()) {
			error!("writing back mount message result: {e}");
		}
	}
}

fn handle_message(shared: &Shared, header: &OperationHeader, buf: &mut [u8]) -> Result<()> {
	let code = header.operation_code()?;
	match code {
		OperationCode::Mount => {
			let request = message::MountRequest::decode(buf)?;
			let reply = handle_mount(shared, request)?;
			reply.encode(buf)
		},
		OperationCode::Umount => {
			let handle = message::decode_sbi_handle(buf)?;
			handle_umount(shared, handle)
		},
		OperationCode::Remount => {
			let handle = message::decode_sbi_handle(buf)?;
			let payload = message::remount_payload(buf);
			handle_remount(shared, handle, payload)
		},
		OperationCode::DebugRead => handle_debug_read(shared, buf),
		OperationCode::DebugWrite => handle_debug_write(shared, buf),
		other => Err(Error::InvalidArgument(format!("{} is not a mount-thread message", other.name()))),
	}
}

/// Allocates the superblock, grabs its pmem region, and binds it (spec
/// 4.G.c `MOUNT`). Starts the worker pool here, on the first successful
/// mount, with the session this very mount produces — the pool's
/// `start(..., session)` contract (spec 4.F) ties one session to the pool's
/// entire lifetime, so a second concurrent mount is rejected rather than
/// silently sharing the first mount's dispatch session (see DESIGN.md).
fn handle_mount(shared: &Shared, request: message::MountRequest) -> Result<message::MountReply> {
	let mut guard = shared.mounted.lock().expect("mount table lock poisoned");
	if guard.is_some() {
		return Err(Error::AlreadyExists("a filesystem is already mounted".into()));
	}

	let fs = shared.fs_types.get(&request.fs_type)?;
	let sbi = fs.sbi_alloc()?;

	let pmem_handle = shared.transport.open_handle().inspect_err(|_| {
		let _ = sbi.sbi_fini();
	})?;

	let region = shared
		.transport
		.map_pmem(&pmem_handle, request.num_blocks, request.block_size)
		.inspect_err(|_| {
			let _ = sbi.sbi_fini();
		})?;

	let pmem = PmemRegion {
		region,
		num_blocks: request.num_blocks,
		block_size: request.block_size,
	};

	let init = match sbi.sbi_init(&pmem) {
		Ok(init) => init,
		Err(e) => {
			let _ = sbi.sbi_fini();
			drop(pmem);
			drop(pmem_handle);
			return Err(e);
		},
	};

	let session = Arc::new(Session::new(Arc::clone(&sbi)));

	if shared.pool.get().is_none() {
		let topology = shared.topology.get().expect("topology initialized before the mount loop runs").clone();
		let pool = Arc::new(WorkerPool::new(Arc::clone(&shared.transport), topology));

		if let Err(e) = pool.start(&ThreadParams::default(), request.num_channels, Arc::clone(&session)) {
			let _ = sbi.sbi_fini();
			drop(pmem);
			drop(pmem_handle);
			return Err(e);
		}

		let _ = shared.pool.set(pool);
	}

	let handle = shared.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
	*guard = Some(Mounted {
		handle,
		sbi,
		session,
		pmem,
		pmem_handle,
	});

	Ok(message::MountReply {
		sbi_handle: handle,
		root_ino: init.root_ino,
		root_disk_offset: init.root_disk_offset,
	})
}

fn handle_umount(shared: &Shared, handle: u64) -> Result<()> {
	let mut guard = shared.mounted.lock().expect("mount table lock poisoned");
	match guard.take() {
		Some(mounted) if mounted.handle == handle => {
			let _ = mounted.sbi.sbi_fini();
			drop(mounted.pmem);
			drop(mounted.pmem_handle);
			Ok(())
		},
		Some(mounted) => {
			let mounted_handle = mounted.handle;
			*guard = Some(mounted);
			Err(Error::InvalidArgument(format!("umount handle {handle} does not match mounted handle {mounted_handle}")))
		},
		None => Err(Error::NotFound("no filesystem is mounted".into())),
	}
}

fn handle_remount(shared: &Shared, handle: u64, payload: &mut [u8]) -> Result<()> {
	let guard = shared.mounted.lock().expect("mount table lock poisoned");
	let mounted = guard
		.as_ref()
		.filter(|m| m.handle == handle)
		.ok_or_else(|| Error::NotFound("no matching mounted filesystem".into()))?;
	mounted.sbi.remount(payload)
}

fn handle_debug_read(shared: &Shared, buf: &mut [u8]) -> Result<()> {
	let handle = message::decode_sbi_handle(buf)?;
	let guard = shared.mounted.lock().expect("mount table lock poisoned");
	let mounted = guard
		.as_ref()
		.filter(|m| m.handle == handle)
		.ok_or_else(|| Error::NotFound("no matching mounted filesystem".into()))?;
	let n = mounted.sbi.debug_read(message::debug_read_buf(buf))?;
	message::encode_debug_read_len(buf, n)
}

fn handle_debug_write(shared: &Shared, buf: &mut [u8]) -> Result<()> {
	let handle = message::decode_sbi_handle(buf)?;
	let payload = message::decode_debug_write(buf)?.to_vec();
	let guard = shared.mounted.lock().expect("mount table lock poisoned");
	let mounted = guard
		.as_ref()
		.filter(|m| m.handle == handle)
		.ok_or_else(|| Error::NotFound("no matching mounted filesystem".into()))?;
	mounted.sbi.debug_write(&payload)
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use zufs_core::Result;
	use zufs_dispatch::{FsType, PmemRegion, SbiInit, SuperblockOps};
	use zufs_transport::test_support::FakeTransport;

	use super::MountThread;

	struct Noop;
	impl FsType for Noop {
		fn name(&self) -> &str { "noop" }

		fn sbi_alloc(&self) -> Result<Arc<dyn SuperblockOps>> { Ok(Arc::new(NoopSbi)) }
	}

	struct NoopSbi;
	impl SuperblockOps for NoopSbi {
		fn new_inode(&self, _dir: u64, _tmpfile: bool) -> Result<u64> { unimplemented!() }

		fn lookup(&self, _dir: u64, _name: &str) -> Result<Option<u64>> { unimplemented!() }

		fn dir_parent(&self, _dir: u64) -> Result<u64> { unimplemented!() }

		fn open_inode(&self, _ino: u64) -> Result<Arc<dyn zufs_dispatch::InodeOps>> { unimplemented!() }

		fn add_dentry(&self, _dir: u64, _name: &str, _ino: u64) -> Result<()> { unimplemented!() }

		fn remove_dentry(&self, _dir: u64, _name: &str) -> Result<()> { unimplemented!() }

		fn free_inode(&self, _ino: u64) -> Result<()> { unimplemented!() }

		fn sbi_init(&self, _pmem: &PmemRegion) -> Result<SbiInit> { unimplemented!() }
	}

	#[test]
	fn start_twice_fails_with_already_exists() {
		let transport = Arc::new(FakeTransport::default());
		let fs_types: Vec<Arc<dyn FsType>> = vec![Arc::new(Noop)];
		let mount = MountThread::new(transport, fs_types);

		// The fake transport errors on open_handle, so the spawned thread
		// exits immediately during bring-up; this only exercises the
		// re-entrancy guard on `start` itself.
		mount.start().unwrap();
		let err = mount.start().unwrap_err();
		assert!(matches!(err, zufs_core::Error::AlreadyExists(_)));
		mount.stop();
	}

	#[test]
	fn fresh_mount_thread_has_no_topology_or_pool() {
		let transport = Arc::new(FakeTransport::default());
		let mount = MountThread::new(transport, Vec::new());
		assert!(mount.topology().is_none());
		assert!(!mount.is_pool_started());
	}
}
