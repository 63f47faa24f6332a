//! The real kernel transport: a thin wrapper around the handle/mmap/ioctl
//! surface a zufs-style kernel module exposes through a special file.

use std::{
	ffi::c_void,
	os::{fd::RawFd, unix::io::AsRawFd},
	path::{Path, PathBuf},
	ptr::NonNull,
};

use nix::{
	fcntl::{self, OFlag},
	sys::{
		mman::{MapFlags, MmapAdvise, ProtFlags, madvise, mmap, munmap},
		stat::Mode,
	},
	unistd::close,
};
use zufs_core::{Error, Result, error};

use crate::wire::{API_MAP_MAX_SIZE, NumaMap};

/// A single open handle against the kernel transport. Each Zu-Thread owns
/// one, distinct from every other worker's.
#[derive(Debug)]
pub struct Handle(RawFd);

impl Handle {
	#[must_use]
	pub fn raw(&self) -> RawFd { self.0 }
}

impl Drop for Handle {
	fn drop(&mut self) {
		if let Err(e) = close(self.0) {
			error!("closing kernel handle: {e}");
		}
	}
}

/// A region mapped from a [`Handle`], unmapped automatically on drop.
pub struct MappedRegion {
	ptr: NonNull<c_void>,
	len: usize,
}

// SAFETY: the mapping is shared (MAP_SHARED) and its lifetime is owned
// exclusively by whichever worker holds this value; no aliasing across
// threads is introduced by sending the pointer.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
	#[must_use]
	pub fn as_ptr(&self) -> *mut u8 { self.ptr.as_ptr().cast() }

	#[must_use]
	pub fn len(&self) -> usize { self.len }

	#[must_use]
	pub fn is_empty(&self) -> bool { self.len == 0 }

	/// # Safety
	/// The caller must not read past `len` bytes nor retain the slice past
	/// this region's lifetime.
	pub unsafe fn as_slice_mut(&mut self) -> &mut [u8] {
		// SAFETY: ptr is valid for len bytes for the lifetime of this mapping.
		unsafe { std::slice::from_raw_parts_mut(self.as_ptr(), self.len) }
	}
}

impl Drop for MappedRegion {
	fn drop(&mut self) {
		// SAFETY: ptr/len describe exactly the region mmap returned to us.
		if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
			error!("unmapping region: {e}");
		}
	}
}

fn mmap_shared(fd: RawFd, offset: i64, len: usize) -> Result<MappedRegion> {
	// SAFETY: fd is a valid, open handle to the kernel transport's special
	// file; offset/len are caller-declared region bounds within it.
	let ptr = unsafe {
		mmap(
			None,
			std::num::NonZeroUsize::new(len).ok_or_else(|| Error::InvalidArgument("zero-length mapping".into()))?,
			ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
			MapFlags::MAP_SHARED,
			fd,
			offset,
		)?
	};

	// SAFETY: ptr/len were just returned by mmap above and describe this
	// exact mapping; advising the kernel not to core-dump it does not
	// invalidate the mapping.
	unsafe {
		let _ = madvise(ptr, len, MmapAdvise::MADV_DONTDUMP);
	}

	Ok(MappedRegion {
		ptr,
		len,
	})
}

/// Real Linux implementation of the kernel transport, rooted at a path to
/// the special file a zufs-style kernel module exposes (default
/// `/sys/fs/zuf`, see [`zufs_core::Config::root_path`]).
#[derive(Clone, Debug)]
pub struct LinuxTransport {
	root_path: PathBuf,
}

impl LinuxTransport {
	#[must_use]
	pub fn new(root_path: impl Into<PathBuf>) -> Self {
		Self {
			root_path: root_path.into(),
		}
	}

	#[must_use]
	pub fn root_path(&self) -> &Path { &self.root_path }

	/// Opens a fresh, temporary, exclusive, read-write handle good for one
	/// worker or one mount-time operation.
	pub fn open_handle(&self) -> Result<Handle> {
		let fd = fcntl::open(&self.root_path, OFlag::O_RDWR | OFlag::O_TMPFILE | OFlag::O_EXCL, Mode::empty())?;
		Ok(Handle(fd))
	}

	/// Maps the API memory region at offset 0 of `handle`.
	pub fn map_api_region(&self, handle: &Handle) -> Result<MappedRegion> {
		mmap_shared(handle.raw(), 0, API_MAP_MAX_SIZE)
	}

	/// Maps the per-operation buffer, sized `max_op_size`, at the fixed
	/// offset past the API region.
	pub fn map_op_buffer(&self, handle: &Handle, max_op_size: usize) -> Result<MappedRegion> {
		mmap_shared(handle.raw(), API_MAP_MAX_SIZE as i64, max_op_size)
	}

	/// Maps a persistent-memory region of `num_blocks * block_size` bytes
	/// from a dedicated handle.
	pub fn map_pmem(&self, handle: &Handle, num_blocks: u64, block_size: u64) -> Result<MappedRegion> {
		let len = usize::try_from(num_blocks.saturating_mul(block_size))
			.map_err(|_| Error::InvalidArgument("pmem region too large for this address space".into()))?;
		mmap_shared(handle.raw(), 0, len)
	}

	/// Issues a single topology query against the kernel, returning the
	/// per-node cpu sets and counts used to populate the topology map.
	///
	/// This is a stand-in for the real IOCTL: a production build would issue
	/// the kernel's numa-map IOCTL against `handle` and parse its fixed-layout
	/// reply page. Kept as a narrow seam so tests can substitute a fake
	/// transport without a loaded kernel module.
	pub fn numa_map(&self, _handle: &Handle) -> Result<NumaMap> {
		Err(Error::Unsupported(
			"numa_map requires a loaded kernel transport; inject a fake Transport in tests".into(),
		))
	}

	/// Blocks until the kernel delivers the next operation into `buf`, or
	/// returns an error (which the caller must log and retry, never treat as
	/// fatal — see the dispatch loop's error-handling policy).
	pub fn wait_for_operation(&self, handle: &Handle, buf: &mut [u8]) -> Result<()> {
		let _ = (handle, buf);
		Err(Error::Unsupported("wait_for_operation requires a loaded kernel transport".into()))
	}

	/// Blocks until the kernel delivers the next mount-lifecycle message.
	pub fn receive_mount(&self, buf: &mut [u8]) -> Result<()> {
		let _ = buf;
		Err(Error::Unsupported("receive_mount requires a loaded kernel transport".into()))
	}

	/// Unblocks every worker on `channel` currently parked in
	/// `wait_for_operation`, using any one worker's handle as the target.
	pub fn break_all(&self, handle: &Handle) -> Result<()> {
		let _ = handle;
		Err(Error::Unsupported("break_all requires a loaded kernel transport".into()))
	}

	/// Registers `(cpu, channel)` with the kernel as the identity of the
	/// worker behind `handle`, declaring `max_op_size` as the largest
	/// operation buffer this worker can accept.
	pub fn register_worker(&self, handle: &Handle, cpu: usize, channel: usize, max_op_size: usize) -> Result<()> {
		let _ = (handle, cpu, channel, max_op_size);
		Err(Error::Unsupported("register_worker requires a loaded kernel transport".into()))
	}

	/// Requests a single large buffer from the kernel (`ALLOC_BUFFER`) and
	/// maps it, for bulk diagnostic transfers.
	pub fn alloc_exec_buffer(&self, handle: &Handle, size: usize) -> Result<MappedRegion> {
		let _ = (handle, size);
		Err(Error::Unsupported("alloc_exec_buffer requires a loaded kernel transport".into()))
	}

	/// Registers a compiled-in filesystem type name with the kernel.
	pub fn register_fs_type(&self, handle: &Handle, name: &str) -> Result<()> {
		let _ = (handle, name);
		Err(Error::Unsupported("register_fs_type requires a loaded kernel transport".into()))
	}

	/// Reverses [`LinuxTransport::register_fs_type`].
	pub fn unregister_fs_type(&self, handle: &Handle, name: &str) -> Result<()> {
		let _ = (handle, name);
		Err(Error::Unsupported("unregister_fs_type requires a loaded kernel transport".into()))
	}
}

impl AsRawFd for Handle {
	fn as_raw_fd(&self) -> RawFd { self.0 }
}
