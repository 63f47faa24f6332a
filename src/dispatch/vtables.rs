//! The capability vtables a concrete filesystem implementation binds to a
//! superblock and to each of its inodes. Every capability the routing table
//! (spec Section 4.H) marks optional has a default method returning exactly
//! the documented absent-behavior; a filesystem only overrides what it
//! actually supports.

use std::sync::Arc;

use zufs_core::{Error, Result};
use zufs_transport::MappedRegion;

/// An on-disk inode number. Opaque to the dispatcher beyond equality and
/// ordering.
pub type Ino = u64;

/// The persistent-memory region grabbed for one mount: the raw mapping plus
/// the block geometry the mount thread already knows from the kernel. The
/// multi-device block-mapping engine that lays a filesystem's own structures
/// out over this is a collaborator out of scope here (spec Section 1); this
/// is just what `sbi_init` needs to bind to it.
pub struct PmemRegion {
	pub region: MappedRegion,
	pub num_blocks: u64,
	pub block_size: u64,
}

/// What `SuperblockOps::sbi_init` publishes back into the mount reply
/// header: the root inode's number and its on-disk offset within the pmem
/// region.
#[derive(Clone, Copy, Debug)]
pub struct SbiInit {
	pub root_ino: Ino,
	pub root_disk_offset: u64,
}

/// A compiled-in filesystem type, registered with the kernel at mount-thread
/// startup (spec 4.G step 4) and capable of producing a fresh superblock
/// binding for each mount of that type.
pub trait FsType: Send + Sync {
	/// The name registered with the kernel; matched against a mount
	/// message's filesystem-type field.
	fn name(&self) -> &str;

	/// Allocates a fresh, not-yet-initialized superblock info. Binding it to
	/// a pmem region and publishing the root inode is `sbi_init`'s job.
	fn sbi_alloc(&self) -> Result<Arc<dyn SuperblockOps>>;
}

/// An opaque handle to a live inode-info, published into reply buffers and
/// later used by callers to address further operations against that inode.
/// The registry mapping these back to an [`InodeOps`] is
/// [`super::Registry`], not the filesystem implementation.
pub type InodeHandle = u64;

/// Capabilities keyed by superblock: the filesystem-wide operations.
pub trait SuperblockOps: Send + Sync {
	/// Allocates a new inode as a child of `dir`. `tmpfile` mirrors the
	/// header's `ZI_TMPFILE` flag: a tmpfile inode is never given a dentry.
	/// Per contract, the returned inode begins with a link count of 0.
	fn new_inode(&self, dir: Ino, tmpfile: bool) -> Result<Ino>;

	/// Resolves `name` within `dir`. `None` means no such entry (the
	/// dispatcher turns that into [`Error::NotFound`]); "." and ".." never
	/// reach this method, the dispatcher short-circuits them itself.
	fn lookup(&self, dir: Ino, name: &str) -> Result<Option<Ino>>;

	/// The recorded parent of `dir`, used for the dispatcher's ".."
	/// short-circuit.
	fn dir_parent(&self, dir: Ino) -> Result<Ino>;

	/// Produces the inode vtable for an already-resolved `ino`.
	fn open_inode(&self, ino: Ino) -> Result<Arc<dyn InodeOps>>;

	fn add_dentry(&self, dir: Ino, name: &str, ino: Ino) -> Result<()>;

	fn remove_dentry(&self, dir: Ino, name: &str) -> Result<()>;

	fn free_inode(&self, ino: Ino) -> Result<()>;

	fn rename(&self, old_dir: Ino, old_name: &str, new_dir: Ino, new_name: &str) -> Result<()> {
		let _ = (old_dir, old_name, new_dir, new_name);
		Err(Error::Unsupported("rename".into()))
	}

	/// Writes directory entries starting at `cookie` into `buf`, returning
	/// the number of bytes written. Entry encoding is filesystem-defined.
	fn readdir(&self, dir: Ino, cookie: u64, buf: &mut [u8]) -> Result<usize> {
		let _ = (dir, cookie, buf);
		Err(Error::Unsupported("readdir".into()))
	}

	/// Handles both CLONE and COPY; `payload` is filesystem-defined.
	fn clone_range(&self, src: Ino, dst: Ino, payload: &mut [u8]) -> Result<()> {
		let _ = (src, dst, payload);
		Err(Error::Unsupported("clone".into()))
	}

	fn statfs(&self, buf: &mut [u8]) -> Result<()> {
		let _ = buf;
		Err(Error::Unsupported("statfs".into()))
	}

	/// Called on a `REMOUNT` message; a no-op success if the filesystem has
	/// nothing to re-validate.
	fn remount(&self, payload: &mut [u8]) -> Result<()> {
		let _ = payload;
		Ok(())
	}

	/// Binds this superblock to its freshly-grabbed pmem region: populates
	/// multi-device state, allocates per-block user-pages if the filesystem
	/// wants them, and returns the root inode's number and on-disk offset
	/// for the mount reply. Called once, by `MOUNT`, between `sbi_alloc` and
	/// the superblock becoming visible to the dispatcher.
	fn sbi_init(&self, pmem: &PmemRegion) -> Result<SbiInit>;

	/// Paired teardown hook, called on `UMOUNT` or on a failed mount's
	/// unwind, before the pmem region is released. Optional; a no-op
	/// success if the filesystem has nothing to flush at this layer.
	fn sbi_fini(&self) -> Result<()> { Ok(()) }

	/// Support-tooling hook for `DEBUG_READ` mount messages: fills `buf` with
	/// implementation-defined debug state and returns the number of bytes
	/// written. Has no on-disk effect. Optional.
	fn debug_read(&self, buf: &mut [u8]) -> Result<usize> {
		let _ = buf;
		Err(Error::Unsupported("debug_read".into()))
	}

	/// Support-tooling hook for `DEBUG_WRITE` mount messages: applies
	/// implementation-defined debug state from `payload`. Has no on-disk
	/// effect. Optional.
	fn debug_write(&self, payload: &[u8]) -> Result<()> {
		let _ = payload;
		Err(Error::Unsupported("debug_write".into()))
	}
}

/// Capabilities keyed by inode.
pub trait InodeOps: Send + Sync {
	fn ino(&self) -> Ino;

	/// `EVICT_INODE`'s handler; never called when the request lost a lookup
	/// race (the dispatcher checks the header flag itself).
	fn evict(&self) -> Result<()>;

	fn read(&self, buf: &mut [u8], file_offset: u64) -> Result<usize>;

	fn write(&self, buf: &[u8], file_offset: u64) -> Result<usize>;

	fn pre_read(&self, buf: &mut [u8], file_offset: u64) -> Result<usize> {
		let _ = (buf, file_offset);
		Err(Error::Unsupported("pre_read".into()))
	}

	/// Resolves `block_index` to a device-relative block address. Unlike
	/// `put_block`, a missing implementation is an `IoError`, not
	/// `Unsupported` — a filesystem participating in the pmem I/O path must
	/// provide this.
	fn get_block(&self, block_index: u64) -> Result<u64> {
		let _ = block_index;
		Err(Error::Io(std::io::Error::other("get_block not implemented")))
	}

	/// Releases a block obtained via `get_block`. Optional; a no-op success
	/// if the filesystem does no reference counting at this layer.
	fn put_block(&self, block_index: u64) -> Result<()> {
		let _ = block_index;
		Ok(())
	}

	fn mmap_close(&self) -> Result<()> { Ok(()) }

	fn get_symlink(&self) -> Result<Vec<u8>> { Err(Error::Unsupported("get_symlink".into())) }

	fn setattr(&self, payload: &[u8]) -> Result<()> {
		let _ = payload;
		Ok(())
	}

	fn sync(&self) -> Result<()> { Ok(()) }

	fn fallocate(&self, payload: &[u8]) -> Result<()> {
		let _ = payload;
		Err(Error::Unsupported("fallocate".into()))
	}

	fn seek(&self, offset: i64, whence: i32) -> Result<u64> {
		let _ = (offset, whence);
		Err(Error::Unsupported("llseek".into()))
	}

	fn ioctl(&self, cmd: u32, payload: &mut [u8]) -> Result<()> {
		let _ = (cmd, payload);
		Err(Error::NotATTY("ioctl".into()))
	}

	fn getxattr(&self, name: &str, buf: &mut [u8]) -> Result<usize> {
		let _ = (name, buf);
		Err(Error::Unsupported("getxattr".into()))
	}

	fn setxattr(&self, name: &str, value: &[u8]) -> Result<()> {
		let _ = (name, value);
		Err(Error::Unsupported("setxattr".into()))
	}

	fn listxattr(&self, buf: &mut [u8]) -> Result<usize> {
		let _ = buf;
		Err(Error::Unsupported("listxattr".into()))
	}
}
