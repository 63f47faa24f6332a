//! On-the-wire shapes shared between a worker and the kernel: the operation
//! header, its code enum, and the fixed sizes of the mapped regions.

use zufs_core::Error;

/// Maximum size, in bytes, of the per-worker API memory region mapped at
/// offset 0 of a worker's kernel handle.
pub const API_MAP_MAX_SIZE: usize = 2 * 1024 * 1024;

/// Maximum size, in bytes, of the per-operation buffer mapped past the API
/// region. Large enough to hold an [`OperationHeader`] plus the bulk of a
/// readdir/xattr-list reply.
pub const MAX_OP_SIZE: usize = 32 * 1024;

/// Ceiling on the number of channels a single mount may request.
pub const MAX_ZT_CHANNELS: usize = 8;

/// Size, in bytes, of the mount thread's fixed aligned buffer for inbound
/// mount-lifecycle messages (spec 4.G step 1). Large enough for a header plus
/// a filesystem-type name and debug payloads; bulk diagnostic transfers go
/// through `alloc_exec_buffer` instead.
pub const MOUNT_MSG_MAX_SIZE: usize = 4096;

/// Alignment the mount message buffer is allocated at, mirroring the
/// original's page-aligned `posix_memalign` buffer.
pub const MOUNT_MSG_ALIGN: usize = 4096;

/// Set on [`OperationHeader::flags`] when the kernel wants a long-running
/// operation to yield cooperatively.
pub const H_INTR: u32 = 1 << 0;

/// Set on an `EVICT_INODE` header when this eviction lost a lookup race and
/// the filesystem's `evict` hook must not run.
pub const H_LOOKUP_RACE: u32 = 1 << 1;

/// Set on a `NEW_INODE` header when the created inode must not get a dentry.
pub const H_TMPFILE: u32 = 1 << 2;

/// The tag carried by an [`OperationHeader`], naming the capability the
/// dispatcher must call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum OperationCode {
	Break = 0,
	NewInode,
	FreeInode,
	EvictInode,
	Lookup,
	AddDentry,
	RemoveDentry,
	Rename,
	Readdir,
	Clone,
	Copy,
	Read,
	PreRead,
	Write,
	GetBlock,
	PutBlock,
	MmapClose,
	GetSymlink,
	Setattr,
	Sync,
	Fallocate,
	Llseek,
	Ioctl,
	/// Covers GET/SET/LIST; the subtype is the first payload byte (see
	/// `zufs_dispatch::xattr`).
	Xattr,
	Statfs,
	Mount,
	Umount,
	Remount,
	DebugRead,
	DebugWrite,
}

impl OperationCode {
	/// A human name for log lines, mirroring the original dispatcher's
	/// per-call trace line.
	#[must_use]
	pub fn name(self) -> &'static str {
		match self {
			Self::Break => "BREAK",
			Self::NewInode => "NEW_INODE",
			Self::FreeInode => "FREE_INODE",
			Self::EvictInode => "EVICT_INODE",
			Self::Lookup => "LOOKUP",
			Self::AddDentry => "ADD_DENTRY",
			Self::RemoveDentry => "REMOVE_DENTRY",
			Self::Rename => "RENAME",
			Self::Readdir => "READDIR",
			Self::Clone => "CLONE",
			Self::Copy => "COPY",
			Self::Read => "READ",
			Self::PreRead => "PRE_READ",
			Self::Write => "WRITE",
			Self::GetBlock => "GET_BLOCK",
			Self::PutBlock => "PUT_BLOCK",
			Self::MmapClose => "MMAP_CLOSE",
			Self::GetSymlink => "GET_SYMLINK",
			Self::Setattr => "SETATTR",
			Self::Sync => "SYNC",
			Self::Fallocate => "FALLOCATE",
			Self::Llseek => "LLSEEK",
			Self::Ioctl => "IOCTL",
			Self::Xattr => "XATTR",
			Self::Statfs => "STATFS",
			Self::Mount => "MOUNT",
			Self::Umount => "UMOUNT",
			Self::Remount => "REMOUNT",
			Self::DebugRead => "DEBUG_READ",
			Self::DebugWrite => "DEBUG_WRITE",
		}
	}
}

impl TryFrom<u32> for OperationCode {
	type Error = Error;

	fn try_from(value: u32) -> Result<Self, Self::Error> {
		Ok(match value {
			0 => Self::Break,
			1 => Self::NewInode,
			2 => Self::FreeInode,
			3 => Self::EvictInode,
			4 => Self::Lookup,
			5 => Self::AddDentry,
			6 => Self::RemoveDentry,
			7 => Self::Rename,
			8 => Self::Readdir,
			9 => Self::Clone,
			10 => Self::Copy,
			11 => Self::Read,
			12 => Self::PreRead,
			13 => Self::Write,
			14 => Self::GetBlock,
			15 => Self::PutBlock,
			16 => Self::MmapClose,
			17 => Self::GetSymlink,
			18 => Self::Setattr,
			19 => Self::Sync,
			20 => Self::Fallocate,
			21 => Self::Llseek,
			22 => Self::Ioctl,
			23 => Self::Xattr,
			24 => Self::Statfs,
			25 => Self::Mount,
			26 => Self::Umount,
			27 => Self::Remount,
			28 => Self::DebugRead,
			29 => Self::DebugWrite,
			other => return Err(Error::InvalidArgument(format!("unknown operation code {other}"))),
		})
	}
}

/// The tagged descriptor at the head of a worker's operation buffer, and at
/// the head of the mount thread's inbound message buffer.
#[derive(Clone, Copy, Debug)]
pub struct OperationHeader {
	pub operation: u32,
	/// Byte offset into the API memory region where the request/reply
	/// payload for this operation lives.
	pub offset: u64,
	pub len: u64,
	pub flags: u32,
	/// Kernel sign convention: always written as `<= 0`.
	pub err: i32,
}

/// On-the-wire byte size of an [`OperationHeader`], native-endian, at the
/// front of every per-worker operation buffer.
pub const HEADER_LEN: usize = 28;

impl OperationHeader {
	#[must_use]
	pub fn interrupted(&self) -> bool { self.flags & H_INTR != 0 }

	#[must_use]
	pub fn lookup_race(&self) -> bool { self.flags & H_LOOKUP_RACE != 0 }

	#[must_use]
	pub fn tmpfile(&self) -> bool { self.flags & H_TMPFILE != 0 }

	#[must_use]
	pub fn operation_code(&self) -> Result<OperationCode, Error> { OperationCode::try_from(self.operation) }

	/// Writes `err` into this header's error field in kernel sign convention.
	pub fn set_result(&mut self, err: &Error) { self.err = err.to_kernel_errno(); }

	pub fn set_ok(&mut self) { self.err = 0; }

	/// Decodes a header from the front of a worker's operation buffer.
	pub fn decode(buf: &[u8]) -> Result<Self, Error> {
		if buf.len() < HEADER_LEN {
			return Err(Error::InvalidArgument(format!(
				"operation buffer of {} bytes is shorter than a {HEADER_LEN}-byte header",
				buf.len()
			)));
		}

		Ok(Self {
			operation: u32::from_ne_bytes(buf[0..4].try_into().expect("checked above")),
			flags: u32::from_ne_bytes(buf[4..8].try_into().expect("checked above")),
			offset: u64::from_ne_bytes(buf[8..16].try_into().expect("checked above")),
			len: u64::from_ne_bytes(buf[16..24].try_into().expect("checked above")),
			err: i32::from_ne_bytes(buf[24..28].try_into().expect("checked above")),
		})
	}

	/// Writes this header back into the front of a worker's operation buffer.
	pub fn encode(&self, buf: &mut [u8]) -> Result<(), Error> {
		if buf.len() < HEADER_LEN {
			return Err(Error::InvalidArgument(format!(
				"operation buffer of {} bytes is shorter than a {HEADER_LEN}-byte header",
				buf.len()
			)));
		}

		buf[0..4].copy_from_slice(&self.operation.to_ne_bytes());
		buf[4..8].copy_from_slice(&self.flags.to_ne_bytes());
		buf[8..16].copy_from_slice(&self.offset.to_ne_bytes());
		buf[16..24].copy_from_slice(&self.len.to_ne_bytes());
		buf[24..28].copy_from_slice(&self.err.to_ne_bytes());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::{HEADER_LEN, OperationHeader};

	#[test]
	fn round_trips_through_a_buffer() {
		let header = OperationHeader {
			operation: 4,
			offset: 512,
			len: 64,
			flags: super::H_INTR,
			err: -5,
		};

		let mut buf = [0u8; HEADER_LEN];
		header.encode(&mut buf).unwrap();
		let decoded = OperationHeader::decode(&buf).unwrap();

		assert_eq!(decoded.operation, header.operation);
		assert_eq!(decoded.offset, header.offset);
		assert_eq!(decoded.len, header.len);
		assert_eq!(decoded.flags, header.flags);
		assert_eq!(decoded.err, header.err);
	}

	#[test]
	fn decode_rejects_short_buffers() {
		let buf = [0u8; HEADER_LEN - 1];
		assert!(OperationHeader::decode(&buf).is_err());
	}
}

/// The CPU/NUMA layout returned by a single topology query.
#[derive(Clone, Debug)]
pub struct NumaMap {
	pub possible_cpus: usize,
	pub possible_nodes: usize,
	/// `cpu_set_per_node[node]` is the set of cpu indices belonging to that
	/// node; a cpu absent from every set is offline.
	pub cpu_set_per_node: Vec<Vec<usize>>,
}
