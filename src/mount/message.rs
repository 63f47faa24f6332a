//! Wire shapes for the mount thread's inbound message buffer. Like a
//! worker's operation buffer, an [`zufs_transport::OperationHeader`] sits at
//! the front; the request/reply payload follows it directly (spec Section 6).

use zufs_core::{Error, Result};
use zufs_dispatch::codec as c;
use zufs_transport::HEADER_LEN;

/// Decoded `MOUNT` request payload.
pub struct MountRequest {
	pub num_channels: usize,
	pub pmem_kern_id: u32,
	pub num_blocks: u64,
	pub block_size: u64,
	pub use_user_pages: bool,
	pub fs_type: String,
}

impl MountRequest {
	pub fn decode(buf: &[u8]) -> Result<Self> {
		let body = &buf[HEADER_LEN..];
		let num_channels = c::get_u32(body, 0)? as usize;
		let pmem_kern_id = c::get_u32(body, 4)?;
		let num_blocks = c::get_u64(body, 8)?;
		let block_size = c::get_u64(body, 16)?;
		let use_user_pages = *body.get(24).ok_or_else(|| Error::InvalidArgument("mount request truncated".into()))? != 0;
		let fs_type_len = usize::from(c::get_u16(body, 25)?);
		let fs_type = c::get_str(body, 27, fs_type_len)?.to_owned();

		Ok(Self {
			num_channels,
			pmem_kern_id,
			num_blocks,
			block_size,
			use_user_pages,
			fs_type,
		})
	}
}

/// Reply written back over the same bytes a [`MountRequest`] occupied.
pub struct MountReply {
	pub sbi_handle: u64,
	pub root_ino: u64,
	pub root_disk_offset: u64,
}

impl MountReply {
	pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
		let body = &mut buf[HEADER_LEN..];
		c::put_u64(body, 0, self.sbi_handle)?;
		c::put_u64(body, 8, self.root_ino)?;
		c::put_u64(body, 16, self.root_disk_offset)
	}
}

/// `UMOUNT` / `REMOUNT` / `DEBUG_READ` / `DEBUG_WRITE` all lead with the
/// superblock-info handle published by a prior `MOUNT` reply.
pub fn decode_sbi_handle(buf: &[u8]) -> Result<u64> { c::get_u64(&buf[HEADER_LEN..], 0) }

/// `REMOUNT`'s filesystem-defined payload, everything after the handle.
pub fn remount_payload(buf: &mut [u8]) -> &mut [u8] { &mut buf[HEADER_LEN + 8..] }

/// `DEBUG_WRITE`'s payload: a length-prefixed byte string after the handle.
pub fn decode_debug_write(buf: &[u8]) -> Result<&[u8]> {
	let body = &buf[HEADER_LEN..];
	let len = c::get_u32(body, 8)? as usize;
	body.get(12..12 + len)
		.ok_or_else(|| Error::InvalidArgument("debug_write payload out of range".into()))
}

/// `DEBUG_READ`'s output area, past the handle and the length it fills in.
pub fn debug_read_buf(buf: &mut [u8]) -> &mut [u8] { &mut buf[HEADER_LEN + 12..] }

/// Writes back the byte count a `DEBUG_READ` handler produced.
pub fn encode_debug_read_len(buf: &mut [u8], len: usize) -> Result<()> {
	let body = &mut buf[HEADER_LEN..];
	let len = u32::try_from(len).map_err(|_| Error::InvalidArgument("debug_read output too large".into()))?;
	c::put_u32(body, 8, len)
}

/// A page-aligned heap buffer for the mount thread's fixed-size inbound
/// message buffer (spec 4.G step 1), mirroring the original's
/// `posix_memalign`-backed buffer.
pub struct AlignedBuffer {
	ptr: std::ptr::NonNull<u8>,
	len: usize,
	layout: std::alloc::Layout,
}

// SAFETY: exclusively owned by the mount thread for its entire lifetime.
unsafe impl Send for AlignedBuffer {}

impl AlignedBuffer {
	#[must_use]
	pub fn new(len: usize, align: usize) -> Self {
		let layout = std::alloc::Layout::from_size_align(len, align).expect("valid mount message buffer layout");
		// SAFETY: layout has non-zero size; allocation failure is handled below.
		let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
		let ptr = std::ptr::NonNull::new(ptr).unwrap_or_else(|| std::alloc::handle_alloc_error(layout));
		Self {
			ptr,
			len,
			layout,
		}
	}

	pub fn as_mut_slice(&mut self) -> &mut [u8] {
		// SAFETY: ptr/len describe exactly the allocation made in `new`.
		unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
	}
}

impl Drop for AlignedBuffer {
	fn drop(&mut self) {
		// SAFETY: ptr/layout match the allocation made in `new`, which is
		// never reallocated.
		unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
	}
}

#[cfg(test)]
mod tests {
	use zufs_transport::HEADER_LEN;

	use super::{AlignedBuffer, MountReply, MountRequest};

	#[test]
	fn mount_request_round_trips() {
		let mut buf = vec![0u8; HEADER_LEN + 64];
		let body = &mut buf[HEADER_LEN..];
		body[0..4].copy_from_slice(&2u32.to_ne_bytes());
		body[4..8].copy_from_slice(&7u32.to_ne_bytes());
		body[8..16].copy_from_slice(&1024u64.to_ne_bytes());
		body[16..24].copy_from_slice(&4096u64.to_ne_bytes());
		body[24] = 1;
		body[25..27].copy_from_slice(&3u16.to_ne_bytes());
		body[27..30].copy_from_slice(b"abc");

		let req = MountRequest::decode(&buf).unwrap();
		assert_eq!(req.num_channels, 2);
		assert_eq!(req.pmem_kern_id, 7);
		assert_eq!(req.num_blocks, 1024);
		assert_eq!(req.block_size, 4096);
		assert!(req.use_user_pages);
		assert_eq!(req.fs_type, "abc");
	}

	#[test]
	fn mount_reply_round_trips() {
		let mut buf = vec![0u8; HEADER_LEN + 32];
		let reply = MountReply {
			sbi_handle: 9,
			root_ino: 42,
			root_disk_offset: 4096,
		};
		reply.encode(&mut buf).unwrap();

		let body = &buf[HEADER_LEN..];
		assert_eq!(u64::from_ne_bytes(body[0..8].try_into().unwrap()), 9);
		assert_eq!(u64::from_ne_bytes(body[8..16].try_into().unwrap()), 42);
		assert_eq!(u64::from_ne_bytes(body[16..24].try_into().unwrap()), 4096);
	}

	#[test]
	fn aligned_buffer_is_zeroed_and_sized() {
		let mut buf = AlignedBuffer::new(4096, 4096);
		assert_eq!(buf.as_mut_slice().len(), 4096);
		assert!(buf.as_mut_slice().iter().all(|&b| b == 0));
	}
}
