//! The narrow interface between the dispatch core and a zufs-style kernel
//! module: opening handles, mapping shared regions, and the blocking
//! wait/receive calls. Concrete filesystem semantics and the kernel's
//! IOCTL/ABI itself are out of scope here — this crate only defines the
//! shape of the conversation.

pub mod linux;
pub mod wire;

use zufs_core::Result;

pub use self::{
	linux::{Handle, LinuxTransport, MappedRegion},
	wire::{
		API_MAP_MAX_SIZE, H_INTR, H_LOOKUP_RACE, H_TMPFILE, HEADER_LEN, MAX_OP_SIZE, MAX_ZT_CHANNELS, NumaMap,
		OperationCode, OperationHeader,
	},
};

/// Everything the dispatch core needs from the kernel, as an injected
/// dependency so tests can substitute a fake implementation instead of
/// talking to a real kernel module.
pub trait Transport: Send + Sync {
	fn open_handle(&self) -> Result<Handle>;
	fn map_api_region(&self, handle: &Handle) -> Result<MappedRegion>;
	fn map_op_buffer(&self, handle: &Handle, max_op_size: usize) -> Result<MappedRegion>;
	fn map_pmem(&self, handle: &Handle, num_blocks: u64, block_size: u64) -> Result<MappedRegion>;
	fn numa_map(&self, handle: &Handle) -> Result<NumaMap>;
	fn wait_for_operation(&self, handle: &Handle, buf: &mut [u8]) -> Result<()>;
	fn receive_mount(&self, buf: &mut [u8]) -> Result<()>;
	fn break_all(&self, handle: &Handle) -> Result<()>;
	fn register_worker(&self, handle: &Handle, cpu: usize, channel: usize, max_op_size: usize) -> Result<()>;
	fn alloc_exec_buffer(&self, handle: &Handle, size: usize) -> Result<MappedRegion>;

	/// Registers a compiled-in filesystem type name with the kernel, done
	/// once per type at mount-thread startup (spec 4.G step 4).
	fn register_fs_type(&self, handle: &Handle, name: &str) -> Result<()>;

	/// Reverses [`Transport::register_fs_type`], done at mount-thread
	/// shutdown (spec 4.G, "Shutdown").
	fn unregister_fs_type(&self, handle: &Handle, name: &str) -> Result<()>;
}

impl Transport for LinuxTransport {
	fn open_handle(&self) -> Result<Handle> { self.open_handle() }

	fn map_api_region(&self, handle: &Handle) -> Result<MappedRegion> { self.map_api_region(handle) }

	fn map_op_buffer(&self, handle: &Handle, max_op_size: usize) -> Result<MappedRegion> {
		self.map_op_buffer(handle, max_op_size)
	}

	fn map_pmem(&self, handle: &Handle, num_blocks: u64, block_size: u64) -> Result<MappedRegion> {
		self.map_pmem(handle, num_blocks, block_size)
	}

	fn numa_map(&self, handle: &Handle) -> Result<NumaMap> { self.numa_map(handle) }

	fn wait_for_operation(&self, handle: &Handle, buf: &mut [u8]) -> Result<()> {
		self.wait_for_operation(handle, buf)
	}

	fn receive_mount(&self, buf: &mut [u8]) -> Result<()> { self.receive_mount(buf) }

	fn break_all(&self, handle: &Handle) -> Result<()> { self.break_all(handle) }

	fn register_worker(&self, handle: &Handle, cpu: usize, channel: usize, max_op_size: usize) -> Result<()> {
		self.register_worker(handle, cpu, channel, max_op_size)
	}

	fn alloc_exec_buffer(&self, handle: &Handle, size: usize) -> Result<MappedRegion> {
		self.alloc_exec_buffer(handle, size)
	}

	fn register_fs_type(&self, handle: &Handle, name: &str) -> Result<()> { self.register_fs_type(handle, name) }

	fn unregister_fs_type(&self, handle: &Handle, name: &str) -> Result<()> { self.unregister_fs_type(handle, name) }
}

pub mod test_support {
	//! A fake transport for unit tests elsewhere in the workspace: no real
	//! kernel handle is ever opened. Not gated behind `#[cfg(test)]` since
	//! other workspace crates' tests pull it in as an ordinary dependency.
	use std::sync::Mutex;

	use zufs_core::{Error, Result};

	use super::{Handle, MappedRegion, NumaMap, Transport};

	/// An in-memory stand-in for the kernel transport, configurable per test.
	#[derive(Default)]
	pub struct FakeTransport {
		pub numa_map: Mutex<Option<NumaMap>>,
	}

	impl Transport for FakeTransport {
		fn open_handle(&self) -> Result<Handle> {
			Err(Error::Unsupported("FakeTransport has no real handles".into()))
		}

		fn map_api_region(&self, _handle: &Handle) -> Result<MappedRegion> {
			Err(Error::Unsupported("FakeTransport cannot map memory".into()))
		}

		fn map_op_buffer(&self, _handle: &Handle, _max_op_size: usize) -> Result<MappedRegion> {
			Err(Error::Unsupported("FakeTransport cannot map memory".into()))
		}

		fn map_pmem(&self, _handle: &Handle, _num_blocks: u64, _block_size: u64) -> Result<MappedRegion> {
			Err(Error::Unsupported("FakeTransport cannot map memory".into()))
		}

		fn numa_map(&self, _handle: &Handle) -> Result<NumaMap> {
			self.numa_map
				.lock()
				.expect("lock poisoned")
				.clone()
				.ok_or_else(|| Error::Io(std::io::Error::other("no numa map configured")))
		}

		fn wait_for_operation(&self, _handle: &Handle, _buf: &mut [u8]) -> Result<()> {
			Err(Error::Io(std::io::Error::other("FakeTransport never has operations")))
		}

		fn receive_mount(&self, _buf: &mut [u8]) -> Result<()> {
			Err(Error::Io(std::io::Error::other("FakeTransport never has mount messages")))
		}

		fn break_all(&self, _handle: &Handle) -> Result<()> { Ok(()) }

		fn register_worker(&self, _handle: &Handle, _cpu: usize, _channel: usize, _max_op_size: usize) -> Result<()> {
			Ok(())
		}

		fn alloc_exec_buffer(&self, _handle: &Handle, _size: usize) -> Result<MappedRegion> {
			Err(Error::Unsupported("FakeTransport cannot map memory".into()))
		}

		fn register_fs_type(&self, _handle: &Handle, _name: &str) -> Result<()> { Ok(()) }

		fn unregister_fs_type(&self, _handle: &Handle, _name: &str) -> Result<()> { Ok(()) }
	}
}
