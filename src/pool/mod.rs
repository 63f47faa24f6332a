//! The worker pool (spec Section 4.F): a rectangular `zts[channel][cpu]`
//! grid of Zu-Threads, started once per mount and torn down as a unit.

use std::sync::{Arc, Mutex};

use zufs_core::{Error, Result, error};
use zufs_dispatch::Session;
use zufs_threads::{Barrier, Pin, ThreadParams};
use zufs_topology::Topology;
use zufs_transport::{MAX_ZT_CHANNELS, Transport};
use zufs_worker::ZuThread;

/// `zts[channel][cpu]`, `None` where `cpu` is offline or its worker failed
/// to even get a platform thread.
type Grid = Vec<Vec<Option<ZuThread>>>;

/// Owns the per-`(cpu, channel)` worker grid. `start`/`stop` are a total
/// operation each: either every online cpu in every requested channel ends
/// up running, or none do.
pub struct WorkerPool {
	transport: Arc<dyn Transport>,
	topology: Arc<Topology>,
	max_channels: usize,
	barrier: Arc<Barrier>,
	zts: Mutex<Grid>,
}

impl WorkerPool {
	#[must_use]
	pub fn new(transport: Arc<dyn Transport>, topology: Arc<Topology>) -> Self {
		Self::with_max_channels(transport, topology, MAX_ZT_CHANNELS)
	}

	#[must_use]
	pub fn with_max_channels(transport: Arc<dyn Transport>, topology: Arc<Topology>, max_channels: usize) -> Self {
		Self {
			transport,
			topology,
			max_channels,
			barrier: Arc::new(Barrier::new()),
			zts: Mutex::new(Vec::new()),
		}
	}

	#[must_use]
	pub fn is_started(&self) -> bool { !self.zts.lock().expect("pool lock poisoned").is_empty() }

	/// Starts `num_channels` channels' worth of Zu-Threads, one per online
	/// cpu, pinned per spec 4.F. `params` supplies the scheduling
	/// policy/priority shared by every worker; its name and pin are
	/// overwritten per worker. On any failure, every worker started so far
	/// (in this call or a previous one) is stopped before the error
	/// returns — `start` never leaves a partial pool running.
	pub fn start(&self, params: &ThreadParams, num_channels: usize, session: Arc<Session>) -> Result<()> {
		if num_channels > self.max_channels {
			return Err(Error::InvalidArgument(format!(
				"num_channels {num_channels} exceeds the pool's max_channels {}",
				self.max_channels
			)));
		}

		{
			let guard = self.zts.lock().expect("pool lock poisoned");
			if !guard.is_empty() {
				return Err(Error::AlreadyExists("worker pool already started".into()));
			}
		}

		let online = self.topology.num_online_cpus();
		let num_workers = self.topology.num_possible_cpus();
		let mut grid: Grid = Vec::with_capacity(num_channels);

		for channel in 0..num_channels {
			self.barrier.arm(online);

			let mut row: Vec<Option<ZuThread>> = (0..num_workers).map(|_| None).collect();
			self.topology.for_each_online_cpu(|cpu| {
				let mut worker_params = params.clone();
				worker_params.name = format!("ZT({cpu}.{channel})");
				worker_params.pin = Pin::Cpu(cpu);

				match ZuThread::spawn(
					worker_params,
					cpu,
					channel,
					Arc::clone(&self.transport),
					Arc::clone(&session),
					Arc::clone(&self.barrier),
				) {
					Ok(zt) => row[cpu] = Some(zt),
					Err(e) => {
						error!(cpu, channel, "failed to spawn Zu-Thread: {e}");
						self.barrier.release();
					},
				}
			});

			self.barrier.wait();
			grid.push(row);
		}

		let mut online_cpus = Vec::new();
		self.topology.for_each_online_cpu(|cpu| online_cpus.push(cpu));

		let failed = grid.iter().enumerate().any(|(_, row)| {
			online_cpus.iter().any(|&cpu| match &row[cpu] {
				None => true,
				Some(zt) => zt.last_err() != 0,
			})
		});

		*self.zts.lock().expect("pool lock poisoned") = grid;

		if failed {
			self.stop();
			return Err(Error::Resource("one or more Zu-Threads failed to start".into()));
		}

		Ok(())
	}

	/// Stops every running worker, channel by channel: flips each worker's
	/// `stop` flag, breaks the kernel wait with any one worker's handle,
	/// joins every started thread, then drops the channel's slice.
	/// Idempotent — calling this on an empty or already-stopped pool is a
	/// no-op (spec 4.F).
	pub fn stop(&self) {
		let mut grid = std::mem::take(&mut *self.zts.lock().expect("pool lock poisoned"));

		for row in &mut grid {
			for zt in row.iter().flatten() {
				zt.request_stop();
			}

			if let Some(handle) = row.iter().flatten().find_map(ZuThread::kernel_handle) {
				if let Err(e) = self.transport.break_all(handle) {
					error!("break_all during pool stop: {e}");
				}
			}

			for zt in row.iter_mut().flatten() {
				if let Err(e) = zt.join() {
					error!("joining Zu-Thread during pool stop: {e}");
				}
			}
		}

		self.barrier.init();
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use zufs_topology::Topology;
	use zufs_transport::{NumaMap, test_support::FakeTransport};

	// A real start/stop cycle needs an actual kernel transport (the fake
	// errors on every handle/mmap operation); this test only exercises the
	// ceiling check that runs before any worker is spawned.
	#[test]
	fn start_rejects_channels_above_the_ceiling() {
		let transport: Arc<dyn zufs_transport::Transport> = Arc::new(FakeTransport::default());
		let topology = Arc::new(Topology::from_numa_map(NumaMap {
			possible_cpus: 1,
			possible_nodes: 1,
			cpu_set_per_node: vec![vec![0]],
		}));
		let pool = super::WorkerPool::with_max_channels(transport, topology, 2);
		let params = zufs_threads::ThreadParams::default();
		let session = Arc::new(zufs_dispatch::Session::new(Arc::new(NoopSbi)));

		let err = pool.start(&params, 3, session).unwrap_err();
		assert!(matches!(err, zufs_core::Error::InvalidArgument(_)));
	}

	struct NoopSbi;
	impl zufs_dispatch::SuperblockOps for NoopSbi {
		fn new_inode(&self, _dir: u64, _tmpfile: bool) -> zufs_core::Result<u64> { unimplemented!() }

		fn lookup(&self, _dir: u64, _name: &str) -> zufs_core::Result<Option<u64>> { unimplemented!() }

		fn dir_parent(&self, _dir: u64) -> zufs_core::Result<u64> { unimplemented!() }

		fn open_inode(&self, _ino: u64) -> zufs_core::Result<Arc<dyn zufs_dispatch::InodeOps>> { unimplemented!() }

		fn add_dentry(&self, _dir: u64, _name: &str, _ino: u64) -> zufs_core::Result<()> { unimplemented!() }

		fn remove_dentry(&self, _dir: u64, _name: &str) -> zufs_core::Result<()> { unimplemented!() }

		fn free_inode(&self, _ino: u64) -> zufs_core::Result<()> { unimplemented!() }

		fn sbi_init(&self, _pmem: &zufs_dispatch::PmemRegion) -> zufs_core::Result<zufs_dispatch::SbiInit> {
			unimplemented!()
		}
	}
}
