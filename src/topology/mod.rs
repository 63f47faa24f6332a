//! NUMA/CPU topology discovery: a single immutable snapshot, queried once
//! from the kernel transport before any worker is created.

use zufs_core::{Result, warn};
use zufs_transport::{Handle, NumaMap, Transport};

/// A process-wide, read-only map of which CPUs exist, which are online, and
/// which NUMA node each belongs to.
///
/// Constructed exactly once via [`Topology::init`] and never mutated
/// afterward, so every query below can run lock-free.
#[derive(Clone, Debug)]
pub struct Topology {
	possible_cpus: usize,
	possible_nodes: usize,
	cpu_set_per_node: Vec<Vec<usize>>,
	/// Reverse of `cpu_set_per_node`, indexed by cpu; `None` means offline.
	cpu_to_node: Vec<Option<usize>>,
}

impl Topology {
	/// Issues a single topology query against the kernel transport. Must be
	/// called exactly once, before any worker thread is created.
	pub fn init(transport: &dyn Transport, handle: &Handle) -> Result<Self> {
		let map = transport.numa_map(handle)?;
		Ok(Self::from_numa_map(map))
	}

	/// Builds a topology map directly from an already-queried [`NumaMap`],
	/// bypassing a kernel round-trip. Primarily for tests and for injecting
	/// a fixed topology into a [`crate::Daemon`]-style test harness.
	#[must_use]
	pub fn from_numa_map(map: NumaMap) -> Self {
		let mut cpu_to_node = vec![None; map.possible_cpus];
		for (node, cpus) in map.cpu_set_per_node.iter().enumerate() {
			for &cpu in cpus {
				if cpu < cpu_to_node.len() {
					cpu_to_node[cpu] = Some(node);
				}
			}
		}

		Self {
			possible_cpus: map.possible_cpus,
			possible_nodes: map.possible_nodes,
			cpu_set_per_node: map.cpu_set_per_node,
			cpu_to_node,
		}
	}

	#[must_use]
	pub fn num_possible_cpus(&self) -> usize { self.possible_cpus }

	#[must_use]
	pub fn num_possible_nodes(&self) -> usize { self.possible_nodes }

	#[must_use]
	pub fn num_online_cpus(&self) -> usize { self.cpu_to_node.iter().filter(|n| n.is_some()).count() }

	#[must_use]
	pub fn cpu_online(&self, cpu: usize) -> bool { self.cpu_to_node.get(cpu).copied().flatten().is_some() }

	/// Returns the node owning `cpu`. Per the original's `BAD_CPU`
	/// convention, an unknown cpu logs a warning and returns node 0 rather
	/// than aborting the process.
	#[must_use]
	pub fn cpu_to_node(&self, cpu: usize) -> usize {
		match self.cpu_to_node.get(cpu).copied().flatten() {
			Some(node) => node,
			None => {
				warn!(cpu, "cpu_to_node: unknown or offline cpu, defaulting to node 0");
				0
			},
		}
	}

	pub fn for_each_online_cpu(&self, mut f: impl FnMut(usize)) {
		for (cpu, node) in self.cpu_to_node.iter().enumerate() {
			if node.is_some() {
				f(cpu);
			}
		}
	}

	/// The set of cpus belonging to `node`, empty if `node` is out of range.
	#[must_use]
	pub fn affinity_for_node(&self, node: usize) -> &[usize] {
		self.cpu_set_per_node.get(node).map_or(&[], Vec::as_slice)
	}

	/// A single-cpu affinity set, empty if `cpu` is unknown.
	#[must_use]
	pub fn affinity_for_cpu(&self, cpu: usize) -> &[usize] {
		match self.cpu_to_node.get(cpu).copied().flatten() {
			Some(node) => self.affinity_for_node(node),
			None => &[],
		}
	}
}

#[cfg(test)]
mod tests {
	use zufs_transport::NumaMap;

	use super::Topology;

	fn sample() -> Topology {
		Topology::from_numa_map(NumaMap {
			possible_cpus: 4,
			possible_nodes: 2,
			cpu_set_per_node: vec![vec![0, 1], vec![2, 3]],
		})
	}

	#[test]
	fn online_cpu_count() { assert_eq!(sample().num_online_cpus(), 4); }

	#[test]
	fn cpu_to_node_maps_correctly() {
		let topo = sample();
		assert_eq!(topo.cpu_to_node(2), 1);
		assert_eq!(topo.cpu_to_node(0), 0);
	}

	#[test]
	fn affinity_for_node_matches_seed() {
		assert_eq!(sample().affinity_for_node(0), &[0, 1]);
	}

	#[test]
	fn unknown_cpu_defaults_to_node_zero_without_panicking() {
		let topo = sample();
		assert_eq!(topo.cpu_to_node(99), 0);
		assert!(!topo.cpu_online(99));
	}

	#[test]
	fn online_iff_member_of_its_nodes_set() {
		let topo = sample();
		for cpu in 0..topo.num_possible_cpus() {
			let node = topo.cpu_to_node(cpu);
			assert_eq!(topo.cpu_online(cpu), topo.affinity_for_node(node).contains(&cpu));
		}
	}
}
