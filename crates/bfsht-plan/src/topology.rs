// crates/bfsht-plan/src/topology.rs

//! Machine topology seam: node/CPU enumeration and thread pinning.
//!
//! The planner only ever talks to this trait, so the NUMA story stays
//! testable: production uses [`MachineTopology`] (one node spanning the
//! visible cores, pinning via `core_affinity`), while tests substitute a
//! [`StubTopology`] with any node/CPU shape and no-op binding. Node-local
//! placement of buffers is expressed by first-touch: allocation and the
//! first write happen on the thread already bound to the owning CPU.

use tracing::warn;

/// Topology node index (NUMA node in production).
pub type NodeId = usize;
/// CPU index within the topology.
pub type CpuId = usize;

/// Node/CPU enumeration and binding.
pub trait Topology: Send + Sync {
    /// Nodes the current process may run and allocate on.
    fn runnable_nodes(&self) -> Vec<NodeId>;

    /// CPUs of `node`, ascending.
    fn cpus_on_node(&self, node: NodeId) -> Vec<CpuId>;

    /// Pin the calling thread to `cpu`. Best effort; failures are logged,
    /// not fatal.
    fn bind_current_thread(&self, cpu: CpuId);
}

/// The host machine as a single node over its visible cores.
#[derive(Debug)]
pub struct MachineTopology {
    cores: Vec<core_affinity::CoreId>,
}

impl MachineTopology {
    /// Enumerate the host cores.
    #[must_use]
    pub fn new() -> Self {
        let cores = core_affinity::get_core_ids().unwrap_or_default();
        Self { cores }
    }

    /// Number of usable cores (1 minimum so planning never degenerates).
    #[must_use]
    pub fn ncores(&self) -> usize {
        self.cores.len().max(1)
    }
}

impl Default for MachineTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology for MachineTopology {
    fn runnable_nodes(&self) -> Vec<NodeId> {
        vec![0]
    }

    fn cpus_on_node(&self, node: NodeId) -> Vec<CpuId> {
        debug_assert_eq!(node, 0);
        (0..self.ncores()).collect()
    }

    fn bind_current_thread(&self, cpu: CpuId) {
        match self.cores.get(cpu) {
            Some(&core) => {
                if !core_affinity::set_for_current(core) {
                    warn!(cpu, "failed to pin thread to core");
                }
            }
            None => warn!(cpu, "no such core to pin to"),
        }
    }
}

/// Fixed-shape topology for tests: `nodes × cpus_per_node`, binding is a
/// no-op.
#[derive(Clone, Copy, Debug)]
pub struct StubTopology {
    /// Node count.
    pub nodes: usize,
    /// CPUs per node.
    pub cpus_per_node: usize,
}

impl Topology for StubTopology {
    fn runnable_nodes(&self) -> Vec<NodeId> {
        (0..self.nodes).collect()
    }

    fn cpus_on_node(&self, node: NodeId) -> Vec<CpuId> {
        (0..self.cpus_per_node)
            .map(|i| node * self.cpus_per_node + i)
            .collect()
    }

    fn bind_current_thread(&self, _cpu: CpuId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_shapes_cpu_ids_disjointly() {
        let t = StubTopology {
            nodes: 2,
            cpus_per_node: 3,
        };
        assert_eq!(t.runnable_nodes(), vec![0, 1]);
        assert_eq!(t.cpus_on_node(0), vec![0, 1, 2]);
        assert_eq!(t.cpus_on_node(1), vec![3, 4, 5]);
    }

    #[test]
    fn machine_topology_is_single_node() {
        let t = MachineTopology::new();
        assert_eq!(t.runnable_nodes(), vec![0]);
        assert!(!t.cpus_on_node(0).is_empty());
    }
}
