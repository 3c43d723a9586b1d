//! Threading knobs for pool construction and the draw ring.
//!
//! All limits default to 0, meaning "derive from the host topology". The
//! values mirror the environment knobs of the reference rasterizer driver so
//! embedders can map them straight through.

use serde::{Deserialize, Serialize};

/// Tunable threading configuration consumed at context creation.
///
/// A zero value for any of the `max_*` clamps leaves that axis unclamped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadingConfig {
    /// Overrides the topology-derived worker count and disables per-thread
    /// pinning. Workers are then distributed round-robin across processor
    /// groups. 0 = use the topology.
    pub max_worker_threads: u32,

    /// Upper bound on NUMA nodes used. 0 = all probed nodes.
    pub max_numa_nodes: u32,

    /// Upper bound on cores used per NUMA node. 0 = all probed cores.
    pub max_cores_per_numa_node: u32,

    /// Upper bound on hardware threads used per core. 0 = all probed threads.
    pub max_threads_per_core: u32,

    /// Spawn no worker threads; the API thread performs all work inline at
    /// submit time.
    pub single_threaded: bool,

    /// Number of pause-loop iterations an idle worker spins before blocking
    /// on the pool condition variable.
    pub spin_loop_count: u32,

    /// Capacity of the in-flight draw ring. Rounded up to the next power of
    /// two so slot indices stay exact across 32-bit draw-id wrap-around.
    pub max_draws_in_flight: u32,
}

impl ThreadingConfig {
    pub const DEFAULT_SPIN_LOOP_COUNT: u32 = 5000;
    pub const DEFAULT_MAX_DRAWS_IN_FLIGHT: u32 = 64;

    /// Effective ring capacity: `max_draws_in_flight` rounded up to a power
    /// of two. Capped below 2^31 so signed-delta draw-id ordering holds.
    pub fn ring_capacity(&self) -> u32 {
        self.max_draws_in_flight.next_power_of_two()
    }

    /// Validate invariants, panicking on violation.
    pub fn validate(&self) {
        assert!(
            self.max_draws_in_flight >= 2,
            "max_draws_in_flight must be >= 2, got {}",
            self.max_draws_in_flight
        );
        assert!(
            self.max_draws_in_flight <= 1 << 30,
            "max_draws_in_flight must stay below 2^30, got {}",
            self.max_draws_in_flight
        );
    }
}

impl Default for ThreadingConfig {
    fn default() -> Self {
        ThreadingConfig {
            max_worker_threads: 0,
            max_numa_nodes: 0,
            max_cores_per_numa_node: 0,
            max_threads_per_core: 0,
            single_threaded: false,
            spin_loop_count: Self::DEFAULT_SPIN_LOOP_COUNT,
            max_draws_in_flight: Self::DEFAULT_MAX_DRAWS_IN_FLIGHT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ThreadingConfig::default().validate();
    }

    #[test]
    fn ring_capacity_rounds_to_power_of_two() {
        let mut cfg = ThreadingConfig::default();
        cfg.max_draws_in_flight = 96;
        assert_eq!(cfg.ring_capacity(), 128);

        cfg.max_draws_in_flight = 4;
        assert_eq!(cfg.ring_capacity(), 4);
    }

    #[test]
    #[should_panic(expected = "max_draws_in_flight must be >= 2")]
    fn rejects_tiny_ring() {
        let mut cfg = ThreadingConfig::default();
        cfg.max_draws_in_flight = 1;
        cfg.validate();
    }

    #[test]
    fn deserializes_partial_config() {
        let cfg: ThreadingConfig =
            serde_json::from_str(r#"{"max_worker_threads": 8}"#).unwrap();
        assert_eq!(cfg.max_worker_threads, 8);
        assert_eq!(cfg.spin_loop_count, ThreadingConfig::DEFAULT_SPIN_LOOP_COUNT);
    }
}
