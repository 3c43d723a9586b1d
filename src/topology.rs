//! Processor topology discovery.
//!
//! Produces the three-level NUMA node / core / hardware thread hierarchy the
//! pool is built against, plus the logical thread count of processor group 0.
//! On Linux the probe parses `/proc/cpuinfo`; elsewhere it falls back to a
//! flat single-node layout enumerated through `sysinfo`.

use std::collections::HashSet;
#[cfg(target_os = "linux")]
use std::fs::File;
use std::io::BufRead;
#[cfg(target_os = "linux")]
use std::io::BufReader;

/// A physical core: its processor group and the hardware threads it hosts.
#[derive(Debug, Clone, Default)]
pub struct Core {
    pub proc_group: u32,
    pub thread_ids: Vec<u32>,
}

/// One NUMA node and the cores attached to it.
#[derive(Debug, Clone, Default)]
pub struct NumaNode {
    pub cores: Vec<Core>,
}

/// Normalized host topology.
///
/// Guarantees after [`Topology::probe`]: every stored core has a non-empty
/// `thread_ids` list, and duplicate `(proc_group, thread)` pairs have been
/// dropped. Per-node core counts are preserved as probed, so asymmetric
/// parts keep their asymmetry.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub nodes: Vec<NumaNode>,
    pub threads_per_proc_group: u32,
}

impl Topology {
    /// Probe the host.
    pub fn probe() -> Self {
        #[cfg(target_os = "linux")]
        {
            if let Ok(file) = File::open("/proc/cpuinfo") {
                if let Some(topo) = Self::from_cpuinfo(BufReader::new(file)) {
                    return topo;
                }
            }
            log::warn!("failed to parse /proc/cpuinfo, using flat topology");
        }

        Self::detect_flat()
    }

    /// Parse a `/proc/cpuinfo` stream.
    ///
    /// Each `processor` record flushes the previously accumulated
    /// `(thread, core, physical id)` triple into the topology. The socket
    /// (`physical id`) stands in for the NUMA node, which under-reports
    /// nodes on multi-NUMA-per-socket parts; this matches the historical
    /// behavior and is deliberately left unchanged.
    ///
    /// Returns `None` if the stream yields no processors.
    pub fn from_cpuinfo<R: BufRead>(input: R) -> Option<Self> {
        let mut topo = Topology::default();
        let mut thread_id: Option<u32> = None;
        let mut core_id: u32 = 0;
        let mut numa_id: u32 = 0;

        fn flush(topo: &mut Topology, tid: u32, core: u32, numa: u32) {
            let numa = numa as usize;
            let core_idx = core as usize;
            if topo.nodes.len() <= numa {
                topo.nodes.resize_with(numa + 1, NumaNode::default);
            }
            let node = &mut topo.nodes[numa];
            if node.cores.len() <= core_idx {
                node.cores.resize_with(core_idx + 1, Core::default);
            }
            node.cores[core_idx].proc_group = core;
            node.cores[core_idx].thread_ids.push(tid);
            topo.threads_per_proc_group += 1;
        }

        for line in input.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            if let Some(value) = field_value(&line, "processor") {
                if let Some(tid) = thread_id.take() {
                    flush(&mut topo, tid, core_id, numa_id);
                }
                thread_id = value.parse().ok();
                core_id = 0;
                numa_id = 0;
            } else if let Some(value) = field_value(&line, "core id") {
                core_id = value.parse().unwrap_or(0);
            } else if let Some(value) = field_value(&line, "physical id") {
                numa_id = value.parse().unwrap_or(0);
            }
        }
        if let Some(tid) = thread_id.take() {
            flush(&mut topo, tid, core_id, numa_id);
        }

        topo.normalize();
        if topo.is_empty() {
            None
        } else {
            Some(topo)
        }
    }

    /// Flat single-node fallback: one core per logical CPU, processor groups
    /// of 64 threads.
    fn detect_flat() -> Self {
        use sysinfo::{CpuRefreshKind, System};

        let num_cpus = core_affinity::get_core_ids()
            .map(|ids| ids.len())
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                let mut system = System::new();
                system.refresh_cpu_specifics(CpuRefreshKind::everything());
                system.cpus().len()
            })
            .max(1);

        let mut node = NumaNode::default();
        for cpu in 0..num_cpus as u32 {
            node.cores.push(Core {
                proc_group: cpu / 64,
                thread_ids: vec![cpu],
            });
        }

        let mut topo = Topology {
            threads_per_proc_group: (num_cpus as u32).min(64),
            nodes: vec![node],
        };
        topo.normalize();
        topo
    }

    /// Drop duplicate `(proc_group, thread)` pairs, then erase empty cores.
    ///
    /// A duplicate pair means the probe reported more threads than the
    /// current process can address in one affinity word; only the first
    /// sighting is usable.
    fn normalize(&mut self) {
        let mut seen: HashSet<(u32, u32)> = HashSet::new();
        for node in &mut self.nodes {
            for core in &mut node.cores {
                let group = core.proc_group;
                core.thread_ids.retain(|&tid| seen.insert((group, tid)));
            }
            node.cores.retain(|core| !core.thread_ids.is_empty());
        }
    }

    /// Total hardware threads across all nodes. Summed per core because
    /// asymmetric topologies make `nodes * cores * threads` wrong.
    pub fn num_hw_threads(&self) -> u32 {
        self.nodes
            .iter()
            .flat_map(|n| n.cores.iter())
            .map(|c| c.thread_ids.len() as u32)
            .sum()
    }

    /// True when no usable core was probed.
    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(|n| n.cores.is_empty())
    }
}

fn field_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    if !line.starts_with(key) {
        return None;
    }
    line.split_once(':').map(|(_, v)| v.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpuinfo(records: &[(u32, u32, u32)]) -> String {
        let mut s = String::new();
        for (processor, core, physical) in records {
            s.push_str(&format!(
                "processor\t: {}\nvendor_id\t: GenuineIntel\ncore id\t\t: {}\nphysical id\t: {}\ncpu MHz\t\t: 3400.0\n\n",
                processor, core, physical
            ));
        }
        s
    }

    #[test]
    fn parses_two_socket_hyperthreaded_box() {
        // 2 sockets x 2 cores x 2 HT
        let text = cpuinfo(&[
            (0, 0, 0),
            (1, 1, 0),
            (2, 0, 1),
            (3, 1, 1),
            (4, 0, 0),
            (5, 1, 0),
            (6, 0, 1),
            (7, 1, 1),
        ]);
        let topo = Topology::from_cpuinfo(text.as_bytes()).unwrap();

        assert_eq!(topo.nodes.len(), 2);
        assert_eq!(topo.nodes[0].cores.len(), 2);
        assert_eq!(topo.nodes[0].cores[0].thread_ids, vec![0, 4]);
        assert_eq!(topo.nodes[1].cores[1].thread_ids, vec![3, 7]);
        assert_eq!(topo.threads_per_proc_group, 8);
        assert_eq!(topo.num_hw_threads(), 8);
    }

    #[test]
    fn preserves_asymmetric_core_counts() {
        let text = cpuinfo(&[(0, 0, 0), (1, 1, 0), (2, 2, 0), (3, 0, 1)]);
        let topo = Topology::from_cpuinfo(text.as_bytes()).unwrap();

        assert_eq!(topo.nodes[0].cores.len(), 3);
        assert_eq!(topo.nodes[1].cores.len(), 1);
        assert_eq!(topo.num_hw_threads(), 4);
    }

    #[test]
    fn erases_cores_with_no_threads() {
        // Core ids 0 and 2 only: slot 1 is created by the resize but stays
        // empty and must be erased.
        let text = cpuinfo(&[(0, 0, 0), (1, 2, 0)]);
        let topo = Topology::from_cpuinfo(text.as_bytes()).unwrap();

        assert_eq!(topo.nodes[0].cores.len(), 2);
        assert!(topo.nodes[0].cores.iter().all(|c| !c.thread_ids.is_empty()));
    }

    #[test]
    fn drops_duplicate_group_thread_pairs() {
        let mut topo = Topology {
            nodes: vec![NumaNode {
                cores: vec![
                    Core { proc_group: 0, thread_ids: vec![0, 1] },
                    Core { proc_group: 0, thread_ids: vec![1, 2] },
                ],
            }],
            threads_per_proc_group: 4,
        };
        topo.normalize();

        assert_eq!(topo.nodes[0].cores[0].thread_ids, vec![0, 1]);
        assert_eq!(topo.nodes[0].cores[1].thread_ids, vec![2]);
    }

    #[test]
    fn empty_input_yields_none() {
        assert!(Topology::from_cpuinfo("".as_bytes()).is_none());
    }

    #[test]
    fn probe_host_is_nonempty() {
        let topo = Topology::probe();
        assert!(!topo.is_empty());
        assert!(topo.num_hw_threads() >= 1);
        for node in &topo.nodes {
            for core in &node.cores {
                assert!(!core.thread_ids.is_empty());
            }
        }
    }
}
