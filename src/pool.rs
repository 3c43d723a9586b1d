//! Pool lifecycle: worker-count derivation from topology and configuration,
//! thread spawning and cooperative shutdown.

use std::fmt;
use std::io;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use crate::affinity::bind_thread;
use crate::config::ThreadingConfig;
use crate::context::RasterContext;
use crate::topology::Topology;
use crate::worker::{Worker, WorkerCaps, WorkerParams};

/// Pool construction failure.
#[derive(Debug)]
pub enum PoolError {
    /// The topology probe found no usable cores; no worker can be placed.
    EmptyTopology,
    /// The OS refused to spawn a worker thread.
    Spawn(io::Error),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::EmptyTopology => write!(f, "processor topology probe found no cores"),
            PoolError::Spawn(e) => write!(f, "failed to spawn worker thread: {}", e),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::Spawn(e) => Some(e),
            PoolError::EmptyTopology => None,
        }
    }
}

/// Placement of one worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerAssignment {
    pub worker_id: u32,
    pub numa_id: u32,
    pub core_id: u32,
    pub ht_id: u32,
    pub proc_group_id: u32,
    pub thread_id: u32,
    pub force_bind_proc_group: bool,
}

/// The derived worker layout: how many threads, where they go, and how many
/// front-end and back-end scheduling passes each draw must account for.
#[derive(Debug, Clone)]
pub struct ThreadPlan {
    pub workers: Vec<WorkerAssignment>,
    pub numa_mask: u32,
    pub single_threaded: bool,
    pub num_fe_threads: u32,
    pub num_be_threads: u32,
}

impl ThreadPlan {
    /// Plan for inline execution on the API thread only.
    pub fn single_threaded_plan() -> Self {
        ThreadPlan {
            workers: Vec::new(),
            numa_mask: 0,
            single_threaded: true,
            num_fe_threads: 1,
            num_be_threads: 1,
        }
    }

    /// Worker statistics slots each draw context must carry.
    pub fn stats_slots(&self) -> usize {
        if self.single_threaded {
            1
        } else {
            self.workers.len().max(1)
        }
    }

    /// Derive the worker layout from a probed topology and the configured
    /// clamps.
    pub fn derive(config: &ThreadingConfig, topo: &Topology) -> Result<Self, PoolError> {
        if topo.nodes.is_empty() || topo.nodes[0].cores.is_empty() {
            return Err(PoolError::EmptyTopology);
        }
        if config.single_threaded {
            return Ok(Self::single_threaded_plan());
        }

        let num_hw_nodes = topo.nodes.len() as u32;
        let num_hw_cores_per_node = topo.nodes[0].cores.len() as u32;
        let num_hw_hyperthreads = topo.nodes[0].cores[0].thread_ids.len() as u32;
        let num_hw_threads = topo.num_hw_threads();

        let mut num_nodes = num_hw_nodes;
        let mut num_cores_per_node = num_hw_cores_per_node;
        let mut num_hyperthreads = num_hw_hyperthreads;

        if config.max_numa_nodes != 0 {
            num_nodes = num_nodes.min(config.max_numa_nodes);
        }
        if config.max_cores_per_numa_node != 0 {
            num_cores_per_node = num_cores_per_node.min(config.max_cores_per_numa_node);
        }
        if config.max_threads_per_core != 0 {
            num_hyperthreads = num_hyperthreads.min(config.max_threads_per_core);
        }

        // A 32-bit process can only address 32 affinity bits per group;
        // keep every derived thread bindable.
        #[cfg(target_pointer_width = "32")]
        if config.max_worker_threads == 0 && num_cores_per_node * num_hw_hyperthreads > 32 {
            num_cores_per_node = 32 / num_hw_hyperthreads;
        }

        let mut num_threads =
            (num_nodes * num_cores_per_node * num_hyperthreads).min(num_hw_threads);

        if config.max_worker_threads != 0 {
            let max_hw_threads = num_hw_nodes * num_hw_cores_per_node * num_hw_hyperthreads;
            num_threads = config.max_worker_threads.min(max_hw_threads);
        }

        let mut num_api_reserved_threads = 1u32;

        if num_threads == 1 {
            // A single worker sharing the API thread's core helps nobody.
            // Grow along the first axis with headroom; failing that, run
            // everything on the API thread.
            if num_cores_per_node < num_hw_cores_per_node {
                num_cores_per_node += 1;
            } else if num_hyperthreads < num_hw_hyperthreads {
                num_hyperthreads += 1;
            } else if num_nodes < num_hw_nodes {
                num_nodes += 1;
            } else {
                return Ok(Self::single_threaded_plan());
            }
        } else if num_threads > num_api_reserved_threads {
            num_threads -= num_api_reserved_threads;
        } else {
            num_api_reserved_threads = 0;
        }

        let mut workers = Vec::new();
        let mut numa_mask = 0u32;

        if config.max_worker_threads != 0 {
            // Override path: no per-thread placement, but threads are still
            // spread round-robin across processor groups, with a forced
            // group bind when the request spans more than one group.
            let threads_per_group = topo.threads_per_proc_group.max(1);
            let force_bind = num_threads > threads_per_group;
            let num_proc_groups = (num_threads + threads_per_group - 1) / threads_per_group;
            for worker_id in 0..num_threads {
                workers.push(WorkerAssignment {
                    worker_id,
                    numa_id: 0,
                    core_id: 0,
                    ht_id: 0,
                    proc_group_id: worker_id % num_proc_groups,
                    thread_id: 0,
                    force_bind_proc_group: force_bind,
                });
            }
        } else {
            // Valid as a node selector only for power-of-two node counts;
            // otherwise it degrades to a locality hint, which the back-end
            // loop tolerates.
            numa_mask = num_nodes - 1;

            let mut api_reserved = num_api_reserved_threads;
            let mut worker_id = 0u32;
            'nodes: for (n, node) in topo.nodes.iter().enumerate().take(num_nodes as usize) {
                for (c, core) in node
                    .cores
                    .iter()
                    .enumerate()
                    .take(num_cores_per_node as usize)
                {
                    for (t, &thread_id) in core
                        .thread_ids
                        .iter()
                        .enumerate()
                        .take(num_hyperthreads as usize)
                    {
                        if api_reserved > 0 {
                            api_reserved -= 1;
                            continue;
                        }
                        if worker_id >= num_threads {
                            break 'nodes;
                        }
                        workers.push(WorkerAssignment {
                            worker_id,
                            numa_id: n as u32,
                            core_id: c as u32,
                            ht_id: t as u32,
                            proc_group_id: core.proc_group,
                            thread_id,
                            force_bind_proc_group: false,
                        });
                        worker_id += 1;
                    }
                }
            }
        }

        if workers.is_empty() {
            log::warn!("thread plan produced no spawnable workers, running single-threaded");
            return Ok(Self::single_threaded_plan());
        }

        // Asymmetric topologies can yield fewer assignable slots than the
        // symmetric estimate; the spawned count is what retirement must
        // account for.
        let spawned = workers.len() as u32;
        Ok(ThreadPlan {
            workers,
            numa_mask,
            single_threaded: false,
            num_fe_threads: spawned,
            num_be_threads: spawned,
        })
    }
}

/// The running worker pool.
///
/// Dropping the pool performs the same cooperative shutdown as
/// [`ThreadPool::shutdown`]: flag, fence, broadcast, join in id order.
pub struct ThreadPool {
    ctx: Arc<RasterContext>,
    workers: Vec<Worker>,
    shut_down: bool,
}

impl ThreadPool {
    /// Spawn workers according to the context's thread plan.
    ///
    /// In single-threaded mode no threads are spawned and submits run
    /// inline on the API thread.
    pub fn create(ctx: &Arc<RasterContext>) -> Result<Self, PoolError> {
        // Settle the API thread onto hardware thread 0 first, the slot the
        // plan reserved for it.
        bind_thread(&ctx.config, 0, 0, false);

        let mut pool = ThreadPool {
            ctx: Arc::clone(ctx),
            workers: Vec::new(),
            shut_down: false,
        };

        if ctx.plan.single_threaded {
            return Ok(pool);
        }

        for assignment in &ctx.plan.workers {
            let params = WorkerParams {
                ctx: Arc::clone(ctx),
                worker_id: assignment.worker_id,
                numa_id: assignment.numa_id,
                thread_id: assignment.thread_id,
                proc_group_id: assignment.proc_group_id,
                force_bind_proc_group: assignment.force_bind_proc_group,
                caps: WorkerCaps::FrontAndBack,
            };
            match Worker::spawn(params) {
                Ok(worker) => pool.workers.push(worker),
                Err(e) => {
                    // Tear down whatever came up before reporting failure.
                    pool.shutdown_inner();
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        Ok(pool)
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Cooperative shutdown: set the flag under the wait lock, broadcast,
    /// then join every worker in id order.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        {
            let _guard = self.ctx.wait_mutex.lock().unwrap();
            self.ctx.in_shutdown.store(true, Ordering::Release);
            fence(Ordering::SeqCst);
            self.ctx.fifos_not_empty.notify_all();
        }

        for worker in self.workers.drain(..) {
            let id = worker.id();
            if worker.join().is_err() {
                log::error!("worker {} panicked during execution", id);
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
