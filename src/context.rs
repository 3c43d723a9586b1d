//! The shared rasterizer context: draw ring, client callbacks and the
//! worker wake/shutdown machinery.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crossbeam::utils::Backoff;

use crate::config::ThreadingConfig;
use crate::dispatch::ComputeFn;
use crate::draw::{ComputeWork, DrawPayload, DrawSlot, FeWork, FeWorkFn, RetireCallback};
use crate::pool::{PoolError, ThreadPlan};
use crate::ring::DrawRing;
use crate::schedule::{self, WorkerState};
use crate::stats::{DrawStats, FeStatsSnapshot, MAX_SO_BUFFERS};
use crate::topology::Topology;

/// Hot-tile initialization, invoked once per macrotile before its first
/// `Draw`-kind work item executes.
pub trait HotTileManager: Send + Sync {
    fn initialize_hot_tiles(&self, ctx: &RasterContext, dc: &DrawSlot, tile_id: u32);
}

pub type UpdateStatsFn = Arc<dyn Fn(&DrawStats) + Send + Sync>;
pub type UpdateStatsFeFn = Arc<dyn Fn(&FeStatsSnapshot) + Send + Sync>;
pub type UpdateSoWriteOffsetFn = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Client-supplied hooks. All optional; callbacks must not panic.
#[derive(Clone, Default)]
pub struct ClientCallbacks {
    pub update_stats: Option<UpdateStatsFn>,
    pub update_stats_fe: Option<UpdateStatsFeFn>,
    pub update_so_write_offset: Option<UpdateSoWriteOffsetFn>,
    pub hot_tile_mgr: Option<Arc<dyn HotTileManager>>,
}

enum SubmitKind {
    Graphics(FeWork),
    Compute { num_groups: u32, func: ComputeFn },
}

/// Builder for one submitted draw.
pub struct DrawSubmit {
    kind: SubmitKind,
    dependent: bool,
    cleanup_state: bool,
    enable_stats: bool,
    so_write_enable: [bool; MAX_SO_BUFFERS],
    retire_callback: Option<RetireCallback>,
}

impl DrawSubmit {
    /// A graphics draw: front-end geometry followed by tiled back-end work.
    pub fn graphics(func: FeWorkFn, desc: u64) -> Self {
        DrawSubmit {
            kind: SubmitKind::Graphics(FeWork::new(func, desc)),
            dependent: false,
            cleanup_state: false,
            enable_stats: false,
            so_write_enable: [false; MAX_SO_BUFFERS],
            retire_callback: None,
        }
    }

    /// A compute draw with `num_groups` thread groups.
    pub fn compute(num_groups: u32, func: ComputeFn) -> Self {
        DrawSubmit {
            kind: SubmitKind::Compute { num_groups, func },
            dependent: false,
            cleanup_state: false,
            enable_stats: false,
            so_write_enable: [false; MAX_SO_BUFFERS],
            retire_callback: None,
        }
    }

    /// Gate this draw's back-end and compute work on the retirement of the
    /// previous draw.
    pub fn dependent(mut self, dependent: bool) -> Self {
        self.dependent = dependent;
        self
    }

    /// Also reset the pipeline-state arena at retirement.
    pub fn cleanup_state(mut self, cleanup: bool) -> Self {
        self.cleanup_state = cleanup;
        self
    }

    pub fn enable_stats(mut self, enable: bool) -> Self {
        self.enable_stats = enable;
        self
    }

    pub fn so_write_enable(mut self, enable: [bool; MAX_SO_BUFFERS]) -> Self {
        self.so_write_enable = enable;
        self
    }

    pub fn retire_callback(mut self, callback: RetireCallback) -> Self {
        self.retire_callback = Some(callback);
        self
    }

    fn into_payload(self) -> DrawPayload {
        let mut payload = DrawPayload {
            dependent: self.dependent,
            cleanup_state: self.cleanup_state,
            enable_stats: self.enable_stats,
            so_write_enable: self.so_write_enable,
            retire_callback: self.retire_callback,
            ..DrawPayload::default()
        };
        match self.kind {
            SubmitKind::Graphics(fe) => {
                payload.fe_work = Some(fe);
            }
            SubmitKind::Compute { num_groups, func } => {
                payload.is_compute = true;
                payload.compute = Some(ComputeWork::new(num_groups, func));
            }
        }
        payload
    }
}

/// Shared state of one rasterizer instance.
///
/// Workers hold an `Arc` to the context for their whole lifetime; the API
/// thread submits draws through it and may join in as a scheduling helper
/// with its own [`WorkerState`].
pub struct RasterContext {
    pub(crate) config: ThreadingConfig,
    pub(crate) callbacks: ClientCallbacks,
    pub(crate) plan: ThreadPlan,
    pub(crate) ring: DrawRing,

    /// Guards the idle condition; pairs with `fifos_not_empty`.
    pub(crate) wait_mutex: Mutex<()>,
    pub(crate) fifos_not_empty: Condvar,
    pub(crate) in_shutdown: AtomicBool,

    /// Graphics draws whose front end has not completed yet.
    pub(crate) draws_outstanding_fe: AtomicI32,

    /// Serializes enqueues; uncontended in the single-API-thread design.
    api_lock: Mutex<()>,
    /// Scheduling state of the API thread for inline (single-threaded) work.
    api_worker: Mutex<WorkerState>,

    #[cfg(feature = "metrics")]
    pub metrics: crate::metrics::SchedulerMetrics,
}

impl RasterContext {
    /// Probe the host topology, derive the thread plan and build a context.
    pub fn new(
        config: ThreadingConfig,
        callbacks: ClientCallbacks,
    ) -> Result<Arc<Self>, PoolError> {
        config.validate();
        let topology = Topology::probe();
        let plan = ThreadPlan::derive(&config, &topology)?;
        Ok(Self::with_plan(config, callbacks, plan))
    }

    /// Build a context around an explicit thread plan.
    ///
    /// For embedders that host their own scheduling threads: the plan's FE
    /// and BE thread counts must match the number of helper states that
    /// will actually advance past each draw, or retirement accounting
    /// breaks.
    pub fn with_plan(
        config: ThreadingConfig,
        callbacks: ClientCallbacks,
        plan: ThreadPlan,
    ) -> Arc<Self> {
        config.validate();
        let ring = DrawRing::new(config.ring_capacity(), plan.stats_slots());
        Arc::new(RasterContext {
            config,
            callbacks,
            ring,
            wait_mutex: Mutex::new(()),
            fifos_not_empty: Condvar::new(),
            in_shutdown: AtomicBool::new(false),
            draws_outstanding_fe: AtomicI32::new(0),
            api_lock: Mutex::new(()),
            api_worker: Mutex::new(WorkerState::new(0, 0, plan.numa_mask)),
            plan,
            #[cfg(feature = "metrics")]
            metrics: crate::metrics::SchedulerMetrics::new(),
        })
    }

    pub fn config(&self) -> &ThreadingConfig {
        &self.config
    }

    pub fn thread_plan(&self) -> &ThreadPlan {
        &self.plan
    }

    pub fn ring(&self) -> &DrawRing {
        &self.ring
    }

    /// Worker statistics slots carried per draw.
    pub fn num_worker_threads(&self) -> u32 {
        self.plan.stats_slots() as u32
    }

    pub fn numa_mask(&self) -> u32 {
        self.plan.numa_mask
    }

    /// Graphics draws whose front end is still outstanding.
    pub fn draws_outstanding_fe(&self) -> i32 {
        self.draws_outstanding_fe.load(Ordering::Acquire)
    }

    pub(crate) fn in_shutdown(&self) -> bool {
        self.in_shutdown.load(Ordering::Acquire)
    }

    /// Enqueue a draw and wake the pool. Blocks while the ring is full.
    ///
    /// In single-threaded mode the calling thread drains the ring inline
    /// before returning.
    pub fn submit_draw(&self, submit: DrawSubmit) -> u32 {
        let _guard = self.api_lock.lock().unwrap();
        let payload = submit.into_payload();
        let is_compute = payload.is_compute;
        let passes = (self.plan.num_fe_threads + self.plan.num_be_threads) as i32;

        let backoff = Backoff::new();
        while self.ring.is_full() {
            if self.config.single_threaded {
                self.drain_inline();
            } else {
                backoff.snooze();
            }
        }

        if !is_compute {
            self.draws_outstanding_fe.fetch_add(1, Ordering::AcqRel);
        }

        // SAFETY: api_lock makes this the only enqueuer, and the ring was
        // just seen non-full.
        let draw_id = unsafe { self.ring.enqueue(payload, passes) };

        #[cfg(feature = "metrics")]
        self.metrics.draws_submitted.fetch_add(1, Ordering::Relaxed);

        if self.config.single_threaded {
            self.drain_inline();
        } else {
            self.notify_workers();
        }
        draw_id
    }

    /// Wake every blocked worker.
    pub(crate) fn notify_workers(&self) {
        let _guard = self.wait_mutex.lock().unwrap();
        self.fifos_not_empty.notify_all();
    }

    /// True once every submitted draw has retired.
    pub fn is_idle(&self) -> bool {
        self.ring.is_empty() && self.draws_outstanding_fe() == 0
    }

    /// Run all pending work on the calling thread.
    fn drain_inline(&self) {
        let mut state = self.api_worker.lock().unwrap();
        while !self.ring.is_empty() {
            schedule::work_on_fifo_fe(self, &mut state);
            schedule::work_on_fifo_be(self, &mut state);
            schedule::work_on_compute(self, &mut state);
        }
    }
}
