//! # rasterpool - NUMA-aware draw scheduling for a tiled software rasterizer
//!
//! The worker-pool core of a software rasterizer. Clients submit "draws"
//! (graphics work with a front-end geometry stage and a tiled back-end
//! stage, or compute dispatches) and a pool of pinned worker threads
//! schedules them:
//!
//! - **Topology & pinning**: NUMA nodes, cores and hardware threads are
//!   probed at pool creation; each worker is pinned to its own hardware
//!   thread, with one thread reserved for the API caller.
//! - **Draw ring**: in-flight draws live in a fixed-capacity lock-free
//!   ring. Each worker advances two private cursors (front end, back end)
//!   from tail toward head; the worker whose pass completes a draw's
//!   accounting retires it and advances the tail.
//! - **Two-stage pipeline**: front-end work is claimed per draw by
//!   compare-and-swap and runs in parallel across draws; back-end work is
//!   claimed per macrotile by try-lock and retires in draw order; compute
//!   dispatches multiplex through the same back-end cursor.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rasterpool::{
//!     ClientCallbacks, DrawSubmit, RasterContext, ThreadPool, ThreadingConfig,
//! };
//!
//! let ctx = RasterContext::new(ThreadingConfig::default(), ClientCallbacks::default())?;
//! let pool = ThreadPool::create(&ctx)?;
//!
//! ctx.submit_draw(DrawSubmit::graphics(
//!     Arc::new(|_ctx, _dc, _worker, _desc| {
//!         // Bin front-end output into the draw's macrotiles here.
//!     }),
//!     0,
//! ));
//!
//! pool.shutdown();
//! # Ok::<(), rasterpool::PoolError>(())
//! ```

pub mod affinity;
pub mod arena;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod draw;
pub mod metrics;
pub mod pool;
pub mod ring;
pub mod schedule;
pub mod stats;
pub mod tilemgr;
pub mod topology;
pub mod trace;
pub mod worker;

pub use arena::DrawArena;
pub use config::ThreadingConfig;
pub use context::{
    ClientCallbacks, DrawSubmit, HotTileManager, RasterContext, UpdateSoWriteOffsetFn,
    UpdateStatsFeFn, UpdateStatsFn,
};
pub use dispatch::{ComputeFn, DispatchQueue};
pub use draw::{DrawSlot, FeWork, FeWorkFn, RetireCallback};
pub use pool::{PoolError, ThreadPlan, ThreadPool, WorkerAssignment};
pub use ring::{id_compares_less, DrawRing};
pub use schedule::{
    complete_draw_context, find_first_incomplete_draw, work_on_compute, work_on_fifo_be,
    work_on_fifo_fe, WorkerState,
};
pub use stats::{DrawStats, FeStatsSnapshot, MAX_SO_BUFFERS};
pub use tilemgr::{BeWork, BeWorkFn, MacroTile, MacroTileMgr, WorkKind};
pub use topology::Topology;
pub use worker::WorkerCaps;
