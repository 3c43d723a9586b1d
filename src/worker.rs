//! Worker thread implementation.
//!
//! Each worker binds to its hardware thread, switches the FPU into
//! flush-to-zero mode and then loops: spin briefly while idle, block on the
//! pool condition variable if still idle, otherwise run the back-end,
//! compute and front-end passes according to its capabilities.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::affinity::bind_thread;
use crate::context::RasterContext;
use crate::schedule::{self, WorkerState};

/// What kinds of work a worker participates in.
///
/// A worker that does neither is meaningless, so the variant simply does
/// not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCaps {
    FrontEnd,
    BackEnd,
    FrontAndBack,
}

impl WorkerCaps {
    pub fn is_fe(self) -> bool {
        matches!(self, WorkerCaps::FrontEnd | WorkerCaps::FrontAndBack)
    }

    pub fn is_be(self) -> bool {
        matches!(self, WorkerCaps::BackEnd | WorkerCaps::FrontAndBack)
    }
}

/// Parameters handed to a spawned worker thread.
pub(crate) struct WorkerParams {
    pub(crate) ctx: Arc<RasterContext>,
    pub(crate) worker_id: u32,
    pub(crate) numa_id: u32,
    pub(crate) thread_id: u32,
    pub(crate) proc_group_id: u32,
    pub(crate) force_bind_proc_group: bool,
    pub(crate) caps: WorkerCaps,
}

/// A running worker thread.
pub(crate) struct Worker {
    id: u32,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(params: WorkerParams) -> io::Result<Self> {
        let id = params.worker_id;
        let handle = thread::Builder::new()
            .name(format!("raster-worker-{}", id))
            .spawn(move || Worker::run_loop(params))?;
        Ok(Worker {
            id,
            handle: Some(handle),
        })
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }

    /// Main worker loop.
    ///
    /// Any worker may work on any queued draw, under two rules. Front-end
    /// work carries no ordering, so workers race for the per-draw claim and
    /// process in parallel. Back-end work must retire in draw order, which
    /// each worker enforces through its own cursor: the cursor only moves
    /// past a draw once that draw's binned work is fully consumed, and the
    /// producer never reuses a slot until every cursor has moved past it.
    fn run_loop(params: WorkerParams) {
        let ctx = &*params.ctx;
        let caps = params.caps;

        bind_thread(
            &ctx.config,
            params.thread_id,
            params.proc_group_id,
            params.force_bind_proc_group,
        );

        enable_flush_to_zero();

        let mut state = WorkerState::new(params.worker_id, params.numa_id, ctx.numa_mask());
        let spin_budget = ctx.config.spin_loop_count;

        while !ctx.in_shutdown() {
            let mut spins = 0;
            while spins < spin_budget && !thread_has_work(ctx, &state) {
                std::hint::spin_loop();
                spins += 1;
            }

            if !thread_has_work(ctx, &state) {
                let guard = ctx.wait_mutex.lock().unwrap();

                // Re-check under the lock so a submit between the spin and
                // the wait cannot be missed.
                if thread_has_work(ctx, &state) {
                    drop(guard);
                    continue;
                }

                if ctx.in_shutdown() {
                    break;
                }

                #[cfg(feature = "trace")]
                let _span = crate::trace::SpanGuard::idle(state.worker_id);

                let guard = ctx.fifos_not_empty.wait(guard).unwrap();
                drop(guard);

                #[cfg(feature = "metrics")]
                ctx.metrics.worker_wakeups.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

                if ctx.in_shutdown() {
                    break;
                }
            }

            if caps.is_be() {
                schedule::work_on_fifo_be(ctx, &mut state);
                schedule::work_on_compute(ctx, &mut state);
            }

            if caps.is_fe() {
                schedule::work_on_fifo_fe(ctx, &mut state);

                // A front-end-only worker still owes one back-end pass per
                // draw for retirement accounting; its FE cursor stands in.
                if !caps.is_be() {
                    state.cur_draw_be = state.cur_draw_fe;
                }
            }
        }

        #[cfg(feature = "trace")]
        crate::trace::flush_thread_spans();
    }
}

fn thread_has_work(ctx: &RasterContext, state: &WorkerState) -> bool {
    state.cur_draw_be != ctx.ring.head()
}

/// Flush denormals to zero for the lifetime of the calling thread. Denormal
/// arithmetic stalls the pixel pipeline hard enough to dwarf everything the
/// scheduler does.
fn enable_flush_to_zero() {
    #[cfg(target_arch = "x86_64")]
    {
        #[allow(deprecated)]
        use std::arch::x86_64::{_mm_getcsr, _mm_setcsr};
        const FLUSH_ZERO_ON: u32 = 0x8000;
        const DENORMALS_ZERO_ON: u32 = 0x0040;
        // SAFETY: setting MXCSR control bits affects only this thread's
        // floating-point behavior.
        #[allow(deprecated)]
        unsafe {
            _mm_setcsr(_mm_getcsr() | FLUSH_ZERO_ON | DENORMALS_ZERO_ON);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_cover_both_stages() {
        assert!(WorkerCaps::FrontAndBack.is_fe());
        assert!(WorkerCaps::FrontAndBack.is_be());
        assert!(WorkerCaps::FrontEnd.is_fe());
        assert!(!WorkerCaps::FrontEnd.is_be());
        assert!(!WorkerCaps::BackEnd.is_fe());
        assert!(WorkerCaps::BackEnd.is_be());
    }

    #[test]
    fn flush_to_zero_is_idempotent() {
        enable_flush_to_zero();
        enable_flush_to_zero();
    }
}
