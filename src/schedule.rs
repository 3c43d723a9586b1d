//! Draw scheduling: the front-end, back-end and compute work loops plus
//! draw retirement.
//!
//! Every scheduling thread owns a [`WorkerState`] with two private cursors
//! walking the ring from tail toward head. Front-end work is claimed per
//! draw with a compare-and-swap; back-end work is claimed per macrotile
//! with a try-lock; compute groups are claimed by the dispatch queue
//! itself. The worker whose pass drives a draw's outstanding count to zero
//! retires it.

use std::collections::HashSet;
use std::sync::atomic::{fence, Ordering};

use crate::context::RasterContext;
use crate::draw::DrawSlot;
use crate::ring::id_compares_less;
use crate::stats::{sum_worker_stats, MAX_SO_BUFFERS};
use crate::tilemgr::{MacroTileMgr, WorkKind};

/// Private scheduling state of one worker (or helper) thread.
pub struct WorkerState {
    pub worker_id: u32,
    pub numa_node: u32,
    pub numa_mask: u32,
    /// Next draw this thread's back end has not fully passed.
    pub cur_draw_be: u32,
    /// Next draw this thread's front end has not fully passed.
    pub cur_draw_fe: u32,
    /// Tiles this thread recently failed to lock. A hint, not a registry:
    /// cleared on every back-end entry, consulted only to avoid probing
    /// tiles that may still carry work from an earlier draw.
    locked_tiles: HashSet<u32>,
    /// Compute spill/fill scratch, reused across groups within one draw.
    spill_fill: Vec<u8>,
}

impl WorkerState {
    pub fn new(worker_id: u32, numa_node: u32, numa_mask: u32) -> Self {
        WorkerState {
            worker_id,
            numa_node,
            numa_mask,
            cur_draw_be: 0,
            cur_draw_fe: 0,
            locked_tiles: HashSet::new(),
            spill_fill: Vec::new(),
        }
    }
}

/// True when `dc` must wait for the previous draw to retire.
fn check_dependency(dc: &DrawSlot, last_retired_draw: u32) -> bool {
    dc.dependent() && id_compares_less(last_retired_draw, dc.draw_id().wrapping_sub(1))
}

/// Sum the per-worker statistics and hand the aggregate to the client.
fn update_client_stats(ctx: &RasterContext, dc: &DrawSlot) {
    let callback = match &ctx.callbacks.update_stats {
        Some(cb) => cb,
        None => return,
    };
    if !dc.enable_stats() {
        return;
    }
    let stats = sum_worker_stats(dc.worker_stats_all());
    callback(&stats);
}

fn execute_callbacks(ctx: &RasterContext, dc: &DrawSlot) {
    update_client_stats(ctx, dc);
    if let Some(retire) = dc.retire_callback() {
        retire.invoke();
    }
}

/// Record one scheduling pass over `dc` as finished.
///
/// Returns the remaining pass count. The zeroing caller retires the draw:
/// client callbacks, arena resets, tile-manager re-initialization and the
/// ring tail advance all happen here, on this thread, with no lock held.
///
/// # Panics
///
/// Panics if the count goes negative; that means more threads passed the
/// draw than were accounted at enqueue, which is a programming error.
pub fn complete_draw_context(ctx: &RasterContext, dc: &DrawSlot) -> i32 {
    let result = dc.threads_done_dec();
    assert!(
        result >= 0,
        "draw {} completed by more threads than were accounted",
        dc.draw_id()
    );

    if result == 0 {
        execute_callbacks(ctx, dc);

        dc.arena().lock().unwrap().reset(true);
        if !dc.is_compute() {
            dc.tile_mgr().initialize();
        }
        if dc.cleanup_state() {
            dc.state_arena().lock().unwrap().reset(true);
        }

        fence(Ordering::AcqRel);

        ctx.ring.dequeue();

        #[cfg(feature = "metrics")]
        ctx.metrics.draws_retired.fetch_add(1, Ordering::Relaxed);
    }

    result
}

/// Advance `cur_draw_be` past every draw whose work has fully completed,
/// retiring each one passed. Writes the current enqueue head to `enqueued`
/// and returns whether an incomplete draw remains below it.
pub fn find_first_incomplete_draw(
    ctx: &RasterContext,
    cur_draw_be: &mut u32,
    enqueued: &mut u32,
) -> bool {
    *enqueued = ctx.ring.head();
    while id_compares_less(*cur_draw_be, *enqueued) {
        let dc = ctx.ring.slot(*cur_draw_be);

        // A graphics draw still in its front end blocks this cursor.
        if !dc.done_fe() && !dc.is_compute() {
            break;
        }

        let work_complete = if dc.is_compute() {
            match dc.dispatch() {
                Some(q) => q.is_work_complete(),
                None => true,
            }
        } else {
            dc.tile_mgr().is_work_complete()
        };

        if work_complete {
            *cur_draw_be = cur_draw_be.wrapping_add(1);
            complete_draw_context(ctx, dc);
        } else {
            break;
        }
    }

    id_compares_less(*cur_draw_be, *enqueued)
}

/// Mark a draw's front end finished: flush FE statistics and dirty
/// stream-out offsets to the client, publish `done_fe` and drop the
/// pool-wide outstanding-FE count.
fn complete_draw_fe(ctx: &RasterContext, dc: &DrawSlot) {
    fence(Ordering::AcqRel);

    if let Some(cb) = &ctx.callbacks.update_stats_fe {
        if dc.enable_stats() {
            cb(&dc.dyn_state().stats_fe_snapshot());
        }
    }

    if let Some(cb) = &ctx.callbacks.update_so_write_offset {
        for buffer in 0..MAX_SO_BUFFERS {
            if dc.dyn_state().so_write_dirty(buffer) && dc.so_write_enable(buffer) {
                cb(buffer as u32, dc.dyn_state().so_write_offset(buffer));
            }
        }
    }

    dc.set_done_fe();
    ctx.draws_outstanding_fe.fetch_sub(1, Ordering::AcqRel);
}

/// Front-end pass: retire past draws this cursor no longer needs, then try
/// to claim and run the front end of every remaining graphics draw.
///
/// Front ends of different draws run in parallel across workers; within a
/// draw the claim flag serializes. A worker that cannot claim moves on, it
/// never waits.
pub fn work_on_fifo_fe(ctx: &RasterContext, state: &mut WorkerState) {
    let enqueued = ctx.ring.head();

    // Draws that are compute, already finished or already claimed need
    // nothing more from this thread's front-end cursor; record the pass and
    // move the cursor up. This is how a front-end-only thread still helps
    // retire.
    while id_compares_less(state.cur_draw_fe, enqueued) {
        let dc = ctx.ring.slot(state.cur_draw_fe);
        if dc.is_compute() || dc.done_fe() || dc.fe_lock_held() {
            complete_draw_context(ctx, dc);
            state.cur_draw_fe = state.cur_draw_fe.wrapping_add(1);
        } else {
            break;
        }
    }

    let mut cur_draw = state.cur_draw_fe;
    while id_compares_less(cur_draw, enqueued) {
        let dc = ctx.ring.slot(cur_draw);

        if !dc.is_compute() && !dc.fe_lock_held() && dc.try_claim_fe() {
            #[cfg(feature = "metrics")]
            ctx.metrics.fe_claims.fetch_add(1, Ordering::Relaxed);

            if let Some(fe) = dc.fe_work() {
                #[cfg(feature = "trace")]
                let _span = crate::trace::SpanGuard::front_end(state.worker_id, dc.draw_id());

                fe.run(ctx, dc, state.worker_id);
            }
            complete_draw_fe(ctx, dc);
        }
        cur_draw = cur_draw.wrapping_add(1);
    }
}

/// Back-end pass.
///
/// Back-end work retires in draw order and never starts before the draw's
/// front end finished. Within a draw, macrotiles are independent. Across
/// draws a worker may run ahead, but only on macrotiles it has no reason to
/// believe are still in flight for an earlier draw; the `locked_tiles` hint
/// provides that history, and as a side effect steers the worker back to
/// the tiles it already has in cache.
pub fn work_on_fifo_be(ctx: &RasterContext, state: &mut WorkerState) {
    let mut enqueued = 0u32;
    if !find_first_incomplete_draw(ctx, &mut state.cur_draw_be, &mut enqueued) {
        return;
    }

    let mut last_retired_draw = ctx.ring.slot(state.cur_draw_be).draw_id().wrapping_sub(1);

    // The locked-tile history restarts on every entry; stale entries must
    // not outlive the locks they observed.
    state.locked_tiles.clear();

    let mut i = state.cur_draw_be;
    while id_compares_less(i, enqueued) {
        let dc = ctx.ring.slot(i);

        // Compute draws are handled by the compute loop; draw order
        // requires stopping here rather than skipping past one.
        if dc.is_compute() {
            return;
        }

        if !dc.done_fe() {
            return;
        }

        if check_dependency(dc, last_retired_draw) {
            return;
        }

        let dirty_tiles = dc.tile_mgr().get_dirty_tiles();
        for tile in &dirty_tiles {
            let tile_id = tile.id();

            // Only touch tiles assigned to this worker's NUMA node.
            let (x, y) = MacroTileMgr::get_tile_indices(tile_id);
            if ((x ^ y) & state.numa_mask) != state.numa_node {
                continue;
            }

            if tile.queued() == 0 {
                continue;
            }

            if state.locked_tiles.contains(&tile_id) {
                continue;
            }

            if tile.try_lock() {
                #[cfg(feature = "trace")]
                let mut _span =
                    crate::trace::SpanGuard::tile_drain(state.worker_id, dc.draw_id(), tile_id);
                #[cfg(feature = "trace")]
                _span.add_work_items(tile.queued());

                if let Some(work) = tile.peek() {
                    if work.kind == WorkKind::Draw {
                        if let Some(hot) = &ctx.callbacks.hot_tile_mgr {
                            hot.initialize_hot_tiles(ctx, dc, tile_id);
                        }
                    }
                }

                while let Some(work) = tile.peek() {
                    work.run(dc, state.worker_id, tile_id);
                    tile.dequeue();
                }

                #[cfg(feature = "metrics")]
                ctx.metrics.tiles_drained.fetch_add(1, Ordering::Relaxed);

                fence(Ordering::Release);

                dc.tile_mgr().mark_tile_complete(tile_id);

                // If that was the head draw's last tile, retire it on the
                // spot: every tile of every earlier draw is then known
                // complete, so the lock history can be dropped too.
                if state.cur_draw_be == i && dc.tile_mgr().is_work_complete() {
                    state.cur_draw_be = state.cur_draw_be.wrapping_add(1);
                    complete_draw_context(ctx, dc);
                    last_retired_draw = last_retired_draw.wrapping_add(1);
                    state.locked_tiles.clear();
                    break;
                }
            } else {
                state.locked_tiles.insert(tile_id);
                #[cfg(feature = "metrics")]
                ctx.metrics.tile_lock_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        i = i.wrapping_add(1);
    }
}

/// Compute pass: drain work groups of every compute draw at the window
/// head, in draw order.
pub fn work_on_compute(ctx: &RasterContext, state: &mut WorkerState) {
    let mut enqueued = 0u32;
    if !find_first_incomplete_draw(ctx, &mut state.cur_draw_be, &mut enqueued) {
        return;
    }

    let last_retired_draw = ctx.ring.slot(state.cur_draw_be).draw_id().wrapping_sub(1);

    let mut i = state.cur_draw_be;
    while id_compares_less(i, enqueued) {
        let dc = ctx.ring.slot(i);

        if !dc.is_compute() {
            return;
        }

        if check_dependency(dc, last_retired_draw) {
            return;
        }

        let Some(compute) = dc.compute_work() else {
            panic!("compute draw {} has no dispatch queue", dc.draw_id());
        };

        if compute.dispatch.get_num_queued() > 0 {
            #[cfg(feature = "trace")]
            let mut _span =
                crate::trace::SpanGuard::compute_dispatch(state.worker_id, dc.draw_id());

            state.spill_fill.clear();
            let mut group_id = 0u32;
            while compute.dispatch.get_work(&mut group_id) {
                compute.run(dc, state.worker_id, group_id, &mut state.spill_fill);
                compute.dispatch.finished_work();

                #[cfg(feature = "trace")]
                _span.add_work_items(1);

                #[cfg(feature = "metrics")]
                ctx.metrics.compute_groups.fetch_add(1, Ordering::Relaxed);
            }
        }

        i = i.wrapping_add(1);
    }
}
