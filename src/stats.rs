//! Per-draw statistics and front-end dynamic state.
//!
//! Every draw context carries one [`WorkerStats`] slot per worker; a worker
//! only ever writes its own slot, so the counters need no stronger ordering
//! than relaxed. The slots are summed once, by the retiring worker, before
//! the aggregate is handed to the client.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

/// Number of stream-out buffer bindings tracked per draw.
pub const MAX_SO_BUFFERS: usize = 4;

/// Aggregate statistics reported to the client at retirement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrawStats {
    pub depth_pass_count: u64,
    pub ps_invocations: u64,
    pub cs_invocations: u64,
}

/// One worker's statistics slot inside a draw context.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub depth_pass_count: AtomicU64,
    pub ps_invocations: AtomicU64,
    pub cs_invocations: AtomicU64,
}

impl WorkerStats {
    pub fn reset(&self) {
        self.depth_pass_count.store(0, Ordering::Relaxed);
        self.ps_invocations.store(0, Ordering::Relaxed);
        self.cs_invocations.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DrawStats {
        DrawStats {
            depth_pass_count: self.depth_pass_count.load(Ordering::Relaxed),
            ps_invocations: self.ps_invocations.load(Ordering::Relaxed),
            cs_invocations: self.cs_invocations.load(Ordering::Relaxed),
        }
    }
}

/// Sum all worker slots into the aggregate sent to the client.
pub fn sum_worker_stats(slots: &[WorkerStats]) -> DrawStats {
    let mut total = DrawStats::default();
    for slot in slots {
        let s = slot.snapshot();
        total.depth_pass_count += s.depth_pass_count;
        total.ps_invocations += s.ps_invocations;
        total.cs_invocations += s.cs_invocations;
    }
    total
}

/// Front-end statistics accumulated by the FE-claiming worker.
#[derive(Debug, Default)]
pub struct FeStats {
    pub prims_processed: AtomicU64,
    pub verts_processed: AtomicU64,
}

/// Snapshot of [`FeStats`] passed to the client FE stats callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeStatsSnapshot {
    pub prims_processed: u64,
    pub verts_processed: u64,
}

/// Per-draw front-end dynamic state: FE statistics plus the stream-out
/// write offsets flushed to the client when the front end completes.
#[derive(Debug, Default)]
pub struct FeDynState {
    pub stats_fe: FeStats,
    so_write_offset: [AtomicU32; MAX_SO_BUFFERS],
    so_write_dirty: [AtomicBool; MAX_SO_BUFFERS],
}

impl FeDynState {
    /// Record a stream-out write offset and mark it dirty.
    pub fn set_so_write_offset(&self, buffer: usize, offset: u32) {
        self.so_write_offset[buffer].store(offset, Ordering::Relaxed);
        self.so_write_dirty[buffer].store(true, Ordering::Relaxed);
    }

    pub fn so_write_offset(&self, buffer: usize) -> u32 {
        self.so_write_offset[buffer].load(Ordering::Relaxed)
    }

    pub fn so_write_dirty(&self, buffer: usize) -> bool {
        self.so_write_dirty[buffer].load(Ordering::Relaxed)
    }

    pub fn stats_fe_snapshot(&self) -> FeStatsSnapshot {
        FeStatsSnapshot {
            prims_processed: self.stats_fe.prims_processed.load(Ordering::Relaxed),
            verts_processed: self.stats_fe.verts_processed.load(Ordering::Relaxed),
        }
    }

    /// Clear for slot reuse at enqueue.
    pub fn reset(&self) {
        self.stats_fe.prims_processed.store(0, Ordering::Relaxed);
        self.stats_fe.verts_processed.store(0, Ordering::Relaxed);
        for i in 0..MAX_SO_BUFFERS {
            self.so_write_offset[i].store(0, Ordering::Relaxed);
            self.so_write_dirty[i].store(false, Ordering::Relaxed);
        }
    }
}
