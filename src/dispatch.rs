//! Compute dispatch queue.
//!
//! Compute draws carry no tiles; their work groups are claimed straight off
//! the dispatch queue by whichever worker asks first. Claiming is a single
//! fetch-add, so a group is handed out exactly once with no per-worker
//! bookkeeping.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use crate::draw::DrawSlot;

/// Compute back-end entry point: draw, worker, thread-group id and the
/// spill/fill scratch buffer reused across groups on one worker.
pub type ComputeFn = Arc<dyn Fn(&DrawSlot, u32, u32, &mut Vec<u8>) + Send + Sync>;

/// Work-group queue of one compute draw.
pub struct DispatchQueue {
    total_groups: u32,
    dispatched: AtomicU32,
    outstanding: AtomicI32,
}

impl DispatchQueue {
    pub fn new(total_groups: u32) -> Self {
        DispatchQueue {
            total_groups,
            dispatched: AtomicU32::new(0),
            outstanding: AtomicI32::new(total_groups as i32),
        }
    }

    /// Claim the next work group. Returns false once the queue is exhausted.
    pub fn get_work(&self, group_id: &mut u32) -> bool {
        let slot = self.dispatched.fetch_add(1, Ordering::Relaxed);
        if slot < self.total_groups {
            *group_id = slot;
            true
        } else {
            false
        }
    }

    /// Report one claimed group as executed.
    pub fn finished_work(&self) {
        let remaining = self.outstanding.fetch_sub(1, Ordering::AcqRel) - 1;
        assert!(
            remaining >= 0,
            "compute dispatch finished more groups than were queued"
        );
    }

    /// Groups not yet claimed.
    pub fn get_num_queued(&self) -> u32 {
        let dispatched = self.dispatched.load(Ordering::Relaxed).min(self.total_groups);
        self.total_groups - dispatched
    }

    /// True once every group has been claimed and executed.
    pub fn is_work_complete(&self) -> bool {
        self.outstanding.load(Ordering::Acquire) <= 0
    }

    pub fn total_groups(&self) -> u32 {
        self.total_groups
    }
}
