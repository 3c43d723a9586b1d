//! Draw contexts: the per-draw records living in the ring.
//!
//! A [`DrawSlot`] is storage for one in-flight draw. Slots are reused as
//! draws retire; the mutable payload written at enqueue is published to the
//! workers by the ring head advancing with release ordering, and a slot is
//! only rewritten after its previous occupant fully retired (ring tail
//! passed it). Flags mutated by workers are individual atomics.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::arena::DrawArena;
use crate::context::RasterContext;
use crate::dispatch::{ComputeFn, DispatchQueue};
use crate::stats::{FeDynState, WorkerStats, MAX_SO_BUFFERS};
use crate::tilemgr::MacroTileMgr;

/// Primary arena block reserved per draw slot.
const DRAW_ARENA_BYTES: usize = 32 * 1024;
/// Primary arena block of the optional pipeline-state arena.
const STATE_ARENA_BYTES: usize = 8 * 1024;

/// Front-end entry point: context, draw, executing worker and the opaque
/// descriptor word.
pub type FeWorkFn = Arc<dyn Fn(&RasterContext, &DrawSlot, u32, u64) + Send + Sync>;

/// Front-end work of one graphics draw.
#[derive(Clone)]
pub struct FeWork {
    func: FeWorkFn,
    pub desc: u64,
}

impl FeWork {
    pub fn new(func: FeWorkFn, desc: u64) -> Self {
        FeWork { func, desc }
    }

    pub fn run(&self, ctx: &RasterContext, dc: &DrawSlot, worker_id: u32) {
        (self.func)(ctx, dc, worker_id, self.desc);
    }
}

/// Compute work of one compute draw: the group queue plus the back end that
/// executes each group.
pub struct ComputeWork {
    pub dispatch: DispatchQueue,
    func: ComputeFn,
}

impl ComputeWork {
    pub fn new(num_groups: u32, func: ComputeFn) -> Self {
        ComputeWork {
            dispatch: DispatchQueue::new(num_groups),
            func,
        }
    }

    pub fn run(&self, dc: &DrawSlot, worker_id: u32, group_id: u32, spill_fill: &mut Vec<u8>) {
        (self.func)(dc, worker_id, group_id, spill_fill);
    }
}

/// Callback run synchronously on the retiring worker, with no lock held.
#[derive(Clone)]
pub struct RetireCallback {
    func: Arc<dyn Fn(usize, usize, usize) + Send + Sync>,
    user_data: [usize; 3],
}

impl RetireCallback {
    pub fn new(
        func: Arc<dyn Fn(usize, usize, usize) + Send + Sync>,
        user_data: [usize; 3],
    ) -> Self {
        RetireCallback { func, user_data }
    }

    pub fn invoke(&self) {
        (self.func)(self.user_data[0], self.user_data[1], self.user_data[2]);
    }
}

/// Producer-written portion of a draw slot. Immutable once published.
pub(crate) struct DrawPayload {
    pub is_compute: bool,
    pub dependent: bool,
    pub cleanup_state: bool,
    pub enable_stats: bool,
    pub so_write_enable: [bool; MAX_SO_BUFFERS],
    pub fe_work: Option<FeWork>,
    pub compute: Option<ComputeWork>,
    pub retire_callback: Option<RetireCallback>,
}

impl Default for DrawPayload {
    fn default() -> Self {
        DrawPayload {
            is_compute: false,
            dependent: false,
            cleanup_state: false,
            enable_stats: false,
            so_write_enable: [false; MAX_SO_BUFFERS],
            fe_work: None,
            compute: None,
            retire_callback: None,
        }
    }
}

/// One entry of the draw ring.
///
/// # Access protocol
///
/// The payload cell is written only by the API thread, and only for a slot
/// whose previous draw has retired (the ring caps in-flight draws at its
/// capacity). Publication happens via the ring head's release store, so any
/// worker that observed the new head sees the full payload. Workers treat
/// the payload as read-only; everything they mutate is an atomic or has its
/// own interior synchronization (tile manager, dispatch queue, arenas).
pub struct DrawSlot {
    draw_id: AtomicU32,
    done_fe: AtomicBool,
    fe_lock: AtomicU32,
    threads_done: AtomicI32,
    payload: UnsafeCell<DrawPayload>,
    tile_mgr: MacroTileMgr,
    arena: Mutex<DrawArena>,
    state_arena: Mutex<DrawArena>,
    dyn_state: FeDynState,
    worker_stats: Box<[WorkerStats]>,
}

// SAFETY: see the access protocol above. All cross-thread mutation goes
// through atomics or locks; the UnsafeCell is single-writer and its writes
// are ordered by the ring head release/acquire pair.
unsafe impl Send for DrawSlot {}
unsafe impl Sync for DrawSlot {}

impl DrawSlot {
    pub(crate) fn new(num_worker_slots: usize) -> Self {
        let mut stats = Vec::with_capacity(num_worker_slots);
        stats.resize_with(num_worker_slots, WorkerStats::default);
        DrawSlot {
            draw_id: AtomicU32::new(0),
            done_fe: AtomicBool::new(false),
            fe_lock: AtomicU32::new(0),
            threads_done: AtomicI32::new(0),
            payload: UnsafeCell::new(DrawPayload::default()),
            tile_mgr: MacroTileMgr::new(),
            arena: Mutex::new(DrawArena::new(DRAW_ARENA_BYTES)),
            state_arena: Mutex::new(DrawArena::new(STATE_ARENA_BYTES)),
            dyn_state: FeDynState::default(),
            worker_stats: stats.into_boxed_slice(),
        }
    }

    /// Reset the slot for a new draw. Producer side only.
    ///
    /// # Safety
    ///
    /// The caller must be the single enqueuing thread and the slot's
    /// previous draw must have retired (ring not full).
    pub(crate) unsafe fn prepare(&self, draw_id: u32, payload: DrawPayload, passes: i32) {
        *self.payload.get() = payload;
        self.draw_id.store(draw_id, Ordering::Relaxed);
        self.done_fe.store(false, Ordering::Relaxed);
        self.fe_lock.store(0, Ordering::Relaxed);
        self.threads_done.store(passes, Ordering::Relaxed);
        self.dyn_state.reset();
        for slot in self.worker_stats.iter() {
            slot.reset();
        }
    }

    fn payload(&self) -> &DrawPayload {
        // SAFETY: read-only view; the payload is immutable between
        // publication and retirement (see the access protocol).
        unsafe { &*self.payload.get() }
    }

    pub fn draw_id(&self) -> u32 {
        self.draw_id.load(Ordering::Relaxed)
    }

    pub fn is_compute(&self) -> bool {
        self.payload().is_compute
    }

    pub fn dependent(&self) -> bool {
        self.payload().dependent
    }

    pub fn cleanup_state(&self) -> bool {
        self.payload().cleanup_state
    }

    pub fn enable_stats(&self) -> bool {
        self.payload().enable_stats
    }

    pub fn so_write_enable(&self, buffer: usize) -> bool {
        self.payload().so_write_enable[buffer]
    }

    pub fn done_fe(&self) -> bool {
        self.done_fe.load(Ordering::Acquire)
    }

    pub(crate) fn set_done_fe(&self) {
        self.done_fe.store(true, Ordering::Release);
    }

    /// True when some worker holds or held the front-end claim.
    pub fn fe_lock_held(&self) -> bool {
        self.fe_lock.load(Ordering::Relaxed) != 0
    }

    /// Claim the front-end stage. At most one caller ever succeeds.
    pub(crate) fn try_claim_fe(&self) -> bool {
        self.fe_lock
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Outstanding scheduling passes. Zero means retired.
    pub fn threads_done(&self) -> i32 {
        self.threads_done.load(Ordering::Acquire)
    }

    pub(crate) fn threads_done_dec(&self) -> i32 {
        self.threads_done.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn tile_mgr(&self) -> &MacroTileMgr {
        &self.tile_mgr
    }

    pub fn arena(&self) -> &Mutex<DrawArena> {
        &self.arena
    }

    pub fn state_arena(&self) -> &Mutex<DrawArena> {
        &self.state_arena
    }

    pub fn dyn_state(&self) -> &FeDynState {
        &self.dyn_state
    }

    /// This worker's statistics slot.
    pub fn worker_stats(&self, worker_id: u32) -> &WorkerStats {
        &self.worker_stats[worker_id as usize]
    }

    pub(crate) fn worker_stats_all(&self) -> &[WorkerStats] {
        &self.worker_stats
    }

    pub(crate) fn fe_work(&self) -> Option<&FeWork> {
        self.payload().fe_work.as_ref()
    }

    pub(crate) fn compute_work(&self) -> Option<&ComputeWork> {
        self.payload().compute.as_ref()
    }

    /// The compute draw's dispatch queue, if this is a compute draw.
    pub fn dispatch(&self) -> Option<&DispatchQueue> {
        self.payload().compute.as_ref().map(|c| &c.dispatch)
    }

    pub(crate) fn retire_callback(&self) -> Option<&RetireCallback> {
        self.payload().retire_callback.as_ref()
    }
}
