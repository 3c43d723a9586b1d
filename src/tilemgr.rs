//! Macrotile work queues for the back end.
//!
//! The front end bins work into macrotiles; each macrotile owns a FIFO of
//! back-end work descriptors and a non-recursive try-lock. Back-end workers
//! claim whole tiles, drain them, and report completion through the
//! produced/consumed accounting on the manager.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::draw::DrawSlot;

/// Kind of a back-end work item. Hot tiles are initialized before the first
/// `Draw` item of a tile executes; `Clear` items need no hot-tile load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    Draw,
    Clear,
}

/// Handler invoked for each back-end work item, with the owning draw, the
/// executing worker, the tile id, and the opaque descriptor word.
pub type BeWorkFn = Arc<dyn Fn(&DrawSlot, u32, u32, u64) + Send + Sync>;

/// One entry in a macrotile FIFO.
#[derive(Clone)]
pub struct BeWork {
    pub kind: WorkKind,
    func: BeWorkFn,
    pub desc: u64,
}

impl BeWork {
    pub fn new(kind: WorkKind, func: BeWorkFn, desc: u64) -> Self {
        BeWork { kind, func, desc }
    }

    pub fn run(&self, dc: &DrawSlot, worker_id: u32, tile_id: u32) {
        (self.func)(dc, worker_id, tile_id, self.desc);
    }
}

/// A macrotile: FIFO of pending back-end work plus the tile try-lock.
///
/// The lock is claimed by the draining worker and is not released when the
/// drain finishes; [`MacroTileMgr::mark_tile_complete`] resets the tile,
/// lock included. A tile is therefore locked at most once per draw.
pub struct MacroTile {
    id: u32,
    fifo: Mutex<VecDeque<BeWork>>,
    queued: AtomicU32,
    total_enqueued: AtomicU32,
    locked: AtomicBool,
}

impl MacroTile {
    fn new(id: u32) -> Self {
        MacroTile {
            id,
            fifo: Mutex::new(VecDeque::new()),
            queued: AtomicU32::new(0),
            total_enqueued: AtomicU32::new(0),
            locked: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Work items enqueued and not yet dequeued.
    pub fn queued(&self) -> u32 {
        self.queued.load(Ordering::Acquire)
    }

    /// Claim the tile. Non-recursive; returns false when already held.
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Head of the FIFO without removing it.
    pub fn peek(&self) -> Option<BeWork> {
        self.fifo.lock().unwrap().front().cloned()
    }

    /// Drop the head of the FIFO.
    pub fn dequeue(&self) {
        let popped = self.fifo.lock().unwrap().pop_front();
        if popped.is_some() {
            self.queued.fetch_sub(1, Ordering::Release);
        }
    }

    fn enqueue(&self, work: BeWork) {
        self.fifo.lock().unwrap().push_back(work);
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        self.queued.fetch_add(1, Ordering::Release);
    }

    /// Total items ever enqueued for the current draw.
    fn total(&self) -> u32 {
        self.total_enqueued.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.fifo.lock().unwrap().clear();
        self.queued.store(0, Ordering::Relaxed);
        self.total_enqueued.store(0, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
    }
}

/// Per-draw macrotile manager.
///
/// Owns the dirty-tile set of one draw context. Completion is tracked by
/// two counters: items produced at enqueue and items consumed when a tile
/// is marked complete. The draw's back end is finished when consumed has
/// caught up with produced.
pub struct MacroTileMgr {
    tiles: Mutex<HashMap<u32, Arc<MacroTile>>>,
    dirty: Mutex<Vec<Arc<MacroTile>>>,
    work_items_produced: AtomicU64,
    work_items_consumed: AtomicU64,
}

impl MacroTileMgr {
    pub fn new() -> Self {
        MacroTileMgr {
            tiles: Mutex::new(HashMap::new()),
            dirty: Mutex::new(Vec::new()),
            work_items_produced: AtomicU64::new(0),
            work_items_consumed: AtomicU64::new(0),
        }
    }

    /// Pack 2-D macrotile indices into a tile id.
    pub fn tile_id(x: u32, y: u32) -> u32 {
        debug_assert!(x <= 0xffff && y <= 0xffff);
        (y << 16) | x
    }

    /// Unpack a tile id into its 2-D macrotile indices.
    pub fn get_tile_indices(tile_id: u32) -> (u32, u32) {
        (tile_id & 0xffff, tile_id >> 16)
    }

    /// Queue one work item to a macrotile, dirtying it on first touch.
    /// Called from the front end while it owns the draw's FE stage.
    pub fn enqueue(&self, tile_id: u32, work: BeWork) {
        let tile = {
            let mut tiles = self.tiles.lock().unwrap();
            match tiles.get(&tile_id) {
                Some(tile) => Arc::clone(tile),
                None => {
                    let tile = Arc::new(MacroTile::new(tile_id));
                    tiles.insert(tile_id, Arc::clone(&tile));
                    self.dirty.lock().unwrap().push(Arc::clone(&tile));
                    tile
                }
            }
        };
        tile.enqueue(work);
        self.work_items_produced.fetch_add(1, Ordering::Release);
    }

    /// Snapshot of the dirty tiles in first-touch order.
    pub fn get_dirty_tiles(&self) -> Vec<Arc<MacroTile>> {
        self.dirty.lock().unwrap().clone()
    }

    /// Retire one tile: fold its item count into the consumed total and
    /// reset it (queue, counters and lock).
    pub fn mark_tile_complete(&self, tile_id: u32) {
        let tile = {
            let tiles = self.tiles.lock().unwrap();
            tiles.get(&tile_id).map(Arc::clone)
        };
        let tile = match tile {
            Some(t) => t,
            None => return,
        };
        let items = tile.total() as u64;
        tile.reset();
        self.work_items_consumed.fetch_add(items, Ordering::Release);
    }

    /// True when every produced work item has been consumed.
    pub fn is_work_complete(&self) -> bool {
        let produced = self.work_items_produced.load(Ordering::Acquire);
        let consumed = self.work_items_consumed.load(Ordering::Acquire);
        consumed >= produced
    }

    /// Reset for slot reuse. Called at draw retirement.
    pub fn initialize(&self) {
        self.tiles.lock().unwrap().clear();
        self.dirty.lock().unwrap().clear();
        self.work_items_produced.store(0, Ordering::Relaxed);
        self.work_items_consumed.store(0, Ordering::Relaxed);
    }
}

impl Default for MacroTileMgr {
    fn default() -> Self {
        Self::new()
    }
}
