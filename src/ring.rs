//! Fixed-capacity ring of in-flight draw contexts.
//!
//! Single producer (the API thread enqueues at the head), multiple consumer
//! observers. There is no ring-wide lock: the head is a single-writer
//! counter and the tail is advanced only by the one worker whose decrement
//! retires a slot. Capacity is a power of two so slot indexing stays exact
//! when the 32-bit draw counter wraps.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::draw::{DrawPayload, DrawSlot};

/// Wrap-aware draw-id ordering: `a < b` under 32-bit modular arithmetic.
///
/// Valid as long as fewer than 2^31 draws separate the two ids, which the
/// ring capacity guarantees for all in-flight comparisons.
#[inline]
pub fn id_compares_less(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// The draw ring. `head` counts draws ever enqueued, `tail` draws ever
/// retired; both run modulo 2^32 and are compared with signed deltas.
pub struct DrawRing {
    slots: Box<[DrawSlot]>,
    capacity: u32,
    head: CachePadded<AtomicU32>,
    tail: CachePadded<AtomicU32>,
}

impl DrawRing {
    /// `capacity` must be a power of two below 2^31.
    pub(crate) fn new(capacity: u32, num_worker_slots: usize) -> Self {
        assert!(capacity.is_power_of_two() && capacity < (1 << 31));
        let mut slots = Vec::with_capacity(capacity as usize);
        slots.resize_with(capacity as usize, || DrawSlot::new(num_worker_slots));
        DrawRing {
            slots: slots.into_boxed_slice(),
            capacity,
            head: CachePadded::new(AtomicU32::new(0)),
            tail: CachePadded::new(AtomicU32::new(0)),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Count of draws enqueued so far. A worker cursor equal to this value
    /// has caught up with the producer.
    pub fn head(&self) -> u32 {
        self.head.load(Ordering::Acquire)
    }

    /// Count of draws retired so far.
    pub fn tail(&self) -> u32 {
        self.tail.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.head() == self.tail()
    }

    pub fn is_full(&self) -> bool {
        self.head().wrapping_sub(self.tail()) >= self.capacity
    }

    /// Draws currently in flight.
    pub fn in_flight(&self) -> u32 {
        self.head().wrapping_sub(self.tail())
    }

    /// The slot holding the draw at 0-based cursor position `cursor`
    /// (draw id `cursor + 1`).
    pub fn slot(&self, cursor: u32) -> &DrawSlot {
        &self.slots[(cursor & (self.capacity - 1)) as usize]
    }

    /// Enqueue a draw at the head. Returns the new draw id.
    ///
    /// # Safety
    ///
    /// Caller must be the single enqueuing thread and must have checked
    /// `!is_full()`; the slot at the head position is then guaranteed
    /// retired and safe to rewrite.
    pub(crate) unsafe fn enqueue(&self, payload: DrawPayload, passes: i32) -> u32 {
        let head = self.head.load(Ordering::Relaxed);
        debug_assert!(head.wrapping_sub(self.tail()) < self.capacity);
        let draw_id = head.wrapping_add(1);
        self.slot(head).prepare(draw_id, payload, passes);
        self.head.store(draw_id, Ordering::Release);
        draw_id
    }

    /// Advance the tail past the retired slot. Called exactly once per draw,
    /// by the worker whose decrement zeroed `threads_done`.
    pub(crate) fn dequeue(&self) {
        self.tail.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_delta_ordering() {
        assert!(id_compares_less(1, 2));
        assert!(!id_compares_less(2, 2));
        assert!(!id_compares_less(3, 2));
        // Wrap-around: u32::MAX is "less than" the ids just past zero.
        assert!(id_compares_less(u32::MAX, 2));
        assert!(id_compares_less(u32::MAX - 10, 5));
        assert!(!id_compares_less(5, u32::MAX - 10));
    }

    #[test]
    fn enqueue_dequeue_cycles_through_wrap() {
        let ring = DrawRing::new(4, 1);
        assert!(ring.is_empty());

        for n in 0..20u32 {
            assert!(!ring.is_full());
            let id = unsafe { ring.enqueue(DrawPayload::default(), 0) };
            assert_eq!(id, n + 1);
            assert_eq!(ring.slot(n).draw_id(), n + 1);
            ring.dequeue();
        }
        assert!(ring.is_empty());
        assert_eq!(ring.head(), 20);
        assert_eq!(ring.tail(), 20);
    }

    #[test]
    fn full_when_capacity_in_flight() {
        let ring = DrawRing::new(4, 1);
        for _ in 0..4 {
            let _ = unsafe { ring.enqueue(DrawPayload::default(), 0) };
        }
        assert!(ring.is_full());
        assert_eq!(ring.in_flight(), 4);

        ring.dequeue();
        assert!(!ring.is_full());
        assert_eq!(ring.in_flight(), 3);
    }

    #[test]
    #[should_panic]
    fn rejects_non_power_of_two_capacity() {
        let _ = DrawRing::new(6, 1);
    }
}
