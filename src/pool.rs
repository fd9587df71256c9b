//! The preallocated trace pool: fixed slots plus one contiguous frame
//! buffer, sized once at first enrollment and never grown or shrunk.
//! Handoff between the signal handler and the consumer runs over two
//! lock-free bounded queues built on [`crossbeam_queue::ArrayQueue`],
//! the same structure used for a near-identical sample pool in
//! DataDog's native profiler.

use std::ptr::NonNull;

use crossbeam_queue::ArrayQueue;

use crate::frame::{RawFrame, SampleKind, SlotError, ThreadHandle};

/// One reusable unit of the trace pool: a fixed-capacity frame buffer
/// plus the bookkeeping the handler fills in and the consumer reads.
///
/// A `Slot` is always reached through a raw pointer handed around by the
/// free/filled queues; it is never moved once the pool is built, so the
/// frame pointer embedded in it stays valid for the pool's lifetime.
pub struct Slot {
    frames: NonNull<RawFrame>,
    cap: usize,
    frame_count: usize,
    kind: SampleKind,
    error: SlotError,
    thread: Option<ThreadHandle>,
    start_ns: u64,
    end_ns: u64,
}

// SAFETY: a `Slot` only ever holds a pointer into the pool's own frame
// buffer and plain data; the pool enforces exclusive access via the
// free/filled queue handoff rather than any aliasing rule of `Slot`
// itself.
unsafe impl Send for Slot {}

impl Slot {
    fn new(frames: NonNull<RawFrame>, cap: usize) -> Self {
        Slot {
            frames,
            cap,
            frame_count: 0,
            kind: SampleKind::NoSample,
            error: SlotError::Ok,
            thread: None,
            start_ns: 0,
            end_ns: 0,
        }
    }

    /// Resets bookkeeping before the handler starts filling this slot.
    /// Does not touch the frame buffer itself; `frame_count` governs how
    /// much of it is meaningful.
    pub fn reset_for_fill(&mut self, thread: ThreadHandle, start_ns: u64) {
        self.frame_count = 0;
        self.kind = SampleKind::NoSample;
        self.error = SlotError::NoTrace;
        self.thread = Some(thread);
        self.start_ns = start_ns;
        self.end_ns = 0;
    }

    /// The frame buffer as a writable slice, capacity [`Self::capacity`].
    /// Only the first `frame_count` entries (set via
    /// [`Self::set_frame_count`]) are meaningful to a reader.
    pub fn frames_mut(&mut self) -> &mut [RawFrame] {
        // SAFETY: `frames` points at `cap` contiguous, always-initialized
        // `RawFrame`s owned by the pool for this slot's entire lifetime.
        unsafe { std::slice::from_raw_parts_mut(self.frames.as_ptr(), self.cap) }
    }

    pub fn frames(&self) -> &[RawFrame] {
        // SAFETY: see `frames_mut`.
        unsafe { std::slice::from_raw_parts(self.frames.as_ptr(), self.frame_count) }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn set_frame_count(&mut self, n: usize) {
        self.frame_count = n.min(self.cap);
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn set_kind(&mut self, kind: SampleKind) {
        self.kind = kind;
    }

    pub fn kind(&self) -> SampleKind {
        self.kind
    }

    pub fn set_error(&mut self, error: SlotError) {
        self.error = error;
    }

    pub fn error(&self) -> SlotError {
        self.error
    }

    pub fn thread(&self) -> Option<ThreadHandle> {
        self.thread
    }

    pub fn set_end_ns(&mut self, end_ns: u64) {
        self.end_ns = end_ns;
    }

    pub fn start_ns(&self) -> u64 {
        self.start_ns
    }

    pub fn end_ns(&self) -> u64 {
        self.end_ns
    }
}

/// Fixed-size backing storage plus the two handoff queues. Built once,
/// at the capacity computed at first enrollment; never resized.
pub struct TracePool {
    slots: Box<[Slot]>,
    // Keeps the frame buffer's allocation alive; each `Slot` points into
    // it directly rather than indexing through this field.
    _frames: Box<[RawFrame]>,
    pub free: ArrayQueue<*mut Slot>,
    pub filled: ArrayQueue<*mut Slot>,
}

// SAFETY: slots and the queues of raw pointers into them are only ever
// handed out one at a time (either on `free` or on `filled`, never
// both), so sharing the pool across the handler and consumer threads is
// sound.
unsafe impl Send for TracePool {}
unsafe impl Sync for TracePool {}

impl TracePool {
    pub fn new(capacity: usize, max_frames: usize) -> Self {
        let mut frames = vec![RawFrame::default(); capacity * max_frames].into_boxed_slice();
        let frames_base = frames.as_mut_ptr();

        let mut slots = Vec::with_capacity(capacity);
        for i in 0..capacity {
            // SAFETY: `i * max_frames` is within the `capacity *
            // max_frames`-element allocation by construction.
            let ptr = unsafe { frames_base.add(i * max_frames) };
            let ptr = NonNull::new(ptr).expect("frame buffer pointer is never null");
            slots.push(Slot::new(ptr, max_frames));
        }
        let slots = slots.into_boxed_slice();

        let free = ArrayQueue::new(capacity);
        for slot in slots.iter() {
            let ptr = slot as *const Slot as *mut Slot;
            free.push(ptr).expect("free queue sized to capacity");
        }

        TracePool {
            slots,
            _frames: frames,
            free,
            filled: ArrayQueue::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Drains both queues and re-populates `free` with every slot,
    /// leaving `filled` empty. Only sound to call once disenrollment has
    /// drained every in-flight signal handler and blocked the consumer,
    /// so nothing else is touching either queue concurrently.
    pub fn reset(&self) {
        while self.free.pop().is_some() {}
        while self.filled.pop().is_some() {}
        for slot in self.slots.iter() {
            let ptr = slot as *const Slot as *mut Slot;
            self.free.push(ptr).expect("free queue sized to capacity");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn every_slot_starts_on_the_free_queue() {
        let pool = TracePool::new(4, 16);
        assert_eq!(pool.free.len(), 4);
        assert_eq!(pool.filled.len(), 0);
    }

    #[test]
    fn a_filled_slot_round_trips_back_to_free() {
        let pool = TracePool::new(2, 8);
        let slot_ptr = pool.free.pop().expect("pool has slots");

        // SAFETY: nothing else holds this pointer; it just came off the
        // free queue.
        let slot = unsafe { &mut *slot_ptr };
        slot.reset_for_fill(ThreadHandle(std::ptr::null()), 100);
        slot.set_kind(SampleKind::JavaSample);
        slot.frames_mut()[0] = RawFrame {
            method_handle: 42,
            pc_or_bci: 7,
        };
        slot.set_frame_count(1);
        slot.set_end_ns(200);
        pool.filled.push(slot_ptr).unwrap();

        assert_eq!(pool.free.len(), 1);
        let refilled = pool.filled.pop().expect("slot was pushed");
        let slot = unsafe { &*refilled };
        assert_eq!(slot.frame_count(), 1);
        assert_eq!(slot.frames()[0].method_handle, 42);
        assert_eq!(slot.start_ns(), 100);
        assert_eq!(slot.end_ns(), 200);

        pool.free.push(refilled).unwrap();
        assert_eq!(pool.free.len(), 2);
    }

    #[test]
    fn reset_repopulates_free_and_clears_filled() {
        let pool = TracePool::new(3, 4);
        let a = pool.free.pop().unwrap();
        let b = pool.free.pop().unwrap();
        pool.filled.push(a).unwrap();
        pool.filled.push(b).unwrap();
        assert_eq!(pool.free.len(), 1);
        assert_eq!(pool.filled.len(), 2);

        pool.reset();

        assert_eq!(pool.free.len(), 3);
        assert_eq!(pool.filled.len(), 0);
    }

    #[test]
    fn frame_buffers_do_not_overlap_between_slots() {
        let pool = TracePool::new(3, 4);
        let mut seen = std::collections::HashSet::new();
        for slot in pool.slots.iter() {
            let ptr = slot.frames.as_ptr() as usize;
            assert!(seen.insert(ptr), "two slots share a frame buffer offset");
        }
    }
}
