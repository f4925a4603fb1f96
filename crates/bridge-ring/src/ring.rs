use crate::invariants::{
    debug_assert_bounded_count, debug_assert_monotonic, debug_assert_no_wrap,
    debug_assert_tail_not_past_head,
};
use crate::reservation::{ReadSlot, WriteSlot};
use crate::{Config, OverflowPolicy};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// Naming follows the spec's vocabulary, not the usual producer=tail convention:
// `head` advances on write (owned by the producer), `tail` advances on read
// (owned by the consumer). `count = (head - tail) mod capacity`.
//
// **Producer (reserve_write / commit_write):**
// 1. Load `head` with Relaxed (only the producer writes it)
// 2. Load `cached_tail` with no ordering (UnsafeCell, single-writer: producer)
// 3. If cache insufficient: Acquire-load `tail` (synchronizes with consumer's
//    Release store), refresh the cache
// 4. Write slot bytes (no ordering needed, protected by the protocol)
// 5. Release-store `head`, publishing the write to the consumer
//
// **Consumer (reserve_read / commit_read):**
// 1. Load `tail` with Relaxed (only the consumer writes it, modulo the
//    drop-oldest exception below)
// 2. Load `cached_head` with no ordering (UnsafeCell, single-writer: consumer)
// 3. If cache insufficient: Acquire-load `head`, refresh the cache
// 4. Read slot bytes
// 5. Release-store `tail` (see drop-oldest exception)
//
// **Drop-oldest exception.** Under `OverflowPolicy::DropOldest` the producer
// may itself advance `tail` to reclaim the oldest slot when the ring is full,
// so `tail` has two potential writers. Both sides use `compare_exchange`
// rather than a blind store when touching `tail`, so a slot reclaimed by the
// producer never gets double-counted by a consumer that was mid-read of it.
// This accepts a narrow race (the producer may begin overwriting slot bytes
// the consumer is mid-copying-out of) by design: the policy's whole point is
// to prioritize liveness of the upstream link over completeness of the
// surviving message at the boundary of the drop.
//
// =============================================================================

/// Error returned by [`Ring::reserve_write`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RingError {
    /// The ring is at capacity and the configured policy is `Backpressure`.
    #[error("ring buffer is full")]
    Full,
}

/// Fixed-capacity single-producer/single-consumer ring buffer of
/// length-prefixed byte payloads.
///
/// Slots are arena-allocated as one contiguous buffer (`slot_count *
/// slot_size` bytes) rather than as separate heap objects, for cache
/// locality on the hot path.
pub struct Ring {
    // === PRODUCER HOT ===
    /// Advances on write. Owned by the producer, read by the consumer.
    head: CachePadded<AtomicU64>,
    /// Producer's cached view of `tail` (avoids cross-core reads).
    cached_tail: CachePadded<UnsafeCell<u64>>,

    // === CONSUMER HOT ===
    /// Advances on read. Owned by the consumer (with the drop-oldest
    /// exception above), read by the producer.
    tail: CachePadded<AtomicU64>,
    /// Consumer's cached view of `head`.
    cached_head: CachePadded<UnsafeCell<u64>>,

    // === COLD STATE ===
    overruns: AtomicU64,
    config: Config,

    // === DATA ===
    /// One contiguous allocation, `capacity() * slot_size()` bytes.
    arena: UnsafeCell<Box<[u8]>>,
    /// Length committed into each slot (valid for `[tail, head)`).
    lens: Box<[UnsafeCell<usize>]>,
}

// Safety: access to `arena`/`lens` is partitioned by slot index between the
// single producer and single consumer per the protocol documented above.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    pub fn new(config: Config) -> Self {
        let capacity = config.capacity();
        let slot_size = config.slot_size();
        let arena = vec![0u8; capacity * slot_size].into_boxed_slice();
        let lens = (0..capacity)
            .map(|_| UnsafeCell::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            head: CachePadded::new(AtomicU64::new(0)),
            cached_tail: CachePadded::new(UnsafeCell::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            cached_head: CachePadded::new(UnsafeCell::new(0)),
            overruns: AtomicU64::new(0),
            config,
            arena: UnsafeCell::new(arena),
            lens,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.config.slot_size()
    }

    #[inline]
    pub fn policy(&self) -> OverflowPolicy {
        self.config.policy()
    }

    /// Number of slots currently occupied. May be stale the instant it
    /// returns under concurrent access; intended for stats sampling only.
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Total slots discarded under `OverflowPolicy::DropOldest` since
    /// construction. Always 0 under `Backpressure`.
    #[inline]
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    fn slot_bytes(&self, idx: usize) -> &mut [u8] {
        let slot_size = self.slot_size();
        let start = idx * slot_size;
        // SAFETY: idx < capacity, so start + slot_size <= arena.len().
        unsafe {
            let arena = &mut *self.arena.get();
            &mut arena[start..start + slot_size]
        }
    }

    // -------------------------------------------------------------------
    // PRODUCER API
    // -------------------------------------------------------------------

    /// Reserves the slot at `head` for writing.
    ///
    /// Under `DropOldest`, a full ring always succeeds by reclaiming the
    /// oldest slot first (incrementing `overruns`). Under `Backpressure`, a
    /// full ring returns `RingError::Full`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn reserve_write(&self) -> Result<WriteSlot<'_>, RingError> {
        let head = self.head.load(Ordering::Relaxed);

        // SAFETY: cached_tail is written only by the producer.
        let cached_tail = unsafe { *self.cached_tail.get() };
        if self.capacity() - head.wrapping_sub(cached_tail) as usize > 0 {
            return Ok(self.make_write_slot(head));
        }

        let tail = self.tail.load(Ordering::Acquire);
        // SAFETY: single producer writer.
        unsafe {
            *self.cached_tail.get() = tail;
        }
        if self.capacity() - head.wrapping_sub(tail) as usize > 0 {
            return Ok(self.make_write_slot(head));
        }

        match self.config.policy() {
            OverflowPolicy::Backpressure => Err(RingError::Full),
            OverflowPolicy::DropOldest => {
                match self
                    .tail
                    .compare_exchange(tail, tail.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
                {
                    Ok(_) => {
                        self.overruns.fetch_add(1, Ordering::Relaxed);
                        // SAFETY: single producer writer.
                        unsafe {
                            *self.cached_tail.get() = tail.wrapping_add(1);
                        }
                    }
                    Err(observed) => {
                        // The consumer already advanced tail past our
                        // snapshot: genuine free space, not a drop.
                        // SAFETY: single producer writer.
                        unsafe {
                            *self.cached_tail.get() = observed;
                        }
                    }
                }
                Ok(self.make_write_slot(head))
            }
        }
    }

    fn make_write_slot(&self, head: u64) -> WriteSlot<'_> {
        let idx = (head % self.capacity() as u64) as usize;
        let slice = self.slot_bytes(idx);
        WriteSlot::new(self, idx, head, slice)
    }

    /// Called by [`WriteSlot::commit`]. Publishes `len` bytes at `idx` and
    /// advances `head`.
    pub(crate) fn commit_write(&self, idx: usize, pos: u64, len: usize) {
        debug_assert!(len <= self.slot_size(), "payload exceeds slot size");
        // SAFETY: idx belongs to a WriteSlot reserved at `pos == head`;
        // nothing else writes this slot until head advances past it again.
        unsafe {
            *self.lens[idx].get() = len;
        }

        let new_head = pos.wrapping_add(1);
        let tail = self.tail.load(Ordering::Relaxed);
        debug_assert_bounded_count!(new_head.wrapping_sub(tail) as usize, self.capacity());
        debug_assert_monotonic!("head", pos, new_head);
        debug_assert_no_wrap!("head", pos, new_head);

        self.head.store(new_head, Ordering::Release);
    }

    // -------------------------------------------------------------------
    // CONSUMER API
    // -------------------------------------------------------------------

    /// Reserves the slot at `tail` for reading, or `None` if the ring is
    /// empty.
    #[allow(clippy::cast_possible_truncation)]
    pub fn reserve_read(&self) -> Option<ReadSlot<'_>> {
        let tail = self.tail.load(Ordering::Relaxed);

        // SAFETY: cached_head is written only by the consumer.
        let mut cached_head = unsafe { *self.cached_head.get() };
        if tail == cached_head {
            cached_head = self.head.load(Ordering::Acquire);
            // SAFETY: single consumer writer.
            unsafe {
                *self.cached_head.get() = cached_head;
            }
            if tail == cached_head {
                return None;
            }
        }

        let idx = (tail % self.capacity() as u64) as usize;
        // SAFETY: idx was published by a commit_write whose Release store
        // of head we synchronized with via the Acquire load above (or a
        // prior one); reading its length and bytes is safe under the
        // documented drop-oldest race caveat.
        let len = unsafe { *self.lens[idx].get() };
        let slice = &self.slot_bytes(idx)[..len];
        Some(ReadSlot::new(self, idx, tail, slice))
    }

    /// Called by [`ReadSlot::commit`]. Advances `tail` past `pos`, unless
    /// the producer already reclaimed that slot under `DropOldest` (in
    /// which case this is a no-op: the slot was already counted there).
    pub(crate) fn commit_read(&self, pos: u64) {
        let head = self.head.load(Ordering::Relaxed);
        let new_tail = pos.wrapping_add(1);
        debug_assert_tail_not_past_head!(new_tail, head);
        debug_assert_monotonic!("tail", pos, new_tail);

        let _ = self
            .tail
            .compare_exchange(pos, new_tail, Ordering::Release, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn ring(policy: OverflowPolicy) -> Ring {
        Ring::new(Config::new(4, 16, policy))
    }

    #[test]
    fn empty_ring_has_no_readable_slot() {
        let r = ring(OverflowPolicy::Backpressure);
        assert!(r.reserve_read().is_none());
    }

    #[test]
    fn write_then_read_round_trips_bytes() {
        let r = ring(OverflowPolicy::Backpressure);
        let mut w = r.reserve_write().unwrap();
        w.as_mut_slice()[..5].copy_from_slice(b"hello");
        w.commit(5);

        let read = r.reserve_read().unwrap();
        assert_eq!(read.as_slice(), b"hello");
        read.commit();
        assert!(r.is_empty());
    }

    #[test]
    fn backpressure_refuses_writes_when_full() {
        let r = ring(OverflowPolicy::Backpressure);
        for _ in 0..4 {
            r.reserve_write().unwrap().commit(0);
        }
        assert!(matches!(r.reserve_write(), Err(RingError::Full)));
        assert_eq!(r.overruns(), 0);
    }

    #[test]
    fn drop_oldest_always_succeeds_and_counts_overruns() {
        let r = ring(OverflowPolicy::DropOldest);
        for i in 0..10u8 {
            let mut w = r.reserve_write().unwrap();
            w.as_mut_slice()[0] = i;
            w.commit(1);
        }
        assert_eq!(r.overruns(), 6);
        assert_eq!(r.len(), 4);

        // Surviving messages are the last 4 written, in order.
        let mut seen = Vec::new();
        while let Some(read) = r.reserve_read() {
            seen.push(read.as_slice()[0]);
            read.commit();
        }
        assert_eq!(seen, vec![6, 7, 8, 9]);
    }

    #[test]
    fn count_never_exceeds_capacity() {
        let r = ring(OverflowPolicy::DropOldest);
        for i in 0..100u8 {
            let mut w = r.reserve_write().unwrap();
            w.as_mut_slice()[0] = i;
            w.commit(1);
            assert!(r.len() <= r.capacity());
        }
    }
}
