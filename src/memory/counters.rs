/*!
 * Memory Counters
 *
 * Lock-free per-tag counters behind the malloc summary.
 *
 * Each counter is a group of independent atomics. Reading a group is not
 * atomic as a whole, so a snapshot taken during concurrent updates may be
 * skewed by the updates in flight; it is never torn within one field.
 */

use super::malloc::MallocHeader;
use super::tag::MemTag;
use crate::core::types::{Size, SizeDelta};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Count/size pair with high-water marks
#[derive(Debug, Default)]
pub struct MemoryCounter {
    count: AtomicUsize,
    size: AtomicUsize,
    peak_count: AtomicUsize,
    peak_size: AtomicUsize,
}

impl MemoryCounter {
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
            peak_count: AtomicUsize::new(0),
            peak_size: AtomicUsize::new(0),
        }
    }

    /// Record one allocation of `size` bytes
    #[inline]
    pub fn allocate(&self, size: Size) {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.size.fetch_add(size, Ordering::Relaxed) + size;
        self.peak_count.fetch_max(count, Ordering::Relaxed);
        self.peak_size.fetch_max(total, Ordering::Relaxed);
    }

    /// Record one deallocation of `size` bytes
    #[inline]
    pub fn deallocate(&self, size: Size) {
        let previous_count = self.count.fetch_sub(1, Ordering::Relaxed);
        let previous_size = self.size.fetch_sub(size, Ordering::Relaxed);
        debug_assert!(previous_count > 0, "counter count underflow");
        debug_assert!(previous_size >= size, "counter size underflow");
    }

    /// Grow or shrink the size without changing the count
    #[inline]
    pub fn resize(&self, delta: SizeDelta) {
        let magnitude = usize::try_from(delta.unsigned_abs()).unwrap_or(usize::MAX);
        if delta >= 0 {
            let total = self.size.fetch_add(magnitude, Ordering::Relaxed) + magnitude;
            self.peak_size.fetch_max(total, Ordering::Relaxed);
        } else {
            let previous = self.size.fetch_sub(magnitude, Ordering::Relaxed);
            debug_assert!(previous >= magnitude, "counter size underflow");
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn peak_count(&self) -> usize {
        self.peak_count.load(Ordering::Relaxed)
    }

    pub fn peak_size(&self) -> usize {
        self.peak_size.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            count: self.count(),
            size: self.size(),
            peak_count: self.peak_count(),
            peak_size: self.peak_size(),
        }
    }
}

/// Copy of a [`MemoryCounter`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub count: usize,
    pub size: usize,
    pub peak_count: usize,
    pub peak_size: usize,
}

/// Live malloc and arena counters for one tag
///
/// # Performance
/// - Cache-line aligned to prevent false sharing between tags
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct MallocMemory {
    malloc: MemoryCounter,
    arena: MemoryCounter,
}

impl MallocMemory {
    #[inline]
    pub fn record_malloc(&self, size: Size) {
        self.malloc.allocate(size);
    }

    #[inline]
    pub fn record_free(&self, size: Size) {
        self.malloc.deallocate(size);
    }

    pub fn record_new_arena(&self) {
        self.arena.allocate(0);
    }

    pub fn record_arena_free(&self) {
        self.arena.deallocate(0);
    }

    pub fn record_arena_size_change(&self, delta: SizeDelta) {
        self.arena.resize(delta);
    }

    pub fn snapshot(&self) -> MallocMemoryStats {
        MallocMemoryStats {
            malloc: self.malloc.snapshot(),
            arena: self.arena.snapshot(),
        }
    }
}

/// Copy of [`MallocMemory`] for one tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MallocMemoryStats {
    pub malloc: CounterSnapshot,
    pub arena: CounterSnapshot,
}

impl MallocMemoryStats {
    pub fn malloc_size(&self) -> usize {
        self.malloc.size
    }

    pub fn malloc_count(&self) -> usize {
        self.malloc.count
    }

    pub fn arena_size(&self) -> usize {
        self.arena.size
    }

    pub fn arena_count(&self) -> usize {
        self.arena.count
    }

    /// Malloc plus arena bytes
    pub fn total(&self) -> usize {
        self.malloc.size + self.arena.size
    }
}

/// Process-wide malloc accounting, one slot per tag
#[derive(Debug)]
pub struct MallocMemorySummary {
    by_tag: [MallocMemory; MemTag::COUNT],
    all_mallocs: MemoryCounter,
}

impl MallocMemorySummary {
    pub fn new() -> Self {
        Self {
            by_tag: std::array::from_fn(|_| MallocMemory::default()),
            all_mallocs: MemoryCounter::new(),
        }
    }

    #[inline]
    pub fn by_tag(&self, tag: MemTag) -> &MallocMemory {
        &self.by_tag[tag.index()]
    }

    #[inline]
    pub fn record_malloc(&self, size: Size, tag: MemTag) {
        self.by_tag(tag).record_malloc(size);
        self.all_mallocs.allocate(size);
    }

    #[inline]
    pub fn record_free(&self, size: Size, tag: MemTag) {
        self.by_tag(tag).record_free(size);
        self.all_mallocs.deallocate(size);
    }

    pub fn record_new_arena(&self, tag: MemTag) {
        self.by_tag(tag).record_new_arena();
    }

    pub fn record_arena_free(&self, tag: MemTag) {
        self.by_tag(tag).record_arena_free();
    }

    pub fn record_arena_size_change(&self, delta: SizeDelta, tag: MemTag) {
        self.by_tag(tag).record_arena_size_change(delta);
    }

    /// Outstanding malloc count across all tags
    pub fn total_count(&self) -> usize {
        self.all_mallocs.count()
    }

    /// Copy every tag's counters
    ///
    /// Arena chunks are malloc'ed under [`MemTag::Chunk`] and also show up
    /// as arena memory of their owning tag; the copy moves that amount out
    /// of `Chunk` so it is counted once.
    pub fn snapshot(&self) -> MallocMemorySnapshot {
        let mut snapshot = MallocMemorySnapshot {
            by_tag: std::array::from_fn(|i| self.by_tag[i].snapshot()),
            all_mallocs: self.all_mallocs.snapshot(),
        };
        snapshot.make_adjustment();
        snapshot
    }
}

impl Default for MallocMemorySummary {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of the whole malloc summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MallocMemorySnapshot {
    by_tag: [MallocMemoryStats; MemTag::COUNT],
    all_mallocs: CounterSnapshot,
}

impl MallocMemorySnapshot {
    /// All-zero snapshot
    pub fn empty() -> Self {
        Self {
            by_tag: [MallocMemoryStats::default(); MemTag::COUNT],
            all_mallocs: CounterSnapshot::default(),
        }
    }

    #[inline]
    pub fn by_tag(&self, tag: MemTag) -> &MallocMemoryStats {
        &self.by_tag[tag.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (MemTag, &MallocMemoryStats)> {
        MemTag::ALL.iter().copied().zip(self.by_tag.iter())
    }

    pub fn total_count(&self) -> usize {
        self.all_mallocs.count
    }

    pub fn total_malloc(&self) -> usize {
        self.all_mallocs.size
    }

    pub fn total_arena(&self) -> usize {
        self.by_tag.iter().map(MallocMemoryStats::arena_size).sum()
    }

    /// Bytes spent on allocation headers
    pub fn malloc_overhead(&self) -> usize {
        self.all_mallocs.count * MallocHeader::SIZE
    }

    /// Malloc, arena and header bytes together
    pub fn total(&self) -> usize {
        self.total_malloc() + self.total_arena() + self.malloc_overhead()
    }

    fn make_adjustment(&mut self) {
        let arena_size = self.total_arena();
        let chunk = &mut self.by_tag[MemTag::Chunk.index()].malloc;
        let moved = arena_size.min(chunk.size);
        chunk.size -= moved;
        self.all_mallocs.size = self.all_mallocs.size.saturating_sub(moved);
    }
}

impl Default for MallocMemorySnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
