/*!
 * Virtual Memory Summary
 * Per-tag reserved/committed counters
 */

use super::super::tag::MemTag;
use crate::core::types::Size;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Reserved and committed bytes of one tag
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct VirtualMemory {
    reserved: AtomicUsize,
    committed: AtomicUsize,
    peak_committed: AtomicUsize,
}

impl VirtualMemory {
    fn reserve(&self, size: Size) {
        self.reserved.fetch_add(size, Ordering::Relaxed);
    }

    fn release(&self, size: Size) {
        let previous = self.reserved.fetch_sub(size, Ordering::Relaxed);
        debug_assert!(previous >= size, "reserved underflow");
    }

    fn commit(&self, size: Size) {
        let committed = self.committed.fetch_add(size, Ordering::Relaxed) + size;
        self.peak_committed.fetch_max(committed, Ordering::Relaxed);
    }

    fn uncommit(&self, size: Size) {
        let previous = self.committed.fetch_sub(size, Ordering::Relaxed);
        debug_assert!(previous >= size, "committed underflow");
    }

    pub fn reserved(&self) -> Size {
        self.reserved.load(Ordering::Relaxed)
    }

    pub fn committed(&self) -> Size {
        self.committed.load(Ordering::Relaxed)
    }

    pub fn peak_committed(&self) -> Size {
        self.peak_committed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> VirtualMemoryStats {
        VirtualMemoryStats {
            reserved: self.reserved(),
            committed: self.committed(),
            peak_committed: self.peak_committed(),
        }
    }
}

/// Copy of [`VirtualMemory`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMemoryStats {
    pub reserved: Size,
    pub committed: Size,
    pub peak_committed: Size,
}

/// Process-wide virtual memory accounting, one slot per tag
#[derive(Debug)]
pub struct VirtualMemorySummary {
    by_tag: [VirtualMemory; MemTag::COUNT],
}

impl VirtualMemorySummary {
    pub fn new() -> Self {
        Self {
            by_tag: std::array::from_fn(|_| VirtualMemory::default()),
        }
    }

    #[inline]
    pub fn by_tag(&self, tag: MemTag) -> &VirtualMemory {
        &self.by_tag[tag.index()]
    }

    pub fn record_reserved_memory(&self, size: Size, tag: MemTag) {
        self.by_tag(tag).reserve(size);
    }

    pub fn record_released_memory(&self, size: Size, tag: MemTag) {
        self.by_tag(tag).release(size);
    }

    pub fn record_committed_memory(&self, size: Size, tag: MemTag) {
        self.by_tag(tag).commit(size);
    }

    pub fn record_uncommitted_memory(&self, size: Size, tag: MemTag) {
        self.by_tag(tag).uncommit(size);
    }

    /// Move reserved bytes from one tag to another
    pub fn move_reserved_memory(&self, from: MemTag, to: MemTag, size: Size) {
        self.by_tag(from).release(size);
        self.by_tag(to).reserve(size);
    }

    /// Move committed bytes from one tag to another
    pub fn move_committed_memory(&self, from: MemTag, to: MemTag, size: Size) {
        self.by_tag(from).uncommit(size);
        self.by_tag(to).commit(size);
    }

    pub fn snapshot(&self) -> VirtualMemorySnapshot {
        VirtualMemorySnapshot {
            by_tag: std::array::from_fn(|i| self.by_tag[i].snapshot()),
        }
    }
}

impl Default for VirtualMemorySummary {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of the whole virtual memory summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMemorySnapshot {
    by_tag: [VirtualMemoryStats; MemTag::COUNT],
}

impl VirtualMemorySnapshot {
    pub fn empty() -> Self {
        Self {
            by_tag: [VirtualMemoryStats::default(); MemTag::COUNT],
        }
    }

    #[inline]
    pub fn by_tag(&self, tag: MemTag) -> &VirtualMemoryStats {
        &self.by_tag[tag.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (MemTag, &VirtualMemoryStats)> {
        MemTag::ALL.iter().copied().zip(self.by_tag.iter())
    }

    pub fn total_reserved(&self) -> Size {
        self.by_tag.iter().map(|stats| stats.reserved).sum()
    }

    pub fn total_committed(&self) -> Size {
        self.by_tag.iter().map(|stats| stats.committed).sum()
    }
}

impl Default for VirtualMemorySnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
