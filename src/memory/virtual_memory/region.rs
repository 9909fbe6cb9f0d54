/*!
 * Memory Regions
 *
 * Address ranges and the committed-range algebra of a reservation.
 *
 * ## Invariants
 *
 * - A reservation's committed ranges are sorted by base, pairwise disjoint
 *   and lie inside the reservation
 * - Two committed ranges that touch always have different call stacks;
 *   same-stack neighbours are merged on insertion
 */

use super::super::stack::NativeCallStack;
use super::super::tag::MemTag;
use crate::core::types::{Address, Size};
use serde::{Deserialize, Serialize};

/// Half-open address range `[base, base + size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VirtualMemoryRegion {
    base: Address,
    size: Size,
}

impl VirtualMemoryRegion {
    pub const fn new(base: Address, size: Size) -> Self {
        Self { base, size }
    }

    #[inline]
    pub fn base(&self) -> Address {
        self.base
    }

    #[inline]
    pub fn size(&self) -> Size {
        self.size
    }

    #[inline]
    pub fn end(&self) -> Address {
        self.base + self.size
    }

    #[inline]
    pub fn contains_address(&self, addr: Address) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// `[addr, addr + size)` lies entirely inside this range
    #[inline]
    pub fn contains_region(&self, addr: Address, size: Size) -> bool {
        addr >= self.base && addr.checked_add(size).is_some_and(|end| end <= self.end())
    }

    #[inline]
    pub fn overlaps(&self, addr: Address, size: Size) -> bool {
        addr < self.end() && self.base < addr.saturating_add(size)
    }

    /// Touches `[addr, addr + size)` at either end without overlapping
    #[inline]
    pub fn adjacent_to(&self, addr: Address, size: Size) -> bool {
        addr.checked_add(size) == Some(self.base) || self.end() == addr
    }

    #[inline]
    pub fn same_region(&self, addr: Address, size: Size) -> bool {
        self.base == addr && self.size == size
    }

    fn set(&mut self, base: Address, size: Size) {
        self.base = base;
        self.size = size;
    }
}

/// Committed sub-range with the stack that committed it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedMemoryRegion {
    region: VirtualMemoryRegion,
    stack: NativeCallStack,
}

impl CommittedMemoryRegion {
    pub fn new(base: Address, size: Size, stack: NativeCallStack) -> Self {
        Self {
            region: VirtualMemoryRegion::new(base, size),
            stack,
        }
    }

    pub fn region(&self) -> &VirtualMemoryRegion {
        &self.region
    }

    #[inline]
    pub fn base(&self) -> Address {
        self.region.base
    }

    #[inline]
    pub fn size(&self) -> Size {
        self.region.size
    }

    #[inline]
    pub fn end(&self) -> Address {
        self.region.end()
    }

    pub fn stack(&self) -> &NativeCallStack {
        &self.stack
    }
}

/// Reserved range owning its committed sub-ranges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedMemoryRegion {
    region: VirtualMemoryRegion,
    stack: NativeCallStack,
    tag: MemTag,
    committed: Vec<CommittedMemoryRegion>,
}

impl ReservedMemoryRegion {
    pub fn new(base: Address, size: Size, stack: NativeCallStack, tag: MemTag) -> Self {
        Self {
            region: VirtualMemoryRegion::new(base, size),
            stack,
            tag,
            committed: Vec::new(),
        }
    }

    pub fn region(&self) -> &VirtualMemoryRegion {
        &self.region
    }

    #[inline]
    pub fn base(&self) -> Address {
        self.region.base
    }

    #[inline]
    pub fn size(&self) -> Size {
        self.region.size
    }

    #[inline]
    pub fn end(&self) -> Address {
        self.region.end()
    }

    pub fn stack(&self) -> &NativeCallStack {
        &self.stack
    }

    pub fn tag(&self) -> MemTag {
        self.tag
    }

    pub(crate) fn set_tag(&mut self, tag: MemTag) {
        self.tag = tag;
    }

    pub(crate) fn set_stack(&mut self, stack: NativeCallStack) {
        self.stack = stack;
    }

    /// Committed sub-ranges in address order
    pub fn committed_regions(&self) -> &[CommittedMemoryRegion] {
        &self.committed
    }

    pub fn committed_size(&self) -> Size {
        self.committed.iter().map(CommittedMemoryRegion::size).sum()
    }

    /// Commit `[addr, addr + size)`, returning the bytes newly committed
    ///
    /// Already-committed parts of the range are taken over by `stack`; only
    /// bytes that were not committed before count as new. Recommitting an
    /// existing range from the same stack changes nothing.
    pub fn add_committed_region(&mut self, addr: Address, size: Size, stack: NativeCallStack) -> Size {
        debug_assert!(self.region.contains_region(addr, size));
        if size == 0 {
            return 0;
        }
        if self
            .committed
            .iter()
            .any(|committed| committed.region.same_region(addr, size) && committed.stack == stack)
        {
            return 0;
        }

        let overlapped = self.remove_uncommitted_region(addr, size);
        let end = addr + size;
        let index = self.committed.partition_point(|c| c.base() < addr);

        if index > 0 {
            let prev = &mut self.committed[index - 1];
            if prev.end() == addr && prev.stack == stack {
                prev.region.size += size;
                let merged_end = prev.end();
                if let Some(next) = self.committed.get(index) {
                    if next.base() == merged_end && next.stack == stack {
                        let absorbed = self.committed.remove(index).size();
                        self.committed[index - 1].region.size += absorbed;
                    }
                }
                return size - overlapped;
            }
        }

        if let Some(next) = self.committed.get_mut(index) {
            if next.base() == end && next.stack == stack {
                let next_end = next.end();
                next.region.set(addr, next_end - addr);
                return size - overlapped;
            }
        }

        self.committed
            .insert(index, CommittedMemoryRegion::new(addr, size, stack));
        size - overlapped
    }

    /// Uncommit `[addr, addr + size)`, returning the bytes that were committed
    pub fn remove_uncommitted_region(&mut self, addr: Address, size: Size) -> Size {
        let end = addr + size;
        let mut removed = 0;
        let mut index = self.committed.partition_point(|c| c.end() <= addr);

        while let Some(committed) = self.committed.get_mut(index) {
            let (base, committed_end) = (committed.base(), committed.end());
            if base >= end {
                break;
            }

            if addr <= base && committed_end <= end {
                // Fully covered
                removed += committed.size();
                self.committed.remove(index);
                continue;
            }

            if base < addr && end < committed_end {
                // Interior hole
                let tail = CommittedMemoryRegion::new(end, committed_end - end, committed.stack);
                committed.region.set(base, addr - base);
                self.committed.insert(index + 1, tail);
                removed += size;
                break;
            }

            if base < addr {
                // Clip the tail
                committed.region.set(base, addr - base);
                removed += committed_end - addr;
                index += 1;
                continue;
            }

            // Clip the head
            committed.region.set(end, committed_end - end);
            removed += end - base;
            break;
        }
        removed
    }

    /// Drop every committed range, returning their total size
    pub(crate) fn clear_committed(&mut self) -> Size {
        let committed = self.committed_size();
        self.committed.clear();
        committed
    }

    /// Cut `[addr, addr + size)` out of the reservation
    ///
    /// The range must be uncommitted and strictly inside the region. Cutting
    /// at either end shrinks the region; cutting from the middle shrinks it
    /// to the head and returns the tail as a new region.
    pub(crate) fn exclude_region(&mut self, addr: Address, size: Size) -> Option<ReservedMemoryRegion> {
        debug_assert!(self.region.contains_region(addr, size));
        let (base, end) = (self.base(), self.end());
        let cut_end = addr + size;

        if addr == base {
            self.region.set(cut_end, end - cut_end);
            return None;
        }
        if cut_end == end {
            self.region.set(base, addr - base);
            return None;
        }

        let split_at = self.committed.partition_point(|c| c.base() < cut_end);
        let mut tail = ReservedMemoryRegion::new(cut_end, end - cut_end, self.stack, self.tag);
        tail.committed = self.committed.split_off(split_at);
        self.region.set(base, addr - base);
        Some(tail)
    }

    /// Split an uncommitted region at `offset` into head and tail
    pub(crate) fn split_at(self, offset: Size) -> (ReservedMemoryRegion, ReservedMemoryRegion) {
        debug_assert!(self.committed.is_empty());
        let head = ReservedMemoryRegion::new(self.base(), offset, self.stack, self.tag);
        let tail =
            ReservedMemoryRegion::new(self.base() + offset, self.size() - offset, self.stack, self.tag);
        (head, tail)
    }
}
