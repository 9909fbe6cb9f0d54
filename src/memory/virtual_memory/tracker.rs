/*!
 * Virtual Memory Tracker
 *
 * Sorted, non-overlapping reserved regions keyed by base address, each
 * owning its committed sub-ranges, plus the per-tag summary they feed.
 *
 * Every operation runs inside the tracker's [`ThreadCritical`] section, so
 * region lists and summary counters change together.
 */

use super::policy::{policy_for, OverlapResolution, PartialRelease};
use super::region::ReservedMemoryRegion;
use super::summary::{VirtualMemorySnapshot, VirtualMemorySummary};
use super::types::{VirtualMemoryError, VirtualMemoryResult};
use super::super::stack::NativeCallStack;
use super::super::tag::MemTag;
use crate::core::sync::{ThreadCritical, ThreadCriticalGuard};
use crate::core::types::{Address, Size};
use log::{debug, warn};
use std::collections::BTreeMap;

/// Reserved regions keyed by base address
#[derive(Debug, Default)]
pub struct ReservedRegionSet {
    regions: BTreeMap<Address, ReservedMemoryRegion>,
}

impl ReservedRegionSet {
    fn containing_base(&self, addr: Address) -> Option<Address> {
        self.regions
            .range(..=addr)
            .next_back()
            .filter(|(_, region)| region.region().contains_address(addr))
            .map(|(base, _)| *base)
    }

    fn first_overlapping(&self, base: Address, size: Size) -> Option<&ReservedMemoryRegion> {
        if let Some((_, region)) = self.regions.range(..=base).next_back() {
            if region.region().overlaps(base, size) {
                return Some(region);
            }
        }
        self.regions
            .range(base..base + size)
            .next()
            .map(|(_, region)| region)
    }

    fn insert(&mut self, region: ReservedMemoryRegion) {
        self.regions.insert(region.base(), region);
    }
}

/// Virtual memory side of the tracker
#[derive(Debug, Default)]
pub struct VirtualMemoryTracker {
    regions: ThreadCritical<ReservedRegionSet>,
    summary: VirtualMemorySummary,
}

impl VirtualMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the tracker's critical section across several calls
    pub fn critical_section(&self) -> ThreadCriticalGuard<'_, ReservedRegionSet> {
        self.regions.enter()
    }

    /// Register a reservation of `[base, base + size)`
    pub fn add_reserved_region(
        &self,
        base: Address,
        size: Size,
        stack: NativeCallStack,
        tag: MemTag,
    ) -> VirtualMemoryResult<()> {
        if size == 0 {
            return Ok(());
        }
        Self::check_range(base, size)?;

        self.regions.with(|set| {
            if let Some(existing_base) = set
                .first_overlapping(base, size)
                .filter(|existing| {
                    existing.region().same_region(base, size)
                        && (existing.tag() == tag || existing.tag() == MemTag::None)
                })
                .map(ReservedMemoryRegion::base)
            {
                return self.reregister(set, existing_base, stack, tag);
            }

            while let Some(existing) = set.first_overlapping(base, size) {
                match policy_for(existing.tag()).on_overlap {
                    OverlapResolution::Overwrite => {
                        let existing_base = existing.base();
                        debug!(
                            "Overwriting stale {} region at 0x{:x}",
                            existing.tag(),
                            existing_base
                        );
                        if let Some(stale) = set.regions.remove(&existing_base) {
                            self.account_removal(&stale);
                        }
                    }
                    OverlapResolution::AcceptNested
                        if existing.region().contains_region(base, size) =>
                    {
                        return Ok(());
                    }
                    _ => {
                        return Err(VirtualMemoryError::OverlappingRegion {
                            base,
                            size,
                            existing_base: existing.base(),
                            existing_size: existing.size(),
                            existing_tag: existing.tag(),
                        });
                    }
                }
            }

            set.insert(ReservedMemoryRegion::new(base, size, stack, tag));
            self.summary.record_reserved_memory(size, tag);
            debug!("Reserved [0x{:x}, +{}) as {}", base, size, tag);
            Ok(())
        })
    }

    fn reregister(
        &self,
        set: &mut ReservedRegionSet,
        base: Address,
        stack: NativeCallStack,
        tag: MemTag,
    ) -> VirtualMemoryResult<()> {
        let Some(region) = set.regions.get_mut(&base) else {
            return Ok(());
        };
        region.set_stack(stack);
        if region.tag() != tag {
            self.retag(region, tag);
        }
        Ok(())
    }

    fn retag(&self, region: &mut ReservedMemoryRegion, tag: MemTag) {
        let from = region.tag();
        self.summary.move_reserved_memory(from, tag, region.size());
        self.summary
            .move_committed_memory(from, tag, region.committed_size());
        region.set_tag(tag);
    }

    fn account_removal(&self, region: &ReservedMemoryRegion) {
        self.summary
            .record_uncommitted_memory(region.committed_size(), region.tag());
        self.summary
            .record_released_memory(region.size(), region.tag());
    }

    /// Tag the region containing `addr`
    ///
    /// Regions can only be tagged once, from `None`. An address outside
    /// every region is ignored.
    pub fn set_reserved_region_type(&self, addr: Address, tag: MemTag) -> VirtualMemoryResult<()> {
        self.regions.with(|set| {
            let Some(base) = set.containing_base(addr) else {
                warn!("Ignoring tag {} for untracked address 0x{:x}", tag, addr);
                return Ok(());
            };
            let Some(region) = set.regions.get_mut(&base) else {
                return Ok(());
            };
            match region.tag() {
                current if current == tag => Ok(()),
                MemTag::None => {
                    self.retag(region, tag);
                    Ok(())
                }
                current => Err(VirtualMemoryError::TagConflict {
                    base,
                    existing: current,
                    requested: tag,
                }),
            }
        })
    }

    /// Commit `[addr, addr + size)` inside one reservation
    pub fn add_committed_region(
        &self,
        addr: Address,
        size: Size,
        stack: NativeCallStack,
    ) -> VirtualMemoryResult<()> {
        if size == 0 {
            return Ok(());
        }
        Self::check_range(addr, size)?;
        self.regions.with(|set| {
            let region = Self::region_for(set, addr, size)?;
            if !region.region().contains_region(addr, size) {
                return Err(VirtualMemoryError::CommitOutsideReservation {
                    addr,
                    size,
                    region_base: region.base(),
                    region_size: region.size(),
                });
            }
            let added = region.add_committed_region(addr, size, stack);
            self.summary.record_committed_memory(added, region.tag());
            Ok(())
        })
    }

    /// Uncommit `[addr, addr + size)` inside one reservation
    pub fn remove_uncommitted_region(&self, addr: Address, size: Size) -> VirtualMemoryResult<()> {
        if size == 0 {
            return Ok(());
        }
        Self::check_range(addr, size)?;
        self.regions.with(|set| {
            let region = Self::region_for(set, addr, size)?;
            if !region.region().contains_region(addr, size) {
                return Err(VirtualMemoryError::RegionNotFound { addr, size });
            }
            let removed = region.remove_uncommitted_region(addr, size);
            self.summary.record_uncommitted_memory(removed, region.tag());
            Ok(())
        })
    }

    /// Release `[addr, addr + size)`
    ///
    /// Releasing a whole region removes it. Releasing a strict sub-range
    /// shrinks or splits the region, except for regions whose policy only
    /// unmaps nested ranges.
    pub fn remove_released_region(&self, addr: Address, size: Size) -> VirtualMemoryResult<()> {
        if size == 0 {
            return Ok(());
        }
        Self::check_range(addr, size)?;
        self.regions.with(|set| {
            let region = Self::region_for(set, addr, size)?;
            if !region.region().contains_region(addr, size) {
                return Err(VirtualMemoryError::RegionNotFound { addr, size });
            }

            let base = region.base();
            if region.region().same_region(addr, size) {
                if let Some(released) = set.regions.remove(&base) {
                    self.account_removal(&released);
                    debug!("Released [0x{:x}, +{}) {}", addr, size, released.tag());
                }
                return Ok(());
            }

            let tag = region.tag();
            let uncommitted = region.remove_uncommitted_region(addr, size);
            self.summary.record_uncommitted_memory(uncommitted, tag);

            if policy_for(tag).on_partial_release == PartialRelease::UnmapOnly {
                return Ok(());
            }

            let Some(mut head) = set.regions.remove(&base) else {
                return Ok(());
            };
            let tail = head.exclude_region(addr, size);
            set.insert(head);
            if let Some(tail) = tail {
                set.insert(tail);
            }
            self.summary.record_released_memory(size, tag);
            debug!("Partially released [0x{:x}, +{}) {}", addr, size, tag);
            Ok(())
        })
    }

    /// Split the uncommitted region `[base, base + size)` at `split_offset`
    pub fn split_reserved_region(
        &self,
        base: Address,
        size: Size,
        split_offset: Size,
    ) -> VirtualMemoryResult<()> {
        self.regions.with(|set| {
            let region = match set.regions.get(&base) {
                Some(region) if region.size() == size => region,
                _ => return Err(VirtualMemoryError::RegionNotFound { addr: base, size }),
            };
            if split_offset == 0 || split_offset >= size {
                return Err(VirtualMemoryError::InvalidSplitOffset {
                    base,
                    size,
                    offset: split_offset,
                });
            }
            let committed = region.committed_size();
            if committed > 0 {
                return Err(VirtualMemoryError::SplitWithCommittedMemory { base, committed });
            }

            if let Some(region) = set.regions.remove(&base) {
                let (head, tail) = region.split_at(split_offset);
                set.insert(head);
                set.insert(tail);
            }
            Ok(())
        })
    }

    /// Ranges must end at or below the top of the address space
    fn check_range(addr: Address, size: Size) -> VirtualMemoryResult<()> {
        match addr.checked_add(size) {
            Some(_) => Ok(()),
            None => Err(VirtualMemoryError::AddressOverflow { addr, size }),
        }
    }

    fn region_for(
        set: &mut ReservedRegionSet,
        addr: Address,
        size: Size,
    ) -> VirtualMemoryResult<&mut ReservedMemoryRegion> {
        let Some(base) = set.containing_base(addr) else {
            return Err(VirtualMemoryError::RegionNotFound { addr, size });
        };
        set.regions
            .get_mut(&base)
            .ok_or(VirtualMemoryError::RegionNotFound { addr, size })
    }

    /// Visit every region in address order; the visitor returns `false` to stop
    pub fn walk_virtual_memory<F>(&self, mut visitor: F) -> bool
    where
        F: FnMut(&ReservedMemoryRegion) -> bool,
    {
        self.regions
            .with(|set| set.regions.values().all(|region| visitor(region)))
    }

    /// Copy of the region containing `addr`
    pub fn reserved_region_at(&self, addr: Address) -> Option<ReservedMemoryRegion> {
        self.regions.with(|set| {
            set.containing_base(addr)
                .and_then(|base| set.regions.get(&base))
                .cloned()
        })
    }

    pub fn region_count(&self) -> usize {
        self.regions.with(|set| set.regions.len())
    }

    /// Copy of every region in address order
    pub fn regions(&self) -> Vec<ReservedMemoryRegion> {
        self.regions
            .with(|set| set.regions.values().cloned().collect())
    }

    pub fn summary(&self) -> &VirtualMemorySummary {
        &self.summary
    }

    pub fn snapshot(&self) -> VirtualMemorySnapshot {
        self.regions.with(|_| self.summary.snapshot())
    }
}
