/*!
 * Malloc Site Table
 *
 * Fixed-size hash table mapping (call stack, tag) to cumulative allocation
 * counters.
 *
 * ## Layout
 *
 * - `table_size` buckets, each the head of a singly-linked chain
 * - Entries are only ever appended, with a single compare-and-swap on the
 *   bucket head or on the tail entry's `next` pointer
 * - An entry's (bucket, position) coordinate never changes, so allocation
 *   headers cache it and frees never re-hash
 *
 * ## Lifetime
 *
 * Every operation runs under the shared side of an [`AccessGate`]. Entries
 * are freed only after the gate is closed and drained, which is why plain
 * dereferences of chain pointers are sound while shared access is held.
 *
 * ## Bootstrap
 *
 * The table allocates its own entries. Construction pre-seeds one site,
 * tagged `NMT`, whose stack is the table's own construction path; the bucket
 * array and every entry allocated later are charged to it directly, so the
 * table never has to look itself up to account for its own growth.
 */

use super::super::counters::MemoryCounter;
use super::super::stack::NativeCallStack;
use super::super::tag::MemTag;
use crate::core::limits::{MALLOC_SITE_TABLE_SIZE, MAX_BUCKET_LENGTH};
use crate::core::sync::AccessGate;
use crate::core::types::Size;
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::Ordering;

/// Stable coordinate of a site inside the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SiteLocation {
    pub bucket_idx: u16,
    pub pos_idx: u16,
}

/// Result of a successful lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteRecord {
    pub location: SiteLocation,
    /// A new entry was appended for this lookup
    pub created: bool,
}

/// Live counters of one (stack, tag) pair
#[derive(Debug)]
pub struct MallocSite {
    stack: NativeCallStack,
    tag: MemTag,
    counter: MemoryCounter,
}

impl MallocSite {
    fn new(stack: NativeCallStack, tag: MemTag) -> Self {
        Self {
            stack,
            tag,
            counter: MemoryCounter::new(),
        }
    }

    pub fn stack(&self) -> &NativeCallStack {
        &self.stack
    }

    pub fn tag(&self) -> MemTag {
        self.tag
    }

    pub fn size(&self) -> usize {
        self.counter.size()
    }

    pub fn count(&self) -> usize {
        self.counter.count()
    }

    pub fn snapshot(&self) -> MallocSiteSnapshot {
        MallocSiteSnapshot {
            stack: self.stack,
            tag: self.tag,
            size: self.counter.size(),
            count: self.counter.count(),
            peak_size: self.counter.peak_size(),
        }
    }
}

/// Copy of a [`MallocSite`], as stored in baselines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MallocSiteSnapshot {
    pub stack: NativeCallStack,
    pub tag: MemTag,
    pub size: usize,
    pub count: usize,
    pub peak_size: usize,
}

/// Bucket occupancy figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStatistics {
    pub table_size: usize,
    pub entries: usize,
    pub empty_buckets: usize,
    pub longest_chain: usize,
}

struct MallocSiteEntry {
    site: MallocSite,
    hash: usize,
    next: Atomic<MallocSiteEntry>,
}

impl MallocSiteEntry {
    fn new(stack: NativeCallStack, tag: MemTag, hash: usize) -> Self {
        Self {
            site: MallocSite::new(stack, tag),
            hash,
            next: Atomic::null(),
        }
    }

    #[inline]
    fn matches(&self, hash: usize, stack: &NativeCallStack, tag: MemTag) -> bool {
        self.hash == hash && self.site.tag == tag && self.site.stack == *stack
    }
}

/// Call-site hash table
pub struct MallocSiteTable {
    buckets: Box<[Atomic<MallocSiteEntry>]>,
    max_bucket_length: usize,
    gate: AccessGate,
    bootstrap: Option<SiteLocation>,
}

impl MallocSiteTable {
    /// Size in bytes of one chain entry
    pub const ENTRY_SIZE: Size = std::mem::size_of::<MallocSiteEntry>();

    pub fn new() -> Self {
        Self::with_geometry(MALLOC_SITE_TABLE_SIZE, MAX_BUCKET_LENGTH)
    }

    /// Table with `table_size` buckets and chains capped at `max_bucket_length`
    pub fn with_geometry(table_size: usize, max_bucket_length: usize) -> Self {
        let table_size = table_size.clamp(1, usize::from(u16::MAX));
        let buckets: Box<[Atomic<MallocSiteEntry>]> =
            (0..table_size).map(|_| Atomic::null()).collect();

        let mut table = Self {
            buckets,
            max_bucket_length: max_bucket_length.clamp(1, MAX_BUCKET_LENGTH),
            gate: AccessGate::new(),
            bootstrap: None,
        };
        table.install_bootstrap_site();

        info!(
            "Malloc site table initialized: {} buckets, max chain length {}",
            table_size, table.max_bucket_length
        );
        table
    }

    #[inline(never)]
    fn install_bootstrap_site(&mut self) {
        let stack = NativeCallStack::capture(0);
        let guard = epoch::pin();
        let Some((location, _, entry)) = self.find_or_insert(&stack, MemTag::NMT, &guard) else {
            return;
        };
        entry.site.counter.allocate(self.bucket_array_size());
        entry.site.counter.allocate(Self::ENTRY_SIZE);
        self.bootstrap = Some(location);
    }

    #[inline]
    pub fn table_size(&self) -> usize {
        self.buckets.len()
    }

    pub fn max_bucket_length(&self) -> usize {
        self.max_bucket_length
    }

    /// Bytes held by the bucket array itself
    pub fn bucket_array_size(&self) -> Size {
        std::mem::size_of_val(&*self.buckets)
    }

    /// Bytes the table charged to itself at construction
    pub fn bootstrap_footprint(&self) -> Size {
        self.bucket_array_size() + Self::ENTRY_SIZE
    }

    /// Coordinate of the pre-seeded bootstrap site
    pub fn bootstrap_location(&self) -> Option<SiteLocation> {
        self.bootstrap
    }

    /// Find the site for `(stack, tag)`, appending a new entry if needed
    ///
    /// Returns `None` if the bucket chain is full or the table was shut
    /// down; the caller degrades tracking instead of failing.
    pub fn lookup_or_add(&self, stack: &NativeCallStack, tag: MemTag) -> Option<SiteRecord> {
        let _access = self.gate.try_enter()?;
        let guard = epoch::pin();
        let (location, created, _) = self.find_or_insert(stack, tag, &guard)?;
        if created {
            self.charge_entry(&guard);
        }
        Some(SiteRecord { location, created })
    }

    /// Record `size` bytes allocated from `(stack, tag)`
    pub fn allocation_at(
        &self,
        stack: &NativeCallStack,
        size: Size,
        tag: MemTag,
    ) -> Option<SiteRecord> {
        let _access = self.gate.try_enter()?;
        let guard = epoch::pin();
        let (location, created, entry) = self.find_or_insert(stack, tag, &guard)?;
        entry.site.counter.allocate(size);
        if created {
            self.charge_entry(&guard);
        }
        Some(SiteRecord { location, created })
    }

    /// Record `size` bytes freed at a cached coordinate
    pub fn deallocation_at(&self, size: Size, location: SiteLocation) -> bool {
        let Some(_access) = self.gate.try_enter() else {
            return false;
        };
        let guard = epoch::pin();
        match self.entry_at(location, &guard) {
            Some(entry) => {
                entry.site.counter.deallocate(size);
                true
            }
            None => false,
        }
    }

    /// Copy of the site at `location`
    pub fn site_at(&self, location: SiteLocation) -> Option<MallocSiteSnapshot> {
        let _access = self.gate.try_enter()?;
        let guard = epoch::pin();
        self.entry_at(location, &guard)
            .map(|entry| entry.site.snapshot())
    }

    /// Visit every site in bucket order
    ///
    /// The visitor returns `false` to stop early. Returns `true` only if the
    /// whole table was visited.
    pub fn walk<F>(&self, mut visitor: F) -> bool
    where
        F: FnMut(&MallocSiteSnapshot) -> bool,
    {
        let Some(_access) = self.gate.try_enter() else {
            return false;
        };
        let guard = epoch::pin();
        for bucket in self.buckets.iter() {
            let mut current = bucket.load(Ordering::Acquire, &guard);
            // SAFETY: entries outlive every holder of shared access
            while let Some(entry) = unsafe { current.as_ref() } {
                if !visitor(&entry.site.snapshot()) {
                    return false;
                }
                current = entry.next.load(Ordering::Acquire, &guard);
            }
        }
        true
    }

    /// Bucket occupancy, `None` once shut down
    pub fn statistics(&self) -> Option<TableStatistics> {
        let _access = self.gate.try_enter()?;
        let guard = epoch::pin();
        let mut stats = TableStatistics {
            table_size: self.table_size(),
            entries: 0,
            empty_buckets: 0,
            longest_chain: 0,
        };
        for bucket in self.buckets.iter() {
            let mut length = 0;
            let mut current = bucket.load(Ordering::Acquire, &guard);
            // SAFETY: entries outlive every holder of shared access
            while let Some(entry) = unsafe { current.as_ref() } {
                length += 1;
                current = entry.next.load(Ordering::Acquire, &guard);
            }
            if length == 0 {
                stats.empty_buckets += 1;
            }
            stats.entries += length;
            stats.longest_chain = stats.longest_chain.max(length);
        }
        Some(stats)
    }

    /// True once [`MallocSiteTable::shutdown`] has run
    pub fn is_shut_down(&self) -> bool {
        self.gate.is_closed()
    }

    /// Close the table for good and free every entry
    ///
    /// Waits for in-flight operations to finish. Later operations fail as
    /// if the table were full.
    pub fn shutdown(&self) {
        if !self.gate.close() {
            return;
        }
        let freed = self.release_entries();
        debug!("Malloc site table shut down, {} entries released", freed);
    }

    fn release_entries(&self) -> usize {
        // SAFETY: the gate is closed and drained (or we hold `&mut self` in
        // drop), so no other thread can observe any entry.
        let guard = unsafe { epoch::unprotected() };
        let mut freed = 0;
        for bucket in self.buckets.iter() {
            let mut current = bucket.swap(Shared::null(), Ordering::AcqRel, guard);
            while !current.is_null() {
                // SAFETY: unlinked above and unreachable from any other thread
                let owned = unsafe { current.into_owned() };
                current = owned.next.load(Ordering::Relaxed, guard);
                drop(owned);
                freed += 1;
            }
        }
        freed
    }

    fn charge_entry(&self, guard: &Guard) {
        if let Some(entry) = self.bootstrap.and_then(|loc| self.entry_at(loc, guard)) {
            entry.site.counter.allocate(Self::ENTRY_SIZE);
        }
    }

    fn find_or_insert<'g>(
        &self,
        stack: &NativeCallStack,
        tag: MemTag,
        guard: &'g Guard,
    ) -> Option<(SiteLocation, bool, &'g MallocSiteEntry)> {
        let hash = stack.calculate_hash();
        let index = hash % self.buckets.len();
        let bucket_idx = u16::try_from(index).ok()?;
        let head = &self.buckets[index];

        let mut current = head.load(Ordering::Acquire, guard);
        if current.is_null() {
            let entry = Owned::new(MallocSiteEntry::new(*stack, tag, hash));
            match head.compare_exchange(
                Shared::null(),
                entry,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(installed) => {
                    let location = SiteLocation {
                        bucket_idx,
                        pos_idx: 0,
                    };
                    // SAFETY: just installed, freed only after the gate closes
                    return Some((location, true, unsafe { installed.deref() }));
                }
                Err(lost) => current = lost.current,
            }
        }

        let mut pos = 0usize;
        loop {
            // SAFETY: non-null chain entry, freed only after the gate closes
            let entry = unsafe { current.deref() };
            if entry.matches(hash, stack, tag) {
                let location = SiteLocation {
                    bucket_idx,
                    pos_idx: u16::try_from(pos).ok()?,
                };
                return Some((location, false, entry));
            }

            let next = entry.next.load(Ordering::Acquire, guard);
            if !next.is_null() {
                current = next;
                pos += 1;
                continue;
            }

            let next_pos = pos + 1;
            if next_pos >= self.max_bucket_length {
                return None;
            }
            let pos_idx = u16::try_from(next_pos).ok()?;
            let candidate = Owned::new(MallocSiteEntry::new(*stack, tag, hash));
            match entry.next.compare_exchange(
                Shared::null(),
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(installed) => {
                    let location = SiteLocation { bucket_idx, pos_idx };
                    // SAFETY: just installed, freed only after the gate closes
                    return Some((location, true, unsafe { installed.deref() }));
                }
                Err(lost) => {
                    // Another thread appended first; examine its entry next
                    current = lost.current;
                    pos = next_pos;
                }
            }
        }
    }

    fn entry_at<'g>(&self, location: SiteLocation, guard: &'g Guard) -> Option<&'g MallocSiteEntry> {
        let head = self.buckets.get(usize::from(location.bucket_idx))?;
        let mut current = head.load(Ordering::Acquire, guard);
        for _ in 0..location.pos_idx {
            // SAFETY: entries outlive every holder of shared access
            let entry = unsafe { current.as_ref() }?;
            current = entry.next.load(Ordering::Acquire, guard);
        }
        // SAFETY: as above
        unsafe { current.as_ref() }
    }
}

impl Default for MallocSiteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MallocSiteTable {
    fn drop(&mut self) {
        self.release_entries();
    }
}

impl fmt::Debug for MallocSiteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MallocSiteTable")
            .field("table_size", &self.table_size())
            .field("max_bucket_length", &self.max_bucket_length)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
