/*!
 * Memory Baseline
 *
 * Frozen copy of the tracker's state at one point in time.
 *
 * A summary baseline copies the per-tag malloc and virtual memory counters
 * and the metaspace figures. A detail baseline additionally copies every
 * non-empty malloc site, every reserved region, and aggregates regions into
 * virtual memory allocation sites.
 *
 * Region lists and counters are copied under the virtual memory tracker's
 * critical section, so the region list and the VM summary always agree.
 * Malloc counters are lock-free and may be skewed by in-flight updates.
 */

use super::counters::{MallocMemorySnapshot, MallocMemoryStats};
use super::malloc::MallocSiteSnapshot;
use super::metaspace::MetaspaceCombinedStats;
use super::stack::NativeCallStack;
use super::tag::MemTag;
use super::tracker::MemTracker;
use super::types::TrackingLevel;
use super::virtual_memory::{ReservedMemoryRegion, VirtualMemorySnapshot, VirtualMemoryStats};
use crate::core::types::Size;
use crate::monitoring::BaselineSpan;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Baseline operation result
pub type BaselineResult<T> = Result<T, BaselineError>;

/// Reasons a baseline cannot be taken or compared
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum BaselineError {
    #[error("Native memory tracking is not accounting (level: {0})")]
    #[diagnostic(
        code(baseline::tracking_off),
        help("Start the process with NMT_LEVEL=summary or NMT_LEVEL=detail.")
    )]
    TrackingOff(TrackingLevel),

    #[error("Detail baseline requires detail tracking (level: {0})")]
    #[diagnostic(
        code(baseline::detail_unavailable),
        help("Request a summary baseline, or start the process with NMT_LEVEL=detail.")
    )]
    DetailUnavailable(TrackingLevel),

    #[error("No baseline has been taken")]
    #[diagnostic(code(baseline::not_available))]
    NotAvailable,
}

/// What a baseline contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaselineType {
    NotBaselined,
    SummaryBaselined,
    DetailBaselined,
}

/// Order in which site and region lists are returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortingOrder {
    /// Largest first
    BySize,
    /// Call stack order
    BySite,
    /// Call stack, then tag
    BySiteAndType,
    /// Base address; regions only, sites fall back to [`SortingOrder::BySite`]
    ByAddress,
}

/// Reserved and committed totals of one (stack, tag) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMemoryAllocationSite {
    pub stack: NativeCallStack,
    pub tag: MemTag,
    pub reserved: Size,
    pub committed: Size,
}

/// Point-in-time copy of the tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemBaseline {
    baseline_type: BaselineType,
    /// Seconds since the Unix epoch
    baseline_time: u64,
    malloc: MallocMemorySnapshot,
    virtual_memory: VirtualMemorySnapshot,
    metaspace: MetaspaceCombinedStats,
    malloc_sites: Vec<MallocSiteSnapshot>,
    reserved_regions: Vec<ReservedMemoryRegion>,
    virtual_memory_sites: Vec<VirtualMemoryAllocationSite>,
}

impl MemBaseline {
    /// Empty, not yet baselined
    pub fn new() -> Self {
        Self {
            baseline_type: BaselineType::NotBaselined,
            baseline_time: 0,
            malloc: MallocMemorySnapshot::empty(),
            virtual_memory: VirtualMemorySnapshot::empty(),
            metaspace: MetaspaceCombinedStats::default(),
            malloc_sites: Vec::new(),
            reserved_regions: Vec::new(),
            virtual_memory_sites: Vec::new(),
        }
    }

    /// Take a fresh baseline of `tracker`
    pub fn capture(tracker: &MemTracker, summary_only: bool) -> BaselineResult<Self> {
        let mut baseline = Self::new();
        baseline.baseline(tracker, summary_only)?;
        Ok(baseline)
    }

    /// Replace this baseline's contents with the current state of `tracker`
    ///
    /// On error the baseline is left reset.
    pub fn baseline(&mut self, tracker: &MemTracker, summary_only: bool) -> BaselineResult<()> {
        let span = BaselineSpan::new(summary_only);
        let _entered = span.enter();

        let result = self.fill(tracker, summary_only);
        if result.is_ok() {
            span.record_detail(self.malloc_sites.len(), self.reserved_regions.len());
        }
        span.record_result(result.is_ok());
        result
    }

    fn fill(&mut self, tracker: &MemTracker, summary_only: bool) -> BaselineResult<()> {
        self.reset();

        let level = tracker.tracking_level();
        if !level.accounts() {
            return Err(BaselineError::TrackingOff(level));
        }
        let sites = if summary_only {
            None
        } else if level == TrackingLevel::Detail {
            Some(
                tracker
                    .malloc_tracker()
                    .site_table()
                    .ok_or(BaselineError::DetailUnavailable(level))?,
            )
        } else {
            return Err(BaselineError::DetailUnavailable(level));
        };

        let vm = tracker.virtual_memory_tracker();
        let _critical = vm.critical_section();

        self.malloc = tracker.malloc_tracker().snapshot();
        self.virtual_memory = vm.snapshot();
        self.metaspace = tracker.metaspace_source().combined_stats();

        if let Some(sites) = sites {
            let malloc_sites = &mut self.malloc_sites;
            let complete = sites.walk(|site| {
                if site.size > 0 {
                    malloc_sites.push(*site);
                }
                true
            });
            if !complete {
                self.reset();
                return Err(BaselineError::DetailUnavailable(tracker.tracking_level()));
            }
            self.reserved_regions = vm.regions();
            self.virtual_memory_sites = aggregate_virtual_memory_sites(&self.reserved_regions);
            self.baseline_type = BaselineType::DetailBaselined;
        } else {
            self.baseline_type = BaselineType::SummaryBaselined;
        }

        self.baseline_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        Ok(())
    }

    /// Drop all contents
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn baseline_type(&self) -> BaselineType {
        self.baseline_type
    }

    pub fn baseline_time(&self) -> u64 {
        self.baseline_time
    }

    pub fn malloc_memory_snapshot(&self) -> &MallocMemorySnapshot {
        &self.malloc
    }

    pub fn virtual_memory_snapshot(&self) -> &VirtualMemorySnapshot {
        &self.virtual_memory
    }

    pub fn malloc_memory(&self, tag: MemTag) -> &MallocMemoryStats {
        self.malloc.by_tag(tag)
    }

    pub fn virtual_memory(&self, tag: MemTag) -> &VirtualMemoryStats {
        self.virtual_memory.by_tag(tag)
    }

    pub fn metaspace_stats(&self) -> &MetaspaceCombinedStats {
        &self.metaspace
    }

    /// Bytes spent on malloc headers
    pub fn malloc_tracking_overhead(&self) -> Size {
        self.malloc.malloc_overhead()
    }

    /// Malloc (with arenas and headers) plus reserved virtual memory
    pub fn total_reserved_memory(&self) -> Size {
        self.malloc.total() + self.virtual_memory.total_reserved()
    }

    /// Malloc (with arenas and headers) plus committed virtual memory
    pub fn total_committed_memory(&self) -> Size {
        self.malloc.total() + self.virtual_memory.total_committed()
    }

    /// Reserved bytes attributed to `tag`; header overhead is charged to `NMT`
    pub fn reserved_for(&self, tag: MemTag) -> Size {
        self.malloc_for(tag) + self.virtual_memory(tag).reserved
    }

    /// Committed bytes attributed to `tag`; header overhead is charged to `NMT`
    pub fn committed_for(&self, tag: MemTag) -> Size {
        self.malloc_for(tag) + self.virtual_memory(tag).committed
    }

    fn malloc_for(&self, tag: MemTag) -> Size {
        let own = self.malloc_memory(tag).total();
        if tag == MemTag::NMT {
            own + self.malloc_tracking_overhead()
        } else {
            own
        }
    }

    pub fn malloc_site_count(&self) -> usize {
        self.malloc_sites.len()
    }

    pub fn reserved_region_count(&self) -> usize {
        self.reserved_regions.len()
    }

    /// Malloc sites with non-zero size
    pub fn malloc_sites(&self, order: SortingOrder) -> Vec<&MallocSiteSnapshot> {
        let mut sites: Vec<_> = self.malloc_sites.iter().collect();
        match order {
            SortingOrder::BySize => sites.sort_by_key(|site| Reverse(site.size)),
            SortingOrder::BySite | SortingOrder::ByAddress => sites.sort_by_key(|site| site.stack),
            SortingOrder::BySiteAndType => sites.sort_by_key(|site| (site.stack, site.tag)),
        }
        sites
    }

    /// Virtual memory allocation sites
    pub fn virtual_memory_sites(&self, order: SortingOrder) -> Vec<&VirtualMemoryAllocationSite> {
        let mut sites: Vec<_> = self.virtual_memory_sites.iter().collect();
        match order {
            SortingOrder::BySize => sites.sort_by_key(|site| Reverse(site.reserved)),
            SortingOrder::BySite | SortingOrder::ByAddress => sites.sort_by_key(|site| site.stack),
            SortingOrder::BySiteAndType => sites.sort_by_key(|site| (site.stack, site.tag)),
        }
        sites
    }

    /// Reserved regions, by address unless `BySize` is requested
    pub fn reserved_regions(&self, order: SortingOrder) -> Vec<&ReservedMemoryRegion> {
        let mut regions: Vec<_> = self.reserved_regions.iter().collect();
        if order == SortingOrder::BySize {
            regions.sort_by_key(|region| Reverse(region.size()));
        }
        regions
    }
}

impl Default for MemBaseline {
    fn default() -> Self {
        Self::new()
    }
}

fn aggregate_virtual_memory_sites(
    regions: &[ReservedMemoryRegion],
) -> Vec<VirtualMemoryAllocationSite> {
    let mut sites: BTreeMap<(NativeCallStack, MemTag), VirtualMemoryAllocationSite> =
        BTreeMap::new();
    for region in regions {
        let site = sites
            .entry((*region.stack(), region.tag()))
            .or_insert(VirtualMemoryAllocationSite {
                stack: *region.stack(),
                tag: region.tag(),
                reserved: 0,
                committed: 0,
            });
        site.reserved += region.size();
        site.committed += region.committed_size();
    }
    sites.into_values().collect()
}
