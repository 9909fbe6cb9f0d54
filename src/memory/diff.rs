/*!
 * Baseline Diff
 *
 * Structured comparison of two baselines: signed per-tag deltas, and for
 * detail baselines the sites that appeared, disappeared or changed. Sites
 * missing on one side compare against zero. Nothing here formats text.
 */

use super::baseline::{BaselineType, MemBaseline, SortingOrder, VirtualMemoryAllocationSite};
use super::malloc::MallocSiteSnapshot;
use super::stack::NativeCallStack;
use super::tag::MemTag;
use crate::core::types::{diff_sizes, SizeDelta};
use serde::Serialize;
use std::cmp::Ordering;

/// Change of one tag between two baselines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TagDiff {
    pub tag: MemTag,
    pub reserved: SizeDelta,
    pub committed: SizeDelta,
    pub malloc: SizeDelta,
    pub malloc_count: SizeDelta,
    pub arena: SizeDelta,
    pub arena_count: SizeDelta,
    pub virtual_reserved: SizeDelta,
    pub virtual_committed: SizeDelta,
}

impl TagDiff {
    pub fn is_unchanged(&self) -> bool {
        self.reserved == 0
            && self.committed == 0
            && self.malloc_count == 0
            && self.arena_count == 0
    }
}

/// Per-tag and total deltas
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryDiff {
    pub by_tag: Vec<TagDiff>,
    pub total_reserved: SizeDelta,
    pub total_committed: SizeDelta,
    pub malloc_overhead: SizeDelta,
}

impl SummaryDiff {
    pub fn compute(early: &MemBaseline, current: &MemBaseline) -> Self {
        let by_tag = MemTag::ALL
            .iter()
            .map(|&tag| {
                let (old_malloc, new_malloc) = (early.malloc_memory(tag), current.malloc_memory(tag));
                let (old_vm, new_vm) = (early.virtual_memory(tag), current.virtual_memory(tag));
                TagDiff {
                    tag,
                    reserved: diff_sizes(current.reserved_for(tag), early.reserved_for(tag)),
                    committed: diff_sizes(current.committed_for(tag), early.committed_for(tag)),
                    malloc: diff_sizes(new_malloc.malloc_size(), old_malloc.malloc_size()),
                    malloc_count: diff_sizes(new_malloc.malloc_count(), old_malloc.malloc_count()),
                    arena: diff_sizes(new_malloc.arena_size(), old_malloc.arena_size()),
                    arena_count: diff_sizes(new_malloc.arena_count(), old_malloc.arena_count()),
                    virtual_reserved: diff_sizes(new_vm.reserved, old_vm.reserved),
                    virtual_committed: diff_sizes(new_vm.committed, old_vm.committed),
                }
            })
            .collect();

        Self {
            by_tag,
            total_reserved: diff_sizes(
                current.total_reserved_memory(),
                early.total_reserved_memory(),
            ),
            total_committed: diff_sizes(
                current.total_committed_memory(),
                early.total_committed_memory(),
            ),
            malloc_overhead: diff_sizes(
                current.malloc_tracking_overhead(),
                early.malloc_tracking_overhead(),
            ),
        }
    }

    pub fn by_tag(&self, tag: MemTag) -> &TagDiff {
        &self.by_tag[tag.index()]
    }

    /// Tags whose figures moved
    pub fn changed(&self) -> impl Iterator<Item = &TagDiff> {
        self.by_tag.iter().filter(|diff| !diff.is_unchanged())
    }
}

/// How one site differs between two baselines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SiteChange<T> {
    /// Only in the current baseline
    New(T),
    /// Only in the early baseline
    Retired(T),
    Changed { early: T, current: T },
}

/// Figures compared by a site diff
pub trait SiteFigures: Copy {
    fn site_key(&self) -> (NativeCallStack, MemTag);
    fn size(&self) -> usize;
    fn count(&self) -> usize;
    /// Second size figure, if the site has one
    fn secondary_size(&self) -> usize {
        0
    }
}

impl SiteFigures for MallocSiteSnapshot {
    fn site_key(&self) -> (NativeCallStack, MemTag) {
        (self.stack, self.tag)
    }

    fn size(&self) -> usize {
        self.size
    }

    fn count(&self) -> usize {
        self.count
    }
}

impl SiteFigures for VirtualMemoryAllocationSite {
    fn site_key(&self) -> (NativeCallStack, MemTag) {
        (self.stack, self.tag)
    }

    fn size(&self) -> usize {
        self.reserved
    }

    fn count(&self) -> usize {
        0
    }

    fn secondary_size(&self) -> usize {
        self.committed
    }
}

impl<T: SiteFigures> SiteChange<T> {
    /// Size change, with a missing side counted as zero
    pub fn size_delta(&self) -> SizeDelta {
        match self {
            SiteChange::New(site) => diff_sizes(site.size(), 0),
            SiteChange::Retired(site) => diff_sizes(0, site.size()),
            SiteChange::Changed { early, current } => diff_sizes(current.size(), early.size()),
        }
    }

    /// Count change, with a missing side counted as zero
    pub fn count_delta(&self) -> SizeDelta {
        match self {
            SiteChange::New(site) => diff_sizes(site.count(), 0),
            SiteChange::Retired(site) => diff_sizes(0, site.count()),
            SiteChange::Changed { early, current } => diff_sizes(current.count(), early.count()),
        }
    }

    pub fn site_key(&self) -> (NativeCallStack, MemTag) {
        match self {
            SiteChange::New(site) | SiteChange::Retired(site) => site.site_key(),
            SiteChange::Changed { current, .. } => current.site_key(),
        }
    }
}

/// Merge two site lists sorted by (stack, tag), skipping unchanged sites
pub fn diff_sites<T: SiteFigures>(early: &[&T], current: &[&T]) -> Vec<SiteChange<T>> {
    let mut changes = Vec::new();
    let (mut i, mut j) = (0, 0);

    while i < early.len() || j < current.len() {
        let ordering = match (early.get(i), current.get(j)) {
            (Some(old), Some(new)) => old.site_key().cmp(&new.site_key()),
            (Some(_), None) => Ordering::Less,
            (None, _) => Ordering::Greater,
        };
        match ordering {
            Ordering::Less => {
                changes.push(SiteChange::Retired(*early[i]));
                i += 1;
            }
            Ordering::Greater => {
                changes.push(SiteChange::New(*current[j]));
                j += 1;
            }
            Ordering::Equal => {
                let (old, new) = (early[i], current[j]);
                if old.size() != new.size()
                    || old.count() != new.count()
                    || old.secondary_size() != new.secondary_size()
                {
                    changes.push(SiteChange::Changed {
                        early: *old,
                        current: *new,
                    });
                }
                i += 1;
                j += 1;
            }
        }
    }
    changes
}

/// Full comparison of two baselines
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaselineDiff {
    pub summary: SummaryDiff,
    /// Empty unless both baselines are detail baselines
    pub malloc_sites: Vec<SiteChange<MallocSiteSnapshot>>,
    /// Empty unless both baselines are detail baselines
    pub virtual_memory_sites: Vec<SiteChange<VirtualMemoryAllocationSite>>,
}

impl BaselineDiff {
    pub fn compute(early: &MemBaseline, current: &MemBaseline) -> Self {
        let summary = SummaryDiff::compute(early, current);
        let detail = early.baseline_type() == BaselineType::DetailBaselined
            && current.baseline_type() == BaselineType::DetailBaselined;
        if !detail {
            return Self {
                summary,
                malloc_sites: Vec::new(),
                virtual_memory_sites: Vec::new(),
            };
        }

        Self {
            summary,
            malloc_sites: diff_sites(
                &early.malloc_sites(SortingOrder::BySiteAndType),
                &current.malloc_sites(SortingOrder::BySiteAndType),
            ),
            virtual_memory_sites: diff_sites(
                &early.virtual_memory_sites(SortingOrder::BySiteAndType),
                &current.virtual_memory_sites(SortingOrder::BySiteAndType),
            ),
        }
    }
}
