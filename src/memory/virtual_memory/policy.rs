/*!
 * Overlap Policy
 *
 * Closed table deciding what happens when a new reservation overlaps an
 * existing one. Keyed by the existing region's tag; tags not listed reject
 * every overlap.
 */

use super::super::tag::MemTag;

/// Outcome of reserving over an existing region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapResolution {
    /// Consistency violation
    Reject,
    /// Release the existing region and insert the new one
    Overwrite,
    /// A reservation fully inside the existing one is already accounted
    AcceptNested,
}

/// Outcome of releasing a strict sub-range of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialRelease {
    /// Shrink or split the reservation
    Shrink,
    /// Uncommit only; the reservation keeps its extent
    UnmapOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapPolicy {
    pub tag: MemTag,
    pub on_overlap: OverlapResolution,
    pub on_partial_release: PartialRelease,
}

/// Every tag with non-default overlap handling
pub const OVERLAP_POLICIES: &[OverlapPolicy] = &[
    // Stacks of exited threads are not always released before reuse
    OverlapPolicy {
        tag: MemTag::ThreadStack,
        on_overlap: OverlapResolution::Overwrite,
        on_partial_release: PartialRelease::Shrink,
    },
    // Archive regions are mapped inside the shared space reservation
    OverlapPolicy {
        tag: MemTag::ClassShared,
        on_overlap: OverlapResolution::AcceptNested,
        on_partial_release: PartialRelease::UnmapOnly,
    },
    OverlapPolicy {
        tag: MemTag::JavaHeap,
        on_overlap: OverlapResolution::AcceptNested,
        on_partial_release: PartialRelease::Shrink,
    },
];

const DEFAULT_POLICY: OverlapPolicy = OverlapPolicy {
    tag: MemTag::None,
    on_overlap: OverlapResolution::Reject,
    on_partial_release: PartialRelease::Shrink,
};

/// Policy for regions tagged `tag`
pub fn policy_for(tag: MemTag) -> &'static OverlapPolicy {
    OVERLAP_POLICIES
        .iter()
        .find(|policy| policy.tag == tag)
        .unwrap_or(&DEFAULT_POLICY)
}
