/*!
 * Virtual Memory Tracking
 *
 * Reserved/committed address-space accounting:
 * - Range algebra for reservations and their committed sub-ranges
 * - Closed overlap policy table
 * - Per-tag reserved/committed summary
 */

mod policy;
mod region;
mod summary;
mod tracker;
mod types;

pub use policy::{policy_for, OverlapPolicy, OverlapResolution, PartialRelease, OVERLAP_POLICIES};
pub use region::{CommittedMemoryRegion, ReservedMemoryRegion, VirtualMemoryRegion};
pub use summary::{VirtualMemory, VirtualMemorySnapshot, VirtualMemoryStats, VirtualMemorySummary};
pub use tracker::{ReservedRegionSet, VirtualMemoryTracker};
pub use types::{VirtualMemoryError, VirtualMemoryResult};
