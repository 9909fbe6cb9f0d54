/*!
 * Memory Module
 * Native memory tracking: malloc and virtual memory accounting, baselines
 */

pub mod baseline;
pub mod config;
pub mod counters;
pub mod diff;
pub mod malloc;
pub mod metaspace;
pub mod scale;
pub mod stack;
pub mod tag;
pub mod tracker;
pub mod traits;
pub mod types;
pub mod virtual_memory;

// Re-export for convenience
pub use baseline::{
    BaselineError, BaselineResult, BaselineType, MemBaseline, SortingOrder,
    VirtualMemoryAllocationSite,
};
pub use config::{NmtConfig, NMT_LEVEL_ENV};
pub use counters::{
    CounterSnapshot, MallocMemory, MallocMemorySnapshot, MallocMemoryStats, MallocMemorySummary,
    MemoryCounter,
};
pub use diff::{BaselineDiff, SiteChange, SiteFigures, SummaryDiff, TagDiff};
pub use malloc::{
    MallocHeader, MallocSiteSnapshot, MallocSiteTable, MallocTracker, SiteLocation, TrackedBlock,
};
pub use metaspace::{MetadataType, MetaspaceCombinedStats, MetaspaceCounters, MetaspaceStats};
pub use scale::Scale;
pub use stack::NativeCallStack;
pub use tag::MemTag;
pub use tracker::MemTracker;
pub use traits::*;
pub use types::*;
pub use virtual_memory::{
    CommittedMemoryRegion, ReservedMemoryRegion, VirtualMemoryError, VirtualMemoryRegion,
    VirtualMemoryResult, VirtualMemorySnapshot, VirtualMemoryStats, VirtualMemoryTracker,
};
