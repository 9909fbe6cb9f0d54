/*!
 * Malloc Tracking
 *
 * Everything that accounts individual native allocations:
 * - Inline 16-byte headers (size, tag, site coordinate, canary)
 * - The lock-free call-site table (detail level only)
 * - Per-tag summary counters
 * - Owning [`TrackedBlock`] handles
 */

mod block;
mod header;
mod site_table;
mod tracker;

pub use block::TrackedBlock;
pub use header::{HeaderState, MallocHeader};
pub use site_table::{
    MallocSite, MallocSiteSnapshot, MallocSiteTable, SiteLocation, SiteRecord, TableStatistics,
};
pub use tracker::{MallocTracker, SiteRecording};
