/*!
 * Memory Traits
 * Seams to collaborators outside the tracker
 */

use super::metaspace::{MetaspaceCombinedStats, MetaspaceStats};

/// Provider of metaspace figures
///
/// The metadata allocator lives outside the tracker; baselines only read
/// its numbers through this trait.
pub trait MetaspaceStatsSource: Send + Sync {
    /// Class space figures
    fn class_space_stats(&self) -> MetaspaceStats;

    /// Non-class space figures
    fn non_class_space_stats(&self) -> MetaspaceStats;

    /// Both spaces, sanitized
    fn combined_stats(&self) -> MetaspaceCombinedStats {
        MetaspaceCombinedStats::new(self.class_space_stats(), self.non_class_space_stats())
            .sanitized()
    }
}
