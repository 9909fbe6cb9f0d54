/*!
 * Native Memory Tracking Library
 *
 * Process-wide accounting of native allocations and virtual memory
 * mappings, keyed by tag and call site, with diffable baselines.
 */

pub mod core;
pub mod memory;
pub mod monitoring;

// Re-exports
pub use crate::core::errors::*;
pub use memory::{
    BaselineDiff, MemBaseline, MemTag, MemTracker, NativeCallStack, NmtConfig, Scale,
    TrackedBlock, TrackingLevel,
};
pub use monitoring::init_tracing;
