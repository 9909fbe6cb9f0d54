/*!
 * System Limits and Constants
 *
 * Centralized location for tracking-wide limits, thresholds, and magic numbers.
 * Organized by domain for maintainability and discoverability.
 *
 * - Performance-critical constants are marked with [PERF]
 * - Layout-critical constants are marked with [LAYOUT]
 */

// =============================================================================
// CALL-SITE TRACKING
// =============================================================================

/// Number of return addresses kept per call-site fingerprint
/// Shorter stacks are zero-padded
pub const NMT_TRACKING_STACK_DEPTH: usize = 4;

/// Frames skipped by default when capturing a call site
/// (capture machinery and the tracker entry point itself)
pub const DEFAULT_STACK_SKIP: usize = 2;

/// Bucket count of the malloc site table
/// [PERF] Sized so that the average chain stays around 6 entries
pub const MALLOC_SITE_TABLE_SIZE: usize = 511;

/// Longest chain a single bucket may grow to
/// Positions are cached in 16-bit header fields
pub const MAX_BUCKET_LENGTH: usize = u16::MAX as usize;

// =============================================================================
// MALLOC HEADER
// =============================================================================

/// Alignment of the header and of the user data that follows it
/// [LAYOUT] Must match the header size so user data keeps malloc alignment
pub const MALLOC_ALIGNMENT: usize = 16;

/// Canary written into a live header
pub const HEADER_CANARY_LIVE: u16 = 0xE99E;

/// Canary written into a header once its block has been freed
pub const HEADER_CANARY_DEAD: u16 = 0xD99D;

// =============================================================================
// SCALES
// =============================================================================

/// One kibibyte
pub const K: usize = 1024;

/// One mebibyte
pub const M: usize = K * K;

/// One gibibyte
pub const G: usize = M * K;
