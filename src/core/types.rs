/*!
 * Core Types
 * Common types used across the tracking subsystem
 */

/// Address type for memory operations
///
/// Tracked addresses are plain integers: the tracker mirrors mappings made
/// elsewhere and never dereferences them.
pub type Address = usize;

/// Size type for memory operations
pub type Size = usize;

/// Signed byte delta, used for arena resizes and baseline diffs
pub type SizeDelta = i64;

/// Convert an unsigned amount into a signed delta, saturating on overflow
#[inline]
pub fn to_delta(amount: Size) -> SizeDelta {
    SizeDelta::try_from(amount).unwrap_or(SizeDelta::MAX)
}

/// Signed difference `current - early`
#[inline]
pub fn diff_sizes(current: Size, early: Size) -> SizeDelta {
    if current >= early {
        to_delta(current - early)
    } else {
        -to_delta(early - current)
    }
}
