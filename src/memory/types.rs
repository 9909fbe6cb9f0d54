/*!
 * Memory Tracking Types
 * Tracking level and the process-wide level state machine
 */

use crate::core::errors::NmtError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

/// How much is recorded for every tracked operation
///
/// Ordered from least to most detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TrackingLevel {
    /// Nothing is tracked, allocations carry no header
    Off = 1,
    /// Tracking was shut down; headers exist but nothing is accounted
    Minimal = 2,
    /// Per-tag counters only
    Summary = 3,
    /// Per-tag counters plus per-call-site attribution
    Detail = 4,
}

impl TrackingLevel {
    pub const fn name(self) -> &'static str {
        match self {
            TrackingLevel::Off => "off",
            TrackingLevel::Minimal => "minimal",
            TrackingLevel::Summary => "summary",
            TrackingLevel::Detail => "detail",
        }
    }

    /// True if per-tag counters are being maintained
    #[inline]
    pub fn accounts(self) -> bool {
        self >= TrackingLevel::Summary
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            2 => TrackingLevel::Minimal,
            3 => TrackingLevel::Summary,
            4 => TrackingLevel::Detail,
            _ => TrackingLevel::Off,
        }
    }
}

impl fmt::Display for TrackingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TrackingLevel {
    type Err = NmtError;

    /// Parse a user supplied level
    ///
    /// `minimal` is internal only and is rejected here.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(TrackingLevel::Off),
            "summary" => Ok(TrackingLevel::Summary),
            "detail" => Ok(TrackingLevel::Detail),
            _ => Err(NmtError::InvalidTrackingLevel(s.to_string())),
        }
    }
}

/// Current tracking level plus the level the process started with
///
/// The level only ever moves down. Headers are laid out according to the
/// initial level for the whole process lifetime.
#[derive(Debug)]
pub struct TrackingState {
    initial: TrackingLevel,
    current: AtomicU8,
}

impl TrackingState {
    pub fn new(initial: TrackingLevel) -> Self {
        Self {
            initial,
            current: AtomicU8::new(initial as u8),
        }
    }

    #[inline]
    pub fn initial(&self) -> TrackingLevel {
        self.initial
    }

    #[inline]
    pub fn current(&self) -> TrackingLevel {
        TrackingLevel::from_raw(self.current.load(Ordering::Acquire))
    }

    /// Move down to `target`
    ///
    /// Returns the previous level if a transition happened, `None` if the
    /// current level is already at or below `target`. `Off` is never a
    /// target: a process that tracked once keeps its headers.
    pub fn downgrade_to(&self, target: TrackingLevel) -> Option<TrackingLevel> {
        let target = target.max(TrackingLevel::Minimal);
        let mut current = self.current.load(Ordering::Acquire);
        loop {
            let level = TrackingLevel::from_raw(current);
            if level <= target {
                return None;
            }
            match self.current.compare_exchange(
                current,
                target as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(level),
                Err(actual) => current = actual,
            }
        }
    }
}
