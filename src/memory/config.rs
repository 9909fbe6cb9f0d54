/*!
 * Tracking Configuration
 *
 * Startup configuration for the tracker. The level is read once at process
 * start; afterwards it can only be lowered through `MemTracker::shutdown`.
 */

use super::types::TrackingLevel;
use crate::core::limits::{DEFAULT_STACK_SKIP, MALLOC_SITE_TABLE_SIZE, MAX_BUCKET_LENGTH};
use log::warn;
use serde::{Deserialize, Serialize};

/// Environment variable holding the tracking level
pub const NMT_LEVEL_ENV: &str = "NMT_LEVEL";

/// Tracker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NmtConfig {
    /// Requested tracking level
    pub level: TrackingLevel,
    /// Frames dropped from the top of every captured call stack
    pub stack_skip: usize,
    /// Bucket count of the malloc site table
    pub site_table_size: usize,
    /// Longest chain a site-table bucket may grow to
    pub max_bucket_length: usize,
}

impl Default for NmtConfig {
    fn default() -> Self {
        Self {
            level: TrackingLevel::Off,
            stack_skip: DEFAULT_STACK_SKIP,
            site_table_size: MALLOC_SITE_TABLE_SIZE,
            max_bucket_length: MAX_BUCKET_LENGTH,
        }
    }
}

impl NmtConfig {
    /// Configuration tracking at `level` with default geometry
    pub fn with_level(level: TrackingLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Configuration from the `NMT_LEVEL` environment variable
    ///
    /// A missing variable means `off`. An unparseable one is reported and
    /// also means `off`: tracking never starts half-configured.
    pub fn from_env() -> Self {
        let raw = std::env::var(NMT_LEVEL_ENV).ok();
        Self::with_level(Self::resolve_level(raw.as_deref()))
    }

    /// Resolve an optional raw level string
    pub fn resolve_level(raw: Option<&str>) -> TrackingLevel {
        match raw {
            None => TrackingLevel::Off,
            Some(value) => value.parse().unwrap_or_else(|e| {
                warn!("{}; native memory tracking is off", e);
                TrackingLevel::Off
            }),
        }
    }

    /// Site table geometry with out-of-range values pulled back into range
    pub(crate) fn site_table_geometry(&self) -> (usize, usize) {
        let table_size = self.site_table_size.clamp(1, usize::from(u16::MAX));
        let max_bucket_length = self.max_bucket_length.clamp(1, MAX_BUCKET_LENGTH);
        (table_size, max_bucket_length)
    }
}
