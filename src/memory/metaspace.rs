/*!
 * Metaspace Statistics
 *
 * Reserved/committed/used figures of the class and non-class metadata
 * spaces. The three numbers of one space are read without a common lock,
 * so a reading can be skewed by a concurrent update; `sanitized` restores
 * `used <= committed <= reserved` before figures enter a baseline.
 */

use super::traits::MetaspaceStatsSource;
use crate::core::types::Size;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Figures of one metadata space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaspaceStats {
    pub reserved: Size,
    pub committed: Size,
    pub used: Size,
}

impl MetaspaceStats {
    pub const fn new(reserved: Size, committed: Size, used: Size) -> Self {
        Self {
            reserved,
            committed,
            used,
        }
    }

    /// Clamp `committed <= reserved` and `used <= committed`
    pub fn sanitized(self) -> Self {
        let committed = self.committed.min(self.reserved);
        Self {
            reserved: self.reserved,
            committed,
            used: self.used.min(committed),
        }
    }
}

/// Class plus non-class figures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaspaceCombinedStats {
    pub class: MetaspaceStats,
    pub non_class: MetaspaceStats,
}

impl MetaspaceCombinedStats {
    pub const fn new(class: MetaspaceStats, non_class: MetaspaceStats) -> Self {
        Self { class, non_class }
    }

    pub fn reserved(&self) -> Size {
        self.class.reserved + self.non_class.reserved
    }

    pub fn committed(&self) -> Size {
        self.class.committed + self.non_class.committed
    }

    pub fn used(&self) -> Size {
        self.class.used + self.non_class.used
    }

    pub fn sanitized(self) -> Self {
        Self {
            class: self.class.sanitized(),
            non_class: self.non_class.sanitized(),
        }
    }
}

/// Which metadata space a figure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataType {
    Class,
    NonClass,
}

#[derive(Debug, Default)]
struct SpaceCounters {
    reserved: AtomicUsize,
    committed: AtomicUsize,
    used: AtomicUsize,
}

impl SpaceCounters {
    fn stats(&self) -> MetaspaceStats {
        MetaspaceStats {
            reserved: self.reserved.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            used: self.used.load(Ordering::Relaxed),
        }
    }
}

/// Lock-free metaspace counters updated by the metadata allocator
#[derive(Debug, Default)]
pub struct MetaspaceCounters {
    class: SpaceCounters,
    non_class: SpaceCounters,
}

impl MetaspaceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn space(&self, space: MetadataType) -> &SpaceCounters {
        match space {
            MetadataType::Class => &self.class,
            MetadataType::NonClass => &self.non_class,
        }
    }

    pub fn reserve(&self, space: MetadataType, size: Size) {
        self.space(space).reserved.fetch_add(size, Ordering::Relaxed);
    }

    pub fn commit(&self, space: MetadataType, size: Size) {
        self.space(space).committed.fetch_add(size, Ordering::Relaxed);
    }

    pub fn uncommit(&self, space: MetadataType, size: Size) {
        self.space(space).committed.fetch_sub(size, Ordering::Relaxed);
    }

    pub fn allocate(&self, space: MetadataType, size: Size) {
        self.space(space).used.fetch_add(size, Ordering::Relaxed);
    }

    pub fn deallocate(&self, space: MetadataType, size: Size) {
        self.space(space).used.fetch_sub(size, Ordering::Relaxed);
    }
}

impl MetaspaceStatsSource for MetaspaceCounters {
    fn class_space_stats(&self) -> MetaspaceStats {
        self.class.stats()
    }

    fn non_class_space_stats(&self) -> MetaspaceStats {
        self.non_class.stats()
    }
}
