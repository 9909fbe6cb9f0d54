/*!
 * Memory Tags
 * Categories that partition every tracked counter
 */

use crate::core::errors::NmtError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! memory_tags {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Purpose of a native allocation or virtual memory region
        ///
        /// Every allocation and region carries exactly one tag.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum MemTag {
            $($variant),+
        }

        impl MemTag {
            /// Every tag, in index order
            pub const ALL: [MemTag; MemTag::COUNT] = [$(MemTag::$variant),+];

            /// Human readable name, as used in reports
            pub const fn name(self) -> &'static str {
                match self {
                    $(MemTag::$variant => $name),+
                }
            }

            fn identifier(self) -> &'static str {
                match self {
                    $(MemTag::$variant => stringify!($variant)),+
                }
            }
        }
    };
}

memory_tags! {
    JavaHeap => "Java Heap",
    Class => "Class",
    Thread => "Thread",
    ThreadStack => "Thread Stack",
    Code => "Code",
    GC => "GC",
    Compiler => "Compiler",
    JVMCI => "JVMCI",
    Internal => "Internal",
    Other => "Other",
    Symbol => "Symbol",
    NMT => "Native Memory Tracking",
    ClassShared => "Shared class space",
    Chunk => "Arena Chunk",
    Test => "Test",
    Tracing => "Tracing",
    Logging => "Logging",
    Statistics => "Statistics",
    Arguments => "Arguments",
    Module => "Module",
    Safepoint => "Safepoint",
    Synchronizer => "Synchronization",
    Serviceability => "Serviceability",
    Metaspace => "Metaspace",
    StringDedup => "String Deduplication",
    ObjectMonitor => "Object Monitors",
    None => "Unknown",
}

impl MemTag {
    /// Number of tags
    pub const COUNT: usize = 27;

    /// Stable index, used to address per-tag counter arrays
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Raw value stored in allocation headers
    #[inline]
    pub(crate) const fn to_raw(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_raw(raw: u8) -> Option<Self> {
        Self::from_index(usize::from(raw))
    }
}

impl fmt::Display for MemTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MemTag {
    type Err = NmtError;

    /// Accepts the report name ("Thread Stack") or the identifier ("ThreadStack"),
    /// ignoring case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|tag| {
                tag.name().eq_ignore_ascii_case(wanted)
                    || tag.identifier().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| NmtError::UnknownMemoryTag(s.to_string()))
    }
}
