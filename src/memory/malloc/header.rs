/*!
 * Malloc Header
 *
 * 16-byte prefix written in front of every tracked block. It carries what a
 * free needs to undo the accounting without any lookup: size, tag and the
 * cached site-table coordinate.
 */

use super::site_table::SiteLocation;
use super::super::tag::MemTag;
use crate::core::limits::{HEADER_CANARY_DEAD, HEADER_CANARY_LIVE, MALLOC_ALIGNMENT};
use crate::core::types::Size;
use static_assertions::const_assert_eq;
use std::ptr::NonNull;

const FLAG_HAS_SITE: u8 = 0b0000_0001;
const FLAG_ACCOUNTED: u8 = 0b0000_0010;

/// Prefix of a tracked block
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MallocHeader {
    size: Size,
    bucket_idx: u16,
    pos_idx: u16,
    tag: u8,
    flags: u8,
    canary: u16,
}

const_assert_eq!(std::mem::size_of::<MallocHeader>(), MALLOC_ALIGNMENT);
const_assert_eq!(std::mem::align_of::<MallocHeader>(), MALLOC_ALIGNMENT);

/// State of a header as found by a free
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    Live,
    /// Already freed once
    Released,
    Corrupt(u16),
}

impl MallocHeader {
    pub const SIZE: Size = std::mem::size_of::<MallocHeader>();

    pub(crate) fn new(size: Size, tag: MemTag, accounted: bool) -> Self {
        Self {
            size,
            bucket_idx: 0,
            pos_idx: 0,
            tag: tag.to_raw(),
            flags: if accounted { FLAG_ACCOUNTED } else { 0 },
            canary: HEADER_CANARY_LIVE,
        }
    }

    #[inline]
    pub fn size(&self) -> Size {
        self.size
    }

    #[inline]
    pub fn tag(&self) -> MemTag {
        MemTag::from_raw(self.tag).unwrap_or(MemTag::None)
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// The block was counted in the malloc summary
    #[inline]
    pub fn is_accounted(&self) -> bool {
        self.flags & FLAG_ACCOUNTED != 0
    }

    pub fn site_location(&self) -> Option<SiteLocation> {
        (self.flags & FLAG_HAS_SITE != 0).then_some(SiteLocation {
            bucket_idx: self.bucket_idx,
            pos_idx: self.pos_idx,
        })
    }

    pub(crate) fn set_site_location(&mut self, location: SiteLocation) {
        self.bucket_idx = location.bucket_idx;
        self.pos_idx = location.pos_idx;
        self.flags |= FLAG_HAS_SITE;
    }

    pub fn state(&self) -> HeaderState {
        match self.canary {
            HEADER_CANARY_LIVE => HeaderState::Live,
            HEADER_CANARY_DEAD => HeaderState::Released,
            other => HeaderState::Corrupt(other),
        }
    }

    pub(crate) fn mark_released(&mut self) {
        self.canary = HEADER_CANARY_DEAD;
    }

    /// Write `header` at `raw` and return the user pointer behind it
    ///
    /// # Safety
    /// `raw` must be valid for writes of `SIZE` bytes and 16-byte aligned.
    #[inline]
    pub(crate) unsafe fn install(raw: NonNull<u8>, header: MallocHeader) -> NonNull<u8> {
        raw.cast::<MallocHeader>().as_ptr().write(header);
        NonNull::new_unchecked(raw.as_ptr().add(Self::SIZE))
    }

    /// Header pointer for a user pointer returned by [`MallocHeader::install`]
    ///
    /// # Safety
    /// `user` must come from `install` and its block must still be allocated.
    #[inline]
    pub(crate) unsafe fn locate(user: NonNull<u8>) -> NonNull<MallocHeader> {
        NonNull::new_unchecked(user.as_ptr().sub(Self::SIZE)).cast()
    }
}
