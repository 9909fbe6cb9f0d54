/*!
 * Malloc Tracker
 * Header installation and summary/site accounting for malloc'ed blocks
 */

use super::header::{HeaderState, MallocHeader};
use super::site_table::{MallocSiteTable, SiteLocation};
use super::super::config::NmtConfig;
use super::super::counters::{MallocMemorySnapshot, MallocMemorySummary};
use super::super::stack::NativeCallStack;
use super::super::tag::MemTag;
use super::super::types::TrackingLevel;
use crate::core::types::{Size, SizeDelta};
use log::error;
use std::ptr::NonNull;

/// What happened to the call site of one allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteRecording {
    /// Level below detail
    NotRequested,
    Recorded(SiteLocation),
    /// The site table could not take the site
    Overflow,
}

/// Malloc side of the tracker
#[derive(Debug)]
pub struct MallocTracker {
    summary: MallocMemorySummary,
    sites: Option<MallocSiteTable>,
}

impl MallocTracker {
    /// Tracker for a process starting at `level`
    ///
    /// The site table only exists if the process starts in detail mode.
    pub fn new(level: TrackingLevel, config: &NmtConfig) -> Self {
        let sites = (level == TrackingLevel::Detail).then(|| {
            let (table_size, max_bucket_length) = config.site_table_geometry();
            MallocSiteTable::with_geometry(table_size, max_bucket_length)
        });
        Self {
            summary: MallocMemorySummary::new(),
            sites,
        }
    }

    /// Write a header at `raw` and account `size` bytes
    ///
    /// Returns the user pointer, `MallocHeader::SIZE` bytes past `raw`.
    ///
    /// # Safety
    /// `raw` must be 16-byte aligned and valid for writes of
    /// `MallocHeader::SIZE + size` bytes.
    pub unsafe fn record_malloc(
        &self,
        raw: NonNull<u8>,
        size: Size,
        tag: MemTag,
        stack: &NativeCallStack,
        level: TrackingLevel,
    ) -> (NonNull<u8>, SiteRecording) {
        let mut header = MallocHeader::new(size, tag, level.accounts());
        let mut recording = SiteRecording::NotRequested;

        if level.accounts() {
            self.summary.record_malloc(size, tag);
        }
        if level == TrackingLevel::Detail {
            recording = match self
                .sites
                .as_ref()
                .and_then(|sites| sites.allocation_at(stack, size, tag))
            {
                Some(record) => {
                    header.set_site_location(record.location);
                    SiteRecording::Recorded(record.location)
                }
                None => SiteRecording::Overflow,
            };
        }

        (MallocHeader::install(raw, header), recording)
    }

    /// Undo the accounting of a block and return its raw pointer
    ///
    /// A header that is already released or unrecognizable means a double
    /// free or heap corruption; both are fatal.
    ///
    /// # Safety
    /// `user` must come from [`MallocTracker::record_malloc`] on this tracker
    /// and the underlying memory must not have been returned to the allocator.
    pub unsafe fn record_free(&self, user: NonNull<u8>, level: TrackingLevel) -> NonNull<u8> {
        let header_ptr = MallocHeader::locate(user);
        let header = &mut *header_ptr.as_ptr();

        match header.state() {
            HeaderState::Live => {}
            HeaderState::Released => {
                error!("Double free of tracked block at {:p}", user.as_ptr());
                panic!("double free of tracked block at {:p}", user.as_ptr());
            }
            HeaderState::Corrupt(canary) => {
                error!(
                    "Corrupt malloc header at {:p} (canary 0x{:04x})",
                    user.as_ptr(),
                    canary
                );
                panic!("corrupt malloc header at {:p}", user.as_ptr());
            }
        }

        if header.is_accounted() && level.accounts() {
            self.summary.record_free(header.size(), header.tag());
        }
        if let (Some(location), Some(sites)) = (header.site_location(), self.sites.as_ref()) {
            sites.deallocation_at(header.size(), location);
        }
        header.mark_released();

        header_ptr.cast()
    }

    /// Size recorded in the header of `user`
    ///
    /// # Safety
    /// `user` must point at a live tracked block.
    #[inline]
    pub unsafe fn get_size(user: NonNull<u8>) -> Size {
        MallocHeader::locate(user).as_ref().size()
    }

    /// Tag recorded in the header of `user`
    ///
    /// # Safety
    /// `user` must point at a live tracked block.
    #[inline]
    pub unsafe fn get_flags(user: NonNull<u8>) -> MemTag {
        MallocHeader::locate(user).as_ref().tag()
    }

    pub fn record_new_arena(&self, tag: MemTag) {
        self.summary.record_new_arena(tag);
    }

    pub fn record_arena_free(&self, tag: MemTag) {
        self.summary.record_arena_free(tag);
    }

    pub fn record_arena_size_change(&self, delta: SizeDelta, tag: MemTag) {
        self.summary.record_arena_size_change(delta, tag);
    }

    pub fn summary(&self) -> &MallocMemorySummary {
        &self.summary
    }

    pub fn snapshot(&self) -> MallocMemorySnapshot {
        self.summary.snapshot()
    }

    /// Site table, present only if the process started in detail mode
    pub fn site_table(&self) -> Option<&MallocSiteTable> {
        self.sites.as_ref()
    }

    /// Tear down the site table
    pub fn shutdown(&self) {
        if let Some(sites) = &self.sites {
            sites.shutdown();
        }
    }
}
