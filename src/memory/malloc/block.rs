/*!
 * Tracked Block
 *
 * Owning handle for a header-prefixed allocation. The header and payload
 * live in one allocation from the global allocator; only the payload is
 * reachable through the handle, and dropping it undoes the accounting
 * before returning the memory.
 */

use super::tracker::MallocTracker;
use super::super::stack::NativeCallStack;
use super::super::tag::MemTag;
use super::super::tracker::MemTracker;
use crate::core::limits::MALLOC_ALIGNMENT;
use crate::core::types::Size;
use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::slice;

/// Payload of a tracked allocation
pub struct TrackedBlock<'t> {
    tracker: &'t MemTracker,
    user: NonNull<u8>,
    size: Size,
    tag: MemTag,
    layout: Layout,
}

// SAFETY: the block owns its memory exclusively and the tracker is Sync
unsafe impl Send for TrackedBlock<'_> {}
// SAFETY: shared references only hand out shared slices
unsafe impl Sync for TrackedBlock<'_> {}

impl<'t> TrackedBlock<'t> {
    /// Allocate `size` zeroed payload bytes and account them to `tag`
    ///
    /// Returns `None` if the size overflows or the global allocator fails.
    pub(crate) fn allocate(
        tracker: &'t MemTracker,
        size: Size,
        tag: MemTag,
        stack: &NativeCallStack,
    ) -> Option<Self> {
        let total = tracker.malloc_header_size().checked_add(size)?.max(1);
        let layout = Layout::from_size_align(total, MALLOC_ALIGNMENT).ok()?;
        // SAFETY: layout size is non-zero
        let raw = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })?;
        // SAFETY: fresh block, aligned to MALLOC_ALIGNMENT, header plus payload long
        let user = unsafe { tracker.record_malloc(raw, size, tag, stack) };
        Some(Self {
            tracker,
            user,
            size,
            tag,
            layout,
        })
    }

    #[inline]
    pub fn len(&self) -> Size {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn tag(&self) -> MemTag {
        self.tag
    }

    /// Start of the payload
    pub fn as_ptr(&self) -> *const u8 {
        self.user.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `size` initialized bytes follow `user` for the block's lifetime
        unsafe { slice::from_raw_parts(self.user.as_ptr(), self.size) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity
        unsafe { slice::from_raw_parts_mut(self.user.as_ptr(), self.size) }
    }

    /// Size recorded in the header, if the block has one
    pub fn recorded_size(&self) -> Option<Size> {
        (self.tracker.malloc_header_size() > 0)
            // SAFETY: the block is live and was given a header
            .then(|| unsafe { MallocTracker::get_size(self.user) })
    }
}

impl Drop for TrackedBlock<'_> {
    fn drop(&mut self) {
        // SAFETY: `user` came from `record_malloc` on this tracker and is
        // released exactly once, here
        let raw = unsafe { self.tracker.record_free(self.user) };
        // SAFETY: `raw` is the pointer returned by `alloc_zeroed(self.layout)`
        unsafe { alloc::dealloc(raw.as_ptr(), self.layout) };
    }
}

impl fmt::Debug for TrackedBlock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedBlock")
            .field("ptr", &self.user)
            .field("size", &self.size)
            .field("tag", &self.tag)
            .finish()
    }
}
