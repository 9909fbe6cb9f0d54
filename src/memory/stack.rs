/*!
 * Native Call Stack
 * Fixed-depth call-site fingerprints
 */

use crate::core::limits::NMT_TRACKING_STACK_DEPTH;
use crate::core::types::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-depth sequence of return addresses identifying a call site
///
/// Two stacks are equal iff every frame matches; shorter captures are
/// zero-padded. A stack never changes after it is built.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NativeCallStack {
    frames: [Address; NMT_TRACKING_STACK_DEPTH],
}

impl NativeCallStack {
    /// Stack with no frames
    pub const EMPTY: NativeCallStack = NativeCallStack {
        frames: [0; NMT_TRACKING_STACK_DEPTH],
    };

    /// Build a stack from explicit frames, keeping at most the tracking depth
    pub fn from_frames(frames: &[Address]) -> Self {
        let mut stack = Self::EMPTY;
        for (slot, frame) in stack.frames.iter_mut().zip(frames) {
            *slot = *frame;
        }
        stack
    }

    /// Capture the caller's stack, dropping the top `skip` frames
    #[inline(never)]
    pub fn capture(skip: usize) -> Self {
        let mut frames = [0; NMT_TRACKING_STACK_DEPTH];
        let mut skipped = 0;
        let mut filled = 0;
        backtrace::trace(|frame| {
            if skipped < skip {
                skipped += 1;
                return true;
            }
            if let Some(slot) = frames.get_mut(filled) {
                *slot = frame.ip() as Address;
                filled += 1;
            }
            filled < NMT_TRACKING_STACK_DEPTH
        });
        Self { frames }
    }

    #[inline]
    pub fn frames(&self) -> &[Address; NMT_TRACKING_STACK_DEPTH] {
        &self.frames
    }

    /// Number of leading non-zero frames
    pub fn frame_count(&self) -> usize {
        self.frames.iter().take_while(|frame| **frame != 0).count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames[0] == 0
    }

    /// Cheap fingerprint hash: wrapping sum of all frames
    #[inline]
    pub fn calculate_hash(&self) -> usize {
        self.frames
            .iter()
            .fold(0usize, |hash, frame| hash.wrapping_add(*frame))
    }
}

impl fmt::Debug for NativeCallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeCallStack{}", self)
    }
}

impl fmt::Display for NativeCallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, frame) in self.frames[..self.frame_count()].iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "0x{:x}", frame)?;
        }
        f.write_str("]")
    }
}
