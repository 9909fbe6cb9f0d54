/*!
 * Access Gate
 *
 * Advisory shared/exclusive counter with one-shot close semantics.
 *
 * Readers increment the counter on entry and decrement it on exit. The
 * closing thread adds a large negative sentinel, which bars every future
 * reader, then spins until the readers already inside have drained. Once
 * closed the gate never reopens.
 */

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

/// Sentinel added to the counter by `close`
const CLOSED: i32 = i32::MIN;

/// Single-writer, many-reader barrier used at teardown
pub struct AccessGate {
    state: AtomicI32,
}

impl AccessGate {
    pub const fn new() -> Self {
        Self {
            state: AtomicI32::new(0),
        }
    }

    /// Try to enter as a reader
    ///
    /// Returns `None` once the gate has been closed.
    #[inline]
    pub fn try_enter(&self) -> Option<SharedAccess<'_>> {
        let previous = self.state.fetch_add(1, Ordering::AcqRel);
        if previous < 0 {
            self.state.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(SharedAccess { gate: self })
    }

    /// Close the gate and wait for current readers to leave
    ///
    /// Returns `false` if the gate was already closed.
    pub fn close(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current < 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                current.wrapping_add(CLOSED),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        // Readers that lost the race back out on their own
        while self.state.load(Ordering::Acquire) != CLOSED {
            std::hint::spin_loop();
        }
        true
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) < 0
    }

    /// Number of readers currently inside (0 once closed and drained)
    pub fn readers(&self) -> usize {
        let state = self.state.load(Ordering::Acquire);
        let readers = if state < 0 {
            state.wrapping_sub(CLOSED)
        } else {
            state
        };
        usize::try_from(readers).unwrap_or(0)
    }
}

impl Default for AccessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGate")
            .field("closed", &self.is_closed())
            .field("readers", &self.readers())
            .finish()
    }
}

/// Reader ticket; leaves the gate on drop
#[must_use = "shared access ends as soon as the ticket is dropped"]
pub struct SharedAccess<'a> {
    gate: &'a AccessGate,
}

impl Drop for SharedAccess<'_> {
    #[inline]
    fn drop(&mut self) {
        self.gate.state.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for SharedAccess<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedAccess")
    }
}
