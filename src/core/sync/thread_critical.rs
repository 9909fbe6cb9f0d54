/*!
 * Thread Critical Section
 *
 * Short, reentrant mutual exclusion around tracker bookkeeping.
 *
 * # Rules
 *
 * - Held for the duration of one tracking call, never across I/O
 * - The same thread may re-enter (e.g. reserve-and-commit groups two calls)
 * - A holder must never wait on anything that needs another thread to make
 *   progress towards this lock
 */

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::fmt;

/// Reentrant critical section protecting a piece of tracker state
///
/// Entering the section only acquires the lock. Data is reached through
/// [`ThreadCritical::with`], which borrows it for the closure's duration.
/// Calling `with` again from inside its own closure panics: nested calls
/// must be made after the closure returns, while an outer
/// [`ThreadCriticalGuard`] keeps the section held.
pub struct ThreadCritical<T> {
    inner: ReentrantMutex<RefCell<T>>,
}

impl<T> ThreadCritical<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(value)),
        }
    }

    /// Enter the critical section without touching the data
    ///
    /// Used to group several tracking calls into one atomic step.
    #[inline]
    pub fn enter(&self) -> ThreadCriticalGuard<'_, T> {
        ThreadCriticalGuard {
            _guard: self.inner.lock(),
        }
    }

    /// Run `f` with exclusive access to the protected data
    #[inline]
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let guard = self.inner.lock();
        let mut data = guard.borrow_mut();
        f(&mut data)
    }
}

impl<T: Default> Default for ThreadCritical<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for ThreadCritical<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadCritical").finish_non_exhaustive()
    }
}

/// Proof that the current thread holds a [`ThreadCritical`] section
#[must_use = "the critical section is left as soon as the guard is dropped"]
pub struct ThreadCriticalGuard<'a, T> {
    _guard: ReentrantMutexGuard<'a, RefCell<T>>,
}

impl<T> fmt::Debug for ThreadCriticalGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ThreadCriticalGuard")
    }
}
