//! Mutual exclusion for the engine's shared state.

use std::sync::{Mutex, PoisonError};

/// A mutex whose guard never escapes a closure.
///
/// Every mutable collection in the workspace (observer lists, middleware
/// lists, the task registry, per-task bookkeeping) sits behind one `Lock`.
/// Because access only happens inside [`Lock::with_lock`], a caller cannot
/// keep the lock held while it runs user callbacks.
///
/// Poisoning is ignored: a panic inside a critical section leaves the value
/// as it was at the panic point and the next caller proceeds with it.
///
/// # Example
///
/// ```
/// use alice_core::Lock;
///
/// let counter = Lock::new(0);
/// counter.with_lock(|n| *n += 1);
/// assert_eq!(counter.with_lock(|n| *n), 1);
/// ```
#[derive(Debug, Default)]
pub struct Lock<T> {
    inner: Mutex<T>,
}

impl<T> Lock<T> {
    /// Wrap `value` in a new lock.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Run `body` with exclusive access to the protected value.
    pub fn with_lock<R>(&self, body: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        body(&mut guard)
    }

    /// Consume the lock and return the protected value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
