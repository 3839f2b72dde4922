//! Counting semaphore used by the worker pool.
//!
//! `std::sync` provides the mutex and condition variable; the counting
//! semaphore is the one primitive the queue protocol needs that the
//! standard library does not ship.

use std::sync::{Condvar, Mutex};

/// A counting semaphore built on a mutex and a condition variable.
///
/// `post` increments the permit count and wakes one waiter; `wait` blocks
/// until a permit is available and consumes it. Spurious condvar wakeups
/// are absorbed by re-checking the count.
#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub(crate) fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Blocks until a permit is available, then consumes it.
    pub(crate) fn wait(&self) {
        let mut count = self
            .available
            .wait_while(self.permits.lock().unwrap_or_else(|e| e.into_inner()), |count| {
                *count == 0
            })
            .unwrap_or_else(|e| e.into_inner());
        *count -= 1;
    }

    /// Releases one permit and wakes a single waiter.
    pub(crate) fn post(&self) {
        let mut count = self.permits.lock().unwrap_or_else(|e| e.into_inner());
        *count += 1;
        self.available.notify_one();
    }
}
