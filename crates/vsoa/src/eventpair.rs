// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cross-thread wakeup primitive used to signal a single-threaded event loop
//! from the shared timer thread (and from other API-calling threads) without
//! the loop busy-polling.
//!
//! Grounded on the fast-path-atomic-plus-condvar-fallback shape `hdds` uses
//! for its engine wakeups: a `notify` sets a flag and wakes anyone parked on
//! the condvar; `wait_timeout` parks until notified or the deadline passes;
//! `poll`/`check_and_clear` lets a loop integrated with `select`/`poll` on
//! real file descriptors test-and-clear without blocking.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared, cloneable handle. Cheap to clone (wraps an `Arc`); every clone
/// observes the same underlying flag.
#[derive(Clone)]
pub struct EventPair {
    inner: Arc<Inner>,
}

struct Inner {
    ready: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl Default for EventPair {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPair {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                ready: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Mark the pair ready and wake any thread parked in `wait`/`wait_timeout`.
    /// Idempotent: repeated notifies before a clear coalesce into one
    /// pending wakeup.
    pub fn notify(&self) {
        self.inner.ready.store(true, Ordering::Release);
        let _guard = self.inner.mutex.lock();
        self.inner.condvar.notify_all();
    }

    /// Test and clear the ready flag without blocking. Used by an event loop
    /// that multiplexes this alongside real socket file descriptors via
    /// `poll`.
    pub fn check_and_clear(&self) -> bool {
        self.inner.ready.swap(false, Ordering::AcqRel)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Block until notified or `timeout` elapses, then clear the flag.
    /// Returns whether it woke due to a notification (as opposed to timing
    /// out with nothing pending).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.check_and_clear() {
            return true;
        }
        let mut guard = self.inner.mutex.lock();
        self.inner.condvar.wait_while_for(
            &mut guard,
            |_: &mut ()| !self.inner.ready.load(Ordering::Acquire),
            timeout,
        );
        self.check_and_clear()
    }
}
