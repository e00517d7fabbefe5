use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Resettable signal that stalled producers wait on.
///
/// Set whenever a merge unit finishes. Wake-ups carry no payload and may be
/// spurious: waiters must re-check their own condition.
#[derive(Debug, Default)]
pub struct StallGate {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl StallGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.condvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    /// Blocks until the gate is set. Returns immediately if it already is.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.condvar.wait(&mut signaled);
        }
    }

    /// Like `wait`, giving up after `timeout`. Returns whether the gate was set.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if *signaled {
            return true;
        }
        let _ = self.condvar.wait_for(&mut signaled, timeout);
        *signaled
    }
}
