//! One-shot signal with a deadline.
//!
//! A [`WaitGate`] carries exactly one value from whoever resolves a pending
//! query to whoever is waiting on it. The first `signal` wins; later calls
//! are ignored. Waiting works both from async code and from plain threads.

use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tokio::sync::Notify;

/// The deadline passed before the gate was signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("wait gate expired")]
pub struct Expired;

#[derive(Debug)]
enum Slot<T> {
    Empty,
    Ready(T),
    Taken,
}

#[derive(Debug)]
pub struct WaitGate<T> {
    slot: Mutex<Slot<T>>,
    condvar: Condvar,
    notify: Notify,
}

impl<T> Default for WaitGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WaitGate<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            condvar: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Deliver `value`. Returns false (and drops `value`) if the gate was
    /// already signalled.
    pub fn signal(&self, value: T) -> bool {
        {
            let mut slot = self.slot.lock();
            if !matches!(*slot, Slot::Empty) {
                return false;
            }
            *slot = Slot::Ready(value);
        }
        self.condvar.notify_all();
        self.notify.notify_waiters();
        true
    }

    pub fn is_signalled(&self) -> bool {
        !matches!(*self.slot.lock(), Slot::Empty)
    }

    /// Take the value if it has arrived and nobody has taken it yet.
    pub fn try_take(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(value) => Some(value),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Suspend until signalled or `deadline` passes.
    pub async fn wait(&self, deadline: Instant) -> Result<T, Expired> {
        let deadline = tokio::time::Instant::from_std(deadline);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking so a signal in between is not lost
            notified.as_mut().enable();

            if let Some(value) = self.try_take() {
                return Ok(value);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_take().ok_or(Expired);
            }
        }
    }

    /// Block the current thread until signalled or `deadline` passes.
    ///
    /// Must not be called from inside an async task.
    pub fn wait_blocking(&self, deadline: Instant) -> Result<T, Expired> {
        let mut slot = self.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Ready(value) => return Ok(value),
                other => *slot = other,
            }
            if self.condvar.wait_until(&mut slot, deadline).timed_out() {
                return match std::mem::replace(&mut *slot, Slot::Taken) {
                    Slot::Ready(value) => Ok(value),
                    other => {
                        *slot = other;
                        Err(Expired)
                    }
                };
            }
        }
    }
}
