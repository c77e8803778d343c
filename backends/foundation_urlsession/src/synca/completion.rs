//! One-shot continuations for delegate decisions.
//!
//! The worker thread hands a [`Completion`] to the delegate and blocks on the
//! matching [`Pending`]. `Completion::complete` consumes the continuation, so a
//! decision can be delivered at most once. Dropping a `Completion` without
//! completing it leaves the worker waiting until the task is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

struct Slot<T> {
    value: Mutex<Option<T>>,
    event: Condvar,
    abandoned: AtomicBool,
}

/// The delegate-facing half of a decision rendezvous.
pub struct Completion<T> {
    slot: Arc<Slot<T>>,
    completed: bool,
}

/// The worker-facing half of a decision rendezvous.
pub struct Pending<T> {
    slot: Arc<Slot<T>>,
}

impl<T> core::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Completion")
            .field("completed", &self.completed)
            .finish()
    }
}

impl<T> core::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pending")
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

impl<T> Completion<T> {
    #[must_use]
    pub fn pair() -> (Completion<T>, Pending<T>) {
        let slot = Arc::new(Slot {
            value: Mutex::new(None),
            event: Condvar::new(),
            abandoned: AtomicBool::new(false),
        });
        (
            Completion {
                slot: slot.clone(),
                completed: false,
            },
            Pending { slot },
        )
    }

    /// Delivers the decision and wakes the waiting worker.
    pub fn complete(mut self, value: T) {
        let mut guard = self
            .slot
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(value);
        drop(guard);

        self.completed = true;
        self.slot.event.notify_all();
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if !self.completed {
            self.slot.abandoned.store(true, Ordering::Release);
            self.slot.event.notify_all();
        }
    }
}

impl<T> Pending<T> {
    /// Whether the continuation was dropped without a decision.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.slot.abandoned.load(Ordering::Acquire)
    }

    /// Blocks until the decision arrives or `should_abandon` returns true.
    ///
    /// `should_abandon` is checked every `poll` interval; an abandoned
    /// continuation keeps waiting on it.
    pub fn wait(&self, poll: Duration, should_abandon: impl Fn() -> bool) -> Option<T> {
        let mut reported = false;
        let mut guard = self
            .slot
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            if let Some(value) = guard.take() {
                return Some(value);
            }

            if should_abandon() {
                return None;
            }

            if !reported && self.is_abandoned() {
                reported = true;
                tracing::warn!("Decision continuation dropped without completing, task stalls");
            }

            let (next, _) = self
                .slot
                .event
                .wait_timeout(guard, poll)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
    }
}
