// Implements a one-shot lock notification primitive usable in threads.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// `LatchState` defines the underlying state of the Condvar based latch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LatchState {
    Pending,
    Released,
}

/// `CompletionLatch` allows a thread to sleep until another thread signals
/// that a piece of work settled.
///
/// Unlike a reusable lock signal, once released the latch stays released:
/// a signal that arrives before `wait_timeout` is never lost.
pub struct CompletionLatch {
    /// The condition variable used to wait on the release,
    /// also provides a way to awake a sleeping thread.
    event: Condvar,

    /// The mutex used to protect the state.
    lock: Mutex<LatchState>,
}

impl Default for CompletionLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for CompletionLatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompletionLatch")
            .field("state", &self.state())
            .finish()
    }
}

impl CompletionLatch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            event: Condvar::new(),
            lock: Mutex::new(LatchState::Pending),
        }
    }

    /// Releases the latch, waking every waiter.
    pub fn signal(&self) {
        let mut state = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        *state = LatchState::Released;
        drop(state);

        self.event.notify_all();
    }

    #[must_use]
    pub fn state(&self) -> LatchState {
        *self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.state() == LatchState::Released
    }

    /// Blocks until released or until `timeout` elapsed.
    ///
    /// Returns `true` when the latch was released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if *state == LatchState::Released {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("CompletionLatch timed out after {:?}", timeout);
                return false;
            }

            let (next, _) = self
                .event
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }
}
