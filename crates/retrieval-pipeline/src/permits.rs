//! In-flight limiter shared by a stage's dispatcher and consumer.
//!
//! The dispatcher takes a permit before pulling each input item; the consumer
//! returns it when the item's result is emitted. Items that are queued,
//! running, or waiting in the reorder buffer all hold a permit, which is what
//! keeps a stage's memory independent of its input size.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct State {
    available: usize,
    cancelled: bool,
}

/// Counting permits with a cancellation flag.
#[derive(Debug)]
pub struct InFlight {
    state: Mutex<State>,
    changed: Condvar,
}

impl InFlight {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(State {
                available: limit.max(1),
                cancelled: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a permit is free. Returns false once cancelled.
    pub fn acquire(&self) -> bool {
        let mut state = self.lock();
        loop {
            if state.cancelled {
                return false;
            }
            if state.available > 0 {
                state.available -= 1;
                return true;
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn release(&self) {
        let mut state = self.lock();
        state.available += 1;
        self.changed.notify_one();
    }

    /// Wake every waiter and refuse further permits.
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.cancelled = true;
        self.changed.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }
}
