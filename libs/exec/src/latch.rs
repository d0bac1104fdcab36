// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::sync::{Condvar, Mutex};

#[derive(Debug)]
struct LatchState {
    remaining: usize,
    failed: bool,
}

/// Countdown barrier released once by each participant.
///
/// Tasks call [`arrive`][Self::arrive] exactly once; a coordinator that
/// could not schedule some participants removes them in bulk with
/// [`abandon`][Self::abandon], which also marks the round failed.
#[derive(Debug)]
pub struct Latch {
    state: Mutex<LatchState>,
    completed: Condvar,
}

impl Latch {
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            state: Mutex::new(LatchState {
                remaining: count,
                failed: false,
            }),
            completed: Condvar::new(),
        }
    }

    /// One participant is done; `failed` taints the whole round.
    pub fn arrive(&self, failed: bool) {
        let mut state = self.state.lock();
        if failed {
            state.failed = true;
        }
        state.remaining = state.remaining.saturating_sub(1);
        if state.remaining == 0 {
            self.completed.notify_all();
        }
    }

    /// Removes `count` participants that will never arrive and marks the
    /// round failed.
    pub fn abandon(&self, count: usize) {
        if count == 0 {
            return;
        }

        let mut state = self.state.lock();
        state.failed = true;
        state.remaining = state.remaining.saturating_sub(count);
        if state.remaining == 0 {
            self.completed.notify_all();
        }
    }

    /// Blocks until every participant arrived or was abandoned; true iff
    /// the round stayed clean.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        while state.remaining > 0 {
            state = self.completed.wait(state);
        }
        !state.failed
    }
}
