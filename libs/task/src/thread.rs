// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::boxed::Box;
use core::fmt;

/// Lifecycle of a lightweight thread. Threads are single-shot: once a
/// terminal state is reached the slot is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    New,
    Ready,
    Running,
    Completed,
    Failed,
    /// Reserved for callers; the scheduler never enters this state itself.
    Cancelled,
}

/// Failure reported by a lightweight thread body. The scheduler marks the
/// thread [`Failed`](ThreadState::Failed) and does not retry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFailed(pub(crate) ());

impl TaskFailed {
    #[must_use]
    pub const fn new() -> Self {
        Self(())
    }
}

impl fmt::Display for TaskFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("lightweight thread body failed")
    }
}

impl core::error::Error for TaskFailed {}

pub(crate) type ThreadProc = Box<dyn FnOnce() -> Result<(), TaskFailed>>;

/// One cooperative thread: an id, a state word and a single-shot body.
pub(crate) struct LwThread {
    id: u64,
    state: ThreadState,
    proc: Option<ThreadProc>,
}

impl fmt::Debug for LwThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LwThread")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl LwThread {
    pub(crate) fn new(id: u64, proc: ThreadProc) -> Self {
        Self {
            id,
            state: ThreadState::Ready,
            proc: Some(proc),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> ThreadState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    pub(crate) fn is_done(&self) -> bool {
        matches!(
            self.state,
            ThreadState::Completed | ThreadState::Failed | ThreadState::Cancelled
        )
    }

    /// Runs the body to completion. Only `Ready` threads run; anything
    /// else (already run, cancelled, failed at spawn) reports failure.
    pub(crate) fn run(&mut self) -> bool {
        if self.state != ThreadState::Ready {
            return false;
        }
        let Some(proc) = self.proc.take() else {
            self.state = ThreadState::Failed;
            return false;
        };

        self.state = ThreadState::Running;
        match proc() {
            Ok(()) => {
                self.state = ThreadState::Completed;
                true
            }
            Err(TaskFailed(())) => {
                self.state = ThreadState::Failed;
                false
            }
        }
    }
}
