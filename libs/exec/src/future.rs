// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Single-shot result handoff between a producer task and one consumer.

use core::fmt;
use std::sync::Arc;

use crate::pool::{SubmitError, ThreadPool};
use crate::sync::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, onlyerror::Error)]
pub enum FutureError {
    /// The producer failed or was dropped before delivering a value.
    Failed,
}

struct FutureShared<T> {
    state: Mutex<FutureState<T>>,
    completed: Condvar,
}

struct FutureState<T> {
    ready: bool,
    value: Option<Result<T, FutureError>>,
}

/// Producer half. Consuming methods make at-most-once delivery a move
/// check rather than a runtime flag; dropping an unused completer fails
/// the future so no waiter blocks forever.
pub struct Completer<T> {
    shared: Option<Arc<FutureShared<T>>>,
}

/// Consumer half of a single-shot handoff.
pub struct Future<T> {
    shared: Arc<FutureShared<T>>,
}

/// Creates a connected producer/consumer pair.
#[must_use]
pub fn pair<T>() -> (Completer<T>, Future<T>) {
    let shared = Arc::new(FutureShared {
        state: Mutex::new(FutureState {
            ready: false,
            value: None,
        }),
        completed: Condvar::new(),
    });

    (
        Completer {
            shared: Some(Arc::clone(&shared)),
        },
        Future { shared },
    )
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").finish_non_exhaustive()
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl<T> Completer<T> {
    /// Delivers the value and wakes every waiter.
    pub fn complete(self, value: T) {
        self.finish(Ok(value));
    }

    /// Fails the future and wakes every waiter.
    pub fn fail(self) {
        self.finish(Err(FutureError::Failed));
    }

    fn finish(mut self, value: Result<T, FutureError>) {
        let shared = self.shared.take().expect("completer finished twice");
        let mut state = shared.state.lock();
        if !state.ready {
            state.ready = true;
            state.value = Some(value);
            shared.completed.notify_all();
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };

        let mut state = shared.state.lock();
        if !state.ready {
            state.ready = true;
            state.value = Some(Err(FutureError::Failed));
            shared.completed.notify_all();
        }
    }
}

impl<T> Future<T> {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().ready
    }

    /// Takes the result if it is already delivered; `None` while the
    /// producer is still running.
    pub fn try_get(&mut self) -> Option<Result<T, FutureError>> {
        let mut state = self.shared.state.lock();
        if !state.ready {
            return None;
        }
        state.value.take()
    }

    /// Blocks until the producer finishes.
    ///
    /// # Errors
    ///
    /// [`FutureError::Failed`] when the producer failed or was dropped.
    pub fn wait(self) -> Result<T, FutureError> {
        let mut state = self.shared.state.lock();
        while !state.ready {
            state = self.shared.completed.wait(state);
        }
        state.value.take().unwrap_or(Err(FutureError::Failed))
    }
}

/// Runs `task` on the pool and hands its output back through a future.
///
/// # Errors
///
/// Forwards the pool's [`SubmitError`] when the task cannot be queued; no
/// future is created in that case.
pub fn submit_with_future<T, F>(pool: &ThreadPool, task: F) -> Result<Future<T>, SubmitError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (completer, future) = pair();
    pool.submit(move || completer.complete(task()))?;
    Ok(future)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_get_before_completion_is_none() {
        let (completer, mut future) = pair::<u32>();
        assert!(!future.is_ready());
        assert!(future.try_get().is_none());

        completer.complete(5);
        assert!(future.is_ready());
        assert_eq!(future.try_get(), Some(Ok(5)));
        // Delivery is at-most-once.
        assert_eq!(future.try_get(), None);
    }

    #[test]
    fn wait_blocks_until_completed() {
        let (completer, future) = pair::<u32>();

        let producer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            completer.complete(42);
        });

        assert_eq!(future.wait(), Ok(42));
        producer.join().unwrap();
    }

    #[test]
    fn dropped_completer_fails_the_future() {
        let (completer, future) = pair::<u32>();
        drop(completer);
        assert_eq!(future.wait(), Err(FutureError::Failed));
    }

    #[test]
    fn explicit_failure_is_observable() {
        let (completer, future) = pair::<u32>();
        completer.fail();
        assert_eq!(future.wait(), Err(FutureError::Failed));
    }

    #[test]
    fn submit_with_future_round_trips() {
        let pool = ThreadPool::new(2, 8).unwrap();
        let future = submit_with_future(&pool, || 21 * 2).unwrap();
        assert_eq!(future.wait(), Ok(42));
    }

    #[test]
    fn submit_with_future_after_shutdown_fails() {
        let mut pool = ThreadPool::new(1, 2).unwrap();
        pool.shutdown();
        assert!(submit_with_future(&pool, || 1).is_err());
    }
}
