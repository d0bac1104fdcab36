// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::sync::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, onlyerror::Error)]
pub enum SubmitError {
    /// The pool is shutting down.
    ShuttingDown,
    /// The queue is full (non-blocking submission only).
    QueueFull,
}

/// Lifetime counters; `submitted == completed + rejected` holds whenever
/// the pool is idle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: usize,
    pub completed: usize,
    pub rejected: usize,
}

struct PoolState {
    queue: Box<[Option<Task>]>,
    head: usize,
    tail: usize,
    count: usize,
    active_workers: usize,
    shutting_down: bool,
    stats: PoolStats,
}

struct PoolShared {
    state: Mutex<PoolState>,
    has_work: Condvar,
    has_space: Condvar,
    idle: Condvar,
    capacity: usize,
}

/// Preemptive worker pool: OS threads serving a bounded FIFO task queue.
///
/// [`submit`](Self::submit) applies backpressure by blocking while the
/// queue is full; [`try_submit`](Self::try_submit) fails fast instead.
/// [`wait_idle`](Self::wait_idle) is a barrier that opens once the queue
/// is empty **and** no task is in flight.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers.len())
            .field("capacity", &self.shared.capacity)
            .finish_non_exhaustive()
    }
}

impl ThreadPool {
    /// Starts `worker_count` OS threads over a queue of `queue_capacity`
    /// slots. Returns `None` for zero counts or when thread creation
    /// fails (any threads already started are shut down again).
    #[must_use]
    pub fn new(worker_count: usize, queue_capacity: usize) -> Option<Self> {
        if worker_count == 0 || queue_capacity == 0 {
            return None;
        }

        let mut queue = Vec::with_capacity(queue_capacity);
        queue.resize_with(queue_capacity, || None);

        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: queue.into_boxed_slice(),
                head: 0,
                tail: 0,
                count: 0,
                active_workers: 0,
                shutting_down: false,
                stats: PoolStats::default(),
            }),
            has_work: Condvar::new(),
            has_space: Condvar::new(),
            idle: Condvar::new(),
            capacity: queue_capacity,
        });

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker_shared = Arc::clone(&shared);
            let spawned = std::thread::Builder::new()
                .name(format!("keel-pool-{index}"))
                .spawn(move || worker_main(&worker_shared));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(error) => {
                    tracing::warn!(%error, "worker thread creation failed");
                    let mut pool = Self { shared, workers };
                    pool.shutdown();
                    return None;
                }
            }
        }

        Some(Self { shared, workers })
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.state.lock().stats
    }

    /// Submits a task, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// [`SubmitError::ShuttingDown`] once shutdown has begun (the
    /// rejection is counted).
    pub fn submit<F>(&self, task: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        while !state.shutting_down && state.count == self.shared.capacity {
            state = self.shared.has_space.wait(state);
        }

        if state.shutting_down {
            state.stats.rejected += 1;
            return Err(SubmitError::ShuttingDown);
        }

        state.enqueue(Box::new(task), self.shared.capacity);
        self.shared.has_work.notify_one();
        Ok(())
    }

    /// Submits a task without blocking.
    ///
    /// # Errors
    ///
    /// [`SubmitError::QueueFull`] under backpressure,
    /// [`SubmitError::ShuttingDown`] after shutdown; both count as
    /// rejected.
    pub fn try_submit<F>(&self, task: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock();

        if state.shutting_down {
            state.stats.rejected += 1;
            return Err(SubmitError::ShuttingDown);
        }
        if state.count == self.shared.capacity {
            state.stats.rejected += 1;
            return Err(SubmitError::QueueFull);
        }

        state.enqueue(Box::new(task), self.shared.capacity);
        self.shared.has_work.notify_one();
        Ok(())
    }

    /// Blocks until the queue is empty and no worker is running a task.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        while state.count > 0 || state.active_workers > 0 {
            state = self.shared.idle.wait(state);
        }
    }

    /// Stops accepting work, drains the queue, and joins every worker.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutting_down = true;
        }
        self.shared.has_work.notify_all();
        self.shared.has_space.notify_all();
        self.shared.idle.notify_all();

        for worker in self.workers.drain(..) {
            if let Err(panic) = worker.join() {
                tracing::warn!(?panic, "pool worker terminated by panic");
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl PoolState {
    fn enqueue(&mut self, task: Task, capacity: usize) {
        debug_assert!(self.count < capacity);
        self.queue[self.tail] = Some(task);
        self.tail = (self.tail + 1) % capacity;
        self.count += 1;
        self.stats.submitted += 1;
    }

    fn dequeue(&mut self, capacity: usize) -> Option<Task> {
        if self.count == 0 {
            return None;
        }

        let task = self.queue[self.head].take();
        debug_assert!(task.is_some());
        self.head = (self.head + 1) % capacity;
        self.count -= 1;
        task
    }
}

fn worker_main(shared: &PoolShared) {
    loop {
        let mut state = shared.state.lock();
        while state.count == 0 && !state.shutting_down {
            state = shared.has_work.wait(state);
        }

        if state.count == 0 && state.shutting_down {
            return;
        }

        let Some(task) = state.dequeue(shared.capacity) else {
            continue;
        };
        state.active_workers += 1;
        shared.has_space.notify_one();
        drop(state);

        // A panicking task must not take the worker down with it; the
        // barrier accounting below has to run either way.
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::warn!("pool task panicked");
        }

        let mut state = shared.state.lock();
        state.active_workers = state.active_workers.saturating_sub(1);
        state.stats.completed += 1;
        if state.count == 0 && state.active_workers == 0 {
            shared.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn zero_parameters_are_rejected() {
        assert!(ThreadPool::new(0, 4).is_none());
        assert!(ThreadPool::new(4, 0).is_none());
    }

    #[test]
    fn fan_out_sums_indices() {
        let pool = ThreadPool::new(4, 64).unwrap();
        let sum = Arc::new(AtomicI64::new(0));

        for index in 1..=100i64 {
            let sum = Arc::clone(&sum);
            pool.submit(move || {
                sum.fetch_add(index, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.wait_idle();
        assert_eq!(sum.load(Ordering::SeqCst), 5050);

        let stats = pool.stats();
        assert_eq!(stats.submitted, 100);
        assert_eq!(stats.completed, 100);
        assert_eq!(stats.rejected, 0);
    }

    #[test]
    fn wait_idle_balances_the_books() {
        let pool = ThreadPool::new(2, 8).unwrap();
        for _ in 0..32 {
            pool.submit(|| {
                std::thread::sleep(std::time::Duration::from_micros(100));
            })
            .unwrap();
        }

        pool.wait_idle();
        let stats = pool.stats();
        assert_eq!(stats.submitted, stats.completed + stats.rejected);
    }

    #[test]
    fn try_submit_fails_fast_when_full() {
        // One worker wedged on a gate so the queue can fill up.
        let pool = ThreadPool::new(1, 1).unwrap();
        let gate = Arc::new(Channel::<()>::new(1).unwrap());

        let wait_gate = Arc::clone(&gate);
        pool.submit(move || {
            let _ = wait_gate.recv();
        })
        .unwrap();

        // The worker may still be picking up the first task; saturate the
        // queue until a rejection is observed.
        let mut rejected = false;
        for _ in 0..1000 {
            match pool.try_submit(|| {}) {
                Err(SubmitError::QueueFull) => {
                    rejected = true;
                    break;
                }
                Ok(()) | Err(SubmitError::ShuttingDown) => {}
            }
            std::thread::yield_now();
        }
        assert!(rejected);
        assert!(pool.stats().rejected >= 1);

        gate.close();
        pool.wait_idle();
    }

    #[test]
    fn submissions_after_shutdown_are_rejected() {
        let mut pool = ThreadPool::new(2, 4).unwrap();
        pool.shutdown();

        assert_eq!(pool.submit(|| {}), Err(SubmitError::ShuttingDown));
        assert_eq!(pool.stats().rejected, 1);
    }

    #[test]
    fn panicking_task_does_not_wedge_the_pool() {
        let pool = ThreadPool::new(1, 4).unwrap();
        pool.submit(|| panic!("boom")).unwrap();
        pool.submit(|| {}).unwrap();

        pool.wait_idle();
        assert_eq!(pool.stats().completed, 2);
    }

    #[test]
    fn shutdown_drains_queued_work() {
        let mut pool = ThreadPool::new(1, 64).unwrap();
        let counter = Arc::new(AtomicI64::new(0));

        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }
}
