// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use crate::deque::WorkDeque;
use crate::thread::{LwThread, TaskFailed, ThreadState};

/// Upper bound on worker deques.
pub const MAX_WORKERS: usize = 8;
/// Upper bound on thread slots over the scheduler's lifetime.
pub const MAX_THREADS: usize = 512;

/// Identifier of a spawned lightweight thread. Ids are monotonic and start
/// at 1; they are never reused, even for threads that failed to enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, onlyerror::Error)]
pub enum SpawnError {
    /// All thread slots are in use.
    Exhausted,
    /// The target worker's run queue is full.
    QueueFull,
}

/// Counters kept across the scheduler's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub enqueued: usize,
    pub executed: usize,
    pub stolen: usize,
    pub failed_spawns: usize,
}

/// Cooperative scheduler: a fixed pool of lightweight threads dispatched
/// across per-worker deques with forward-rotating work stealing.
///
/// Spawns are placed round-robin. A worker out of local work steals from
/// the tail of the first non-empty victim at offsets `1..worker_count`
/// from itself; deterministic, not randomised.
pub struct Scheduler {
    workers: Vec<WorkDeque>,
    threads: Vec<LwThread>,
    rr_worker: usize,
    next_thread_id: u64,
    stats: SchedulerStats,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("worker_count", &self.workers.len())
            .field("thread_count", &self.threads.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler with `worker_count` deques, clamped into
    /// `1..=MAX_WORKERS`.
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.clamp(1, MAX_WORKERS);
        let mut workers = Vec::with_capacity(worker_count);
        workers.resize_with(worker_count, WorkDeque::new);

        Self {
            workers,
            threads: Vec::new(),
            rr_worker: 0,
            next_thread_id: 1,
            stats: SchedulerStats::default(),
        }
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Total thread slots consumed so far. Never shrinks: failed and
    /// completed threads keep their slot so ids stay monotonic.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    #[must_use]
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Threads sitting in run queues, not yet picked up.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.workers.iter().map(WorkDeque::len).sum()
    }

    #[must_use]
    pub fn thread_state(&self, id: ThreadId) -> Option<ThreadState> {
        self.find_thread(id).map(LwThread::state)
    }

    #[must_use]
    pub fn thread_is_done(&self, id: ThreadId) -> bool {
        self.find_thread(id).is_some_and(LwThread::is_done)
    }

    /// Spawns a single-shot task onto the next worker in round-robin
    /// order.
    ///
    /// # Errors
    ///
    /// [`SpawnError::Exhausted`] when all [`MAX_THREADS`] slots are used;
    /// [`SpawnError::QueueFull`] when the target deque is full (the thread
    /// then occupies its slot in the `Failed` state).
    pub fn spawn<F>(&mut self, body: F) -> Result<ThreadId, SpawnError>
    where
        F: FnOnce() -> Result<(), TaskFailed> + 'static,
    {
        if self.threads.len() >= MAX_THREADS {
            self.stats.failed_spawns += 1;
            return Err(SpawnError::Exhausted);
        }

        let slot = self.threads.len();
        let id = self.next_thread_id;
        self.next_thread_id += 1;
        self.threads.push(LwThread::new(id, Box::new(body)));

        let target = self.rr_worker % self.workers.len();
        self.rr_worker += 1;

        if !self.workers[target].push_back(slot) {
            self.stats.failed_spawns += 1;
            self.threads[slot].set_state(ThreadState::Failed);
            return Err(SpawnError::QueueFull);
        }

        self.stats.enqueued += 1;
        tracing::trace!(thread = id, worker = target, "spawned");
        Ok(ThreadId(id))
    }

    /// Marks a not-yet-finished thread as cancelled. Advisory: the slot
    /// stays queued and is skipped (without retry) when dequeued.
    pub fn cancel(&mut self, id: ThreadId) -> bool {
        let Some(thread) = self.threads.iter_mut().find(|thread| thread.id() == id.0) else {
            return false;
        };
        if thread.is_done() {
            return false;
        }

        thread.set_state(ThreadState::Cancelled);
        true
    }

    /// Runs one thread on behalf of `worker`: its own queue head first,
    /// else the first stealable victim tail. Returns false when nothing
    /// ran to completion.
    pub fn run_next(&mut self, worker: usize) -> bool {
        if worker >= self.workers.len() {
            return false;
        }

        let slot = if let Some(slot) = self.workers[worker].pop_front() {
            slot
        } else if let Some(slot) = self.steal(worker) {
            slot
        } else {
            return false;
        };

        let ran = self.threads[slot].run();
        if ran {
            self.stats.executed += 1;
        } else {
            tracing::trace!(thread = self.threads[slot].id(), "thread did not complete");
        }
        ran
    }

    /// Cooperative drain: every worker attempts one step per round while
    /// pending work exists and progress is made. An outer guard of
    /// `2 · MAX_THREADS` rounds bounds the loop. Returns the number of
    /// threads executed.
    pub fn run_all(&mut self) -> usize {
        let mut total = 0;
        let mut guard = MAX_THREADS * 2;

        while self.pending_count() > 0 && guard > 0 {
            let mut executed_this_round = 0;

            for worker in 0..self.workers.len() {
                if self.run_next(worker) {
                    executed_this_round += 1;
                    total += 1;
                }
            }

            if executed_this_round == 0 {
                break;
            }
            guard -= 1;
        }

        total
    }

    /// Drops all queued work and every thread slot. Stats survive.
    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            worker.clear();
        }
        self.threads.clear();
        self.rr_worker = 0;
    }

    fn steal(&mut self, thief: usize) -> Option<usize> {
        for offset in 1..self.workers.len() {
            let victim = (thief + offset) % self.workers.len();
            if let Some(slot) = self.workers[victim].pop_back() {
                self.stats.stolen += 1;
                tracing::trace!(victim, thief, "stole thread");
                return Some(slot);
            }
        }

        None
    }

    fn find_thread(&self, id: ThreadId) -> Option<&LwThread> {
        self.threads.iter().find(|thread| thread.id() == id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    #[test]
    fn single_worker_runs_in_spawn_order() {
        let mut scheduler = Scheduler::new(1);
        let order = Rc::new(Cell::new(0u32));

        for expected in 0..4u32 {
            let order = Rc::clone(&order);
            scheduler
                .spawn(move || {
                    assert_eq!(order.get(), expected);
                    order.set(expected + 1);
                    Ok(())
                })
                .unwrap();
        }

        assert_eq!(scheduler.run_all(), 4);
        assert_eq!(order.get(), 4);
        assert_eq!(scheduler.stats().stolen, 0);
    }

    #[test]
    fn one_worker_drains_all_queues_by_stealing() {
        let mut scheduler = Scheduler::new(3);
        let sum = Arc::new(AtomicI64::new(0));
        let mut ids = Vec::new();

        for value in 1..=6i64 {
            let sum = Arc::clone(&sum);
            let id = scheduler
                .spawn(move || {
                    sum.fetch_add(value, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
            ids.push(id);
        }

        while scheduler.run_next(0) {}

        assert_eq!(sum.load(Ordering::SeqCst), 21);
        for id in ids {
            assert_eq!(scheduler.thread_state(id), Some(ThreadState::Completed));
        }
        assert!(scheduler.stats().stolen >= 1);
        assert_eq!(scheduler.stats().executed, 6);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn spawn_places_round_robin() {
        let mut scheduler = Scheduler::new(2);
        for _ in 0..4 {
            scheduler.spawn(|| Ok(())).unwrap();
        }

        // Two per worker; worker 1 never steals if it drains its own queue.
        assert!(scheduler.run_next(1));
        assert!(scheduler.run_next(1));
        assert_eq!(scheduler.stats().stolen, 0);
        assert_eq!(scheduler.pending_count(), 2);
    }

    #[test]
    fn failed_bodies_keep_their_slot() {
        let mut scheduler = Scheduler::new(1);
        let id = scheduler.spawn(|| Err(TaskFailed::new())).unwrap();

        assert!(!scheduler.run_next(0));
        assert_eq!(scheduler.thread_state(id), Some(ThreadState::Failed));
        assert_eq!(scheduler.thread_count(), 1);
        assert_eq!(scheduler.stats().executed, 0);
    }

    #[test]
    fn cancelled_threads_are_skipped() {
        let mut scheduler = Scheduler::new(1);
        let id = scheduler.spawn(|| Ok(())).unwrap();

        assert!(scheduler.cancel(id));
        assert!(!scheduler.run_next(0));
        assert_eq!(scheduler.thread_state(id), Some(ThreadState::Cancelled));
        assert!(!scheduler.cancel(id));
    }

    #[test]
    fn spawn_onto_a_full_deque_fails_the_thread() {
        let mut scheduler = Scheduler::new(1);
        for _ in 0..crate::deque::QUEUE_CAPACITY {
            scheduler.spawn(|| Ok(())).unwrap();
        }

        // Slots remain (512 > 256) but worker 0's ring is full.
        match scheduler.spawn(|| Ok(())) {
            Err(SpawnError::QueueFull) => {}
            other => panic!("expected QueueFull, got {other:?}"),
        }
        assert_eq!(scheduler.stats().failed_spawns, 1);
        // The failed thread still holds its slot, in the Failed state.
        assert_eq!(
            scheduler.thread_count(),
            crate::deque::QUEUE_CAPACITY + 1
        );
    }

    #[test]
    fn spawn_exhaustion_is_counted() {
        let mut scheduler = Scheduler::new(8);
        for _ in 0..MAX_THREADS {
            scheduler.spawn(|| Ok(())).unwrap();
        }

        assert_eq!(scheduler.spawn(|| Ok(())), Err(SpawnError::Exhausted));
        assert_eq!(scheduler.stats().failed_spawns, 1);
        assert_eq!(scheduler.thread_count(), MAX_THREADS);
    }

    #[test]
    fn ids_are_monotonic_from_one() {
        let mut scheduler = Scheduler::new(1);
        let a = scheduler.spawn(|| Ok(())).unwrap();
        let b = scheduler.spawn(|| Ok(())).unwrap();
        assert_eq!(a.as_u64(), 1);
        assert_eq!(b.as_u64(), 2);
    }

    #[test]
    fn worker_count_is_clamped() {
        assert_eq!(Scheduler::new(0).worker_count(), 1);
        assert_eq!(Scheduler::new(64).worker_count(), MAX_WORKERS);
    }

    #[test]
    fn run_all_reports_executed_total() {
        let mut scheduler = Scheduler::new(4);
        for _ in 0..32 {
            scheduler.spawn(|| Ok(())).unwrap();
        }

        assert_eq!(scheduler.run_all(), 32);
        assert_eq!(scheduler.stats().executed, 32);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn shutdown_clears_queues_but_keeps_stats() {
        let mut scheduler = Scheduler::new(2);
        for _ in 0..4 {
            scheduler.spawn(|| Ok(())).unwrap();
        }
        scheduler.run_next(0);

        scheduler.shutdown();
        assert_eq!(scheduler.pending_count(), 0);
        assert_eq!(scheduler.thread_count(), 0);
        assert_eq!(scheduler.stats().executed, 1);
        assert_eq!(scheduler.stats().enqueued, 4);
    }
}
