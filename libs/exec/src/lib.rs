// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Preemptive execution layer: OS worker-thread pool with a bounded
//! blocking queue, close-aware channels, single-shot futures, countdown
//! latches and the parallel for/map/reduce primitives built on top.
//!
//! Everything in this crate is safe to share across OS threads; the
//! condvar signalling policy is "signal one on a transition into non-empty
//! or non-full, broadcast on close or shutdown".

pub mod channel;
pub mod future;
pub mod latch;
pub mod parallel;
pub mod pool;
pub mod sync;

pub use channel::Channel;
pub use future::{Completer, Future, FutureError, submit_with_future};
pub use latch::Latch;
pub use parallel::{ParallelError, parallel_for, parallel_map, parallel_reduce_i64};
pub use pool::{PoolStats, SubmitError, ThreadPool};
