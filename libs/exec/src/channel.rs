// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::sync::{Condvar, Mutex};

/// Error returned by a blocking [`send`](Channel::send) into a closed
/// channel; carries the value back.
#[derive(Debug, PartialEq, Eq)]
pub struct SendError<T>(pub T);

#[derive(Debug, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The buffer is at capacity.
    Full(T),
    /// The channel was closed.
    Closed(T),
}

/// The channel is closed and fully drained. Deliberately one case: a
/// receiver cannot usefully distinguish teardown shapes, both are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, onlyerror::Error)]
pub enum TryRecvError {
    /// The buffer is empty (but the channel is still open).
    Empty,
    /// The channel is closed and fully drained.
    Closed,
}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("channel closed and drained")
    }
}

impl core::error::Error for RecvError {}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("send on a closed channel")
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("channel buffer is full"),
            Self::Closed(_) => f.write_str("send on a closed channel"),
        }
    }
}

struct ChannelState<T> {
    buffer: Box<[Option<T>]>,
    count: usize,
    send_index: usize,
    recv_index: usize,
    closed: bool,
}

/// Bounded, blocking, close-aware FIFO of values.
///
/// `count` is the authoritative queue size and never exceeds the capacity;
/// the send/receive indices are modular cursors over the ring. Producers
/// block while the buffer is full, consumers while it is empty; closing
/// wakes everyone, fails all future sends and lets receivers drain what is
/// already buffered.
pub struct Channel<T> {
    state: Mutex<ChannelState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<T> Channel<T> {
    /// Creates a channel buffering up to `capacity` values. A capacity of
    /// zero is unusable and yields `None`.
    #[must_use]
    pub fn new(capacity: usize) -> Option<Self> {
        if capacity == 0 {
            return None;
        }

        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, || None);

        Some(Self {
            state: Mutex::new(ChannelState {
                buffer: buffer.into_boxed_slice(),
                count: 0,
                send_index: 0,
                recv_index: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Enqueues without blocking.
    ///
    /// # Errors
    ///
    /// [`TrySendError::Full`] when the buffer is at capacity and
    /// [`TrySendError::Closed`] after [`close`](Self::close); both return
    /// the value.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut state = self.state.lock();

        if state.closed {
            return Err(TrySendError::Closed(value));
        }
        if state.count == self.capacity {
            return Err(TrySendError::Full(value));
        }

        state.enqueue(value, self.capacity);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueues, blocking while the buffer is full.
    ///
    /// # Errors
    ///
    /// [`SendError`] when the channel is (or becomes, while waiting)
    /// closed.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let mut state = self.state.lock();
        while !state.closed && state.count == self.capacity {
            state = self.not_full.wait(state);
        }

        if state.closed {
            return Err(SendError(value));
        }

        state.enqueue(value, self.capacity);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues without blocking.
    ///
    /// # Errors
    ///
    /// [`TryRecvError::Empty`] on an open-but-empty channel,
    /// [`TryRecvError::Closed`] once closed and drained.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut state = self.state.lock();
        if state.count == 0 {
            return Err(if state.closed {
                TryRecvError::Closed
            } else {
                TryRecvError::Empty
            });
        }

        let value = state.dequeue(self.capacity);
        self.not_full.notify_one();
        Ok(value)
    }

    /// Dequeues, blocking while the buffer is empty and the channel open.
    ///
    /// # Errors
    ///
    /// [`RecvError`] once the channel is closed and drained.
    pub fn recv(&self) -> Result<T, RecvError> {
        let mut state = self.state.lock();
        while state.count == 0 && !state.closed {
            state = self.not_empty.wait(state);
        }

        if state.count == 0 {
            return Err(RecvError);
        }

        let value = state.dequeue(self.capacity);
        self.not_full.notify_one();
        Ok(value)
    }

    /// Closes the channel and wakes every waiter on both sides.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);

        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

impl<T> ChannelState<T> {
    fn enqueue(&mut self, value: T, capacity: usize) {
        debug_assert!(self.count < capacity);
        self.buffer[self.send_index] = Some(value);
        self.send_index = (self.send_index + 1) % capacity;
        self.count += 1;
    }

    fn dequeue(&mut self, capacity: usize) -> T {
        debug_assert!(self.count > 0);
        let value = self.buffer[self.recv_index].take();
        self.recv_index = (self.recv_index + 1) % capacity;
        self.count -= 1;
        value.expect("ring slot below count is occupied")
    }
}
