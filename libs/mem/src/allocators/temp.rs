// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::RefCell;
use core::ptr::NonNull;

use arrayvec::ArrayVec;

use crate::allocator::RawAllocator;
use crate::allocators::arena::ArenaAllocator;

/// Maximum number of outstanding marks.
pub const MAX_MARKS: usize = 128;

/// Handle returned by [`TempAllocator::mark`]: the mark's position in the
/// stack at the time it was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempMark(usize);

/// The scoped scratch allocator: an arena plus a stack of saved offsets.
///
/// Marks follow a strict stack discipline. Resetting to a mark discards it
/// together with every mark taken after it, so a handle can be consumed at
/// most once; a second reset with the same handle fails.
#[derive(Debug)]
pub struct TempAllocator {
    arena: ArenaAllocator,
    marks: RefCell<ArrayVec<usize, MAX_MARKS>>,
}

impl TempAllocator {
    /// Creates a scratch allocator with `capacity` bytes of storage.
    /// Returns `None` when the backing buffer cannot be obtained.
    #[must_use]
    pub fn new(capacity: usize) -> Option<Self> {
        Some(Self {
            arena: ArenaAllocator::new(capacity)?,
            marks: RefCell::new(ArrayVec::new()),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    #[must_use]
    pub fn used(&self) -> usize {
        self.arena.used()
    }

    /// Saves the current offset and returns its handle, or `None` when all
    /// [`MAX_MARKS`] slots are in use.
    #[must_use]
    pub fn mark(&self) -> Option<TempMark> {
        let mut marks = self.marks.borrow_mut();
        if marks.is_full() {
            return None;
        }

        let handle = TempMark(marks.len());
        marks.push(self.arena.used());
        Some(handle)
    }

    /// Rewinds to `mark`, discarding it and every mark taken after it.
    /// Fails if the handle was already consumed by an earlier reset.
    pub fn reset_to_mark(&self, mark: TempMark) -> bool {
        let mut marks = self.marks.borrow_mut();
        let Some(&offset) = marks.get(mark.0) else {
            return false;
        };

        marks.truncate(mark.0);
        self.arena.rewind(offset);
        true
    }

    /// Discards every allocation and every outstanding mark.
    pub fn clear(&self) {
        self.marks.borrow_mut().clear();
        self.arena.reset();
    }

    #[must_use]
    pub fn mark_count(&self) -> usize {
        self.marks.borrow().len()
    }
}

impl RawAllocator for TempAllocator {
    fn alloc(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        self.arena.alloc(size, align)
    }

    fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
        align: usize,
    ) -> Option<NonNull<u8>> {
        self.arena.realloc(ptr, old_size, new_size, align)
    }

    fn dealloc(&self, _ptr: Option<NonNull<u8>>, _size: usize, _align: usize) {}
}
