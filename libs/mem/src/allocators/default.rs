// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::sync::Arc;
use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::allocator::{RawAllocator, normalize_request};
use crate::leak::LeakDetector;

/// The platform-backed allocator the runtime hands out by default.
///
/// Every call updates the activity counters, and when a [`LeakDetector`] is
/// attached each allocation and release is mirrored into it. The default
/// allocator is created first by runtime init and destroyed last, so every
/// other component may hold a handle to it.
#[derive(Debug, Default)]
pub struct DefaultAllocator {
    active_allocations: AtomicUsize,
    total_allocated_bytes: AtomicUsize,
    failed_allocations: AtomicUsize,
    leak_detector: spin::Mutex<Option<Arc<LeakDetector>>>,
}

impl DefaultAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active_allocations: AtomicUsize::new(0),
            total_allocated_bytes: AtomicUsize::new(0),
            failed_allocations: AtomicUsize::new(0),
            leak_detector: spin::Mutex::new(None),
        }
    }

    /// Mirrors all subsequent allocator activity into `detector`.
    pub fn attach_leak_detector(&self, detector: Arc<LeakDetector>) {
        *self.leak_detector.lock() = Some(detector);
    }

    pub fn detach_leak_detector(&self) {
        *self.leak_detector.lock() = None;
    }

    /// Number of allocations that have not been released yet.
    #[must_use]
    pub fn active_allocations(&self) -> usize {
        self.active_allocations.load(Ordering::Acquire)
    }

    /// Running total of bytes ever requested (never decremented).
    #[must_use]
    pub fn total_allocated_bytes(&self) -> usize {
        self.total_allocated_bytes.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn failed_allocations(&self) -> usize {
        self.failed_allocations.load(Ordering::Acquire)
    }

    fn track_alloc(&self, ptr: NonNull<u8>, size: usize) {
        if let Some(detector) = self.leak_detector.lock().as_ref() {
            detector.track_alloc(ptr, size);
        }
    }

    fn track_free(&self, ptr: NonNull<u8>) {
        if let Some(detector) = self.leak_detector.lock().as_ref() {
            detector.track_free(ptr);
        }
    }

    fn record_failure(&self) -> Option<NonNull<u8>> {
        self.failed_allocations.fetch_add(1, Ordering::AcqRel);
        None
    }
}

impl RawAllocator for DefaultAllocator {
    fn alloc(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let (size, align) = normalize_request(size, align);
        let Ok(layout) = Layout::from_size_align(size, align) else {
            return self.record_failure();
        };

        // Safety: `layout` has non-zero size by normalisation.
        let raw = unsafe { alloc::alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            return self.record_failure();
        };

        self.active_allocations.fetch_add(1, Ordering::AcqRel);
        self.total_allocated_bytes.fetch_add(size, Ordering::AcqRel);
        self.track_alloc(ptr, size);
        Some(ptr)
    }

    fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        old_size: usize,
        new_size: usize,
        align: usize,
    ) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.alloc(new_size, align);
        };

        let (old_size, align) = normalize_request(old_size, align);
        let new_size = new_size.max(1);
        let Ok(old_layout) = Layout::from_size_align(old_size, align) else {
            return self.record_failure();
        };

        // Safety: `ptr` was allocated by this allocator with `old_layout`
        // per the `RawAllocator` contract, and `new_size` is non-zero.
        let raw = unsafe { alloc::alloc::realloc(ptr.as_ptr(), old_layout, new_size) };
        let Some(resized) = NonNull::new(raw) else {
            return self.record_failure();
        };

        if new_size > old_size {
            self.total_allocated_bytes
                .fetch_add(new_size - old_size, Ordering::AcqRel);
        }

        self.track_free(ptr);
        self.track_alloc(resized, new_size);
        Some(resized)
    }

    fn dealloc(&self, ptr: Option<NonNull<u8>>, size: usize, align: usize) {
        let Some(ptr) = ptr else { return };

        let (size, align) = normalize_request(size, align);
        let _ = self
            .active_allocations
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                active.checked_sub(1)
            });
        self.track_free(ptr);

        let Ok(layout) = Layout::from_size_align(size, align) else {
            return;
        };
        // Safety: `ptr` was allocated by this allocator with this layout
        // per the `RawAllocator` contract.
        unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}
