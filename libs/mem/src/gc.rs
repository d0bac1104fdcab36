// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Mark-and-sweep collector for cycle-forming guest object graphs.
//!
//! The collector is a sidecar over a [`RawAllocator`], not a managed heap:
//! only objects allocated through it are visible, and the reference graph
//! is declared explicitly through [`add_reference`]/[`remove_reference`]
//! instead of scanning opaque memory. Roots are objects with a positive
//! external reference count.
//!
//! [`add_reference`]: GarbageCollector::add_reference
//! [`remove_reference`]: GarbageCollector::remove_reference

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::ptr::NonNull;

use crate::allocator::RawAllocator;

/// Capacity of the object table.
pub const MAX_OBJECTS: usize = 512;

const WORDS_PER_ROW: usize = MAX_OBJECTS / u64::BITS as usize;

#[derive(Debug, Clone, Copy)]
struct GcObject {
    addr: usize,
    size: usize,
    align: usize,
    external_refs: usize,
    marked: bool,
    active: bool,
}

impl GcObject {
    const FREE: Self = Self {
        addr: 0,
        size: 0,
        align: 0,
        external_refs: 0,
        marked: false,
        active: false,
    };
}

/// Adjacency bit matrix over object-table slots.
struct EdgeMatrix {
    words: Box<[u64]>,
}

impl EdgeMatrix {
    fn new() -> Self {
        Self {
            words: vec![0u64; MAX_OBJECTS * WORDS_PER_ROW].into_boxed_slice(),
        }
    }

    #[inline]
    fn slot(from: usize, to: usize) -> (usize, u64) {
        let word = from * WORDS_PER_ROW + to / u64::BITS as usize;
        let bit = 1u64 << (to % u64::BITS as usize);
        (word, bit)
    }

    fn set(&mut self, from: usize, to: usize) {
        let (word, bit) = Self::slot(from, to);
        self.words[word] |= bit;
    }

    fn clear(&mut self, from: usize, to: usize) {
        let (word, bit) = Self::slot(from, to);
        self.words[word] &= !bit;
    }

    fn test(&self, from: usize, to: usize) -> bool {
        let (word, bit) = Self::slot(from, to);
        self.words[word] & bit != 0
    }

    /// Clears every edge into and out of `index`.
    fn clear_all_for(&mut self, index: usize) {
        let row = index * WORDS_PER_ROW;
        self.words[row..row + WORDS_PER_ROW].fill(0);

        for from in 0..MAX_OBJECTS {
            self.clear(from, index);
        }
    }
}

/// Tracing collector over a fixed table of [`MAX_OBJECTS`] slots.
pub struct GarbageCollector {
    allocator: Arc<dyn RawAllocator>,
    objects: Box<[GcObject]>,
    edges: EdgeMatrix,
    active_count: usize,
    managed_bytes: usize,
    enabled: bool,
}

impl fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("active_count", &self.active_count)
            .field("managed_bytes", &self.managed_bytes)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl GarbageCollector {
    #[must_use]
    pub fn new(allocator: Arc<dyn RawAllocator>, enabled: bool) -> Self {
        Self {
            allocator,
            objects: vec![GcObject::FREE; MAX_OBJECTS].into_boxed_slice(),
            edges: EdgeMatrix::new(),
            active_count: 0,
            managed_bytes: 0,
            enabled,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of live managed objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.active_count
    }

    /// Bytes currently held by live managed objects.
    #[must_use]
    pub fn managed_bytes(&self) -> usize {
        self.managed_bytes
    }

    /// Allocates a managed object through the underlying allocator.
    ///
    /// Returns `None` when the collector is disabled, the object table is
    /// full, or the underlying allocator is exhausted.
    pub fn alloc(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if !self.enabled {
            return None;
        }

        let index = self.objects.iter().position(|object| !object.active)?;
        let ptr = self.allocator.alloc(size, align)?;

        self.objects[index] = GcObject {
            addr: ptr.as_ptr() as usize,
            size,
            align,
            external_refs: 0,
            marked: false,
            active: true,
        };
        self.edges.clear_all_for(index);
        self.active_count += 1;
        self.managed_bytes += size;
        Some(ptr)
    }

    /// Registers an external reference, making `ptr` a collection root.
    pub fn retain(&mut self, ptr: NonNull<u8>) -> bool {
        let Some(index) = self.find_index(ptr) else {
            return false;
        };

        self.objects[index].external_refs += 1;
        true
    }

    /// Drops an external reference. Fails for unmanaged pointers and for
    /// objects with no outstanding external references.
    pub fn release(&mut self, ptr: NonNull<u8>) -> bool {
        let Some(index) = self.find_index(ptr) else {
            return false;
        };

        if self.objects[index].external_refs == 0 {
            return false;
        }

        self.objects[index].external_refs -= 1;
        true
    }

    /// Declares a reference edge `from → to`. Both endpoints must be live
    /// managed objects.
    pub fn add_reference(&mut self, from: NonNull<u8>, to: NonNull<u8>) -> bool {
        let (Some(from), Some(to)) = (self.find_index(from), self.find_index(to)) else {
            return false;
        };

        self.edges.set(from, to);
        true
    }

    pub fn remove_reference(&mut self, from: NonNull<u8>, to: NonNull<u8>) -> bool {
        let (Some(from), Some(to)) = (self.find_index(from), self.find_index(to)) else {
            return false;
        };

        self.edges.clear(from, to);
        true
    }

    /// Runs a full mark-sweep cycle and returns the number of objects
    /// freed back to the underlying allocator.
    ///
    /// After a collection every surviving object is externally referenced
    /// or reachable from an externally referenced object.
    pub fn collect(&mut self) -> usize {
        if !self.enabled {
            return 0;
        }

        for object in &mut self.objects {
            object.marked = false;
        }

        // Mark: depth-first from every root along declared edges.
        let mut stack: Vec<usize> = (0..MAX_OBJECTS)
            .filter(|&index| self.objects[index].active && self.objects[index].external_refs > 0)
            .collect();
        while let Some(index) = stack.pop() {
            let object = &mut self.objects[index];
            if !object.active || object.marked {
                continue;
            }
            object.marked = true;

            for child in 0..MAX_OBJECTS {
                if self.edges.test(index, child) {
                    stack.push(child);
                }
            }
        }

        // Sweep: anything live and unmarked is garbage.
        let mut collected = 0;
        for index in 0..MAX_OBJECTS {
            let object = self.objects[index];
            if !object.active || object.marked {
                continue;
            }

            self.allocator
                .dealloc(NonNull::new(object.addr as *mut u8), object.size, object.align);
            self.edges.clear_all_for(index);
            self.managed_bytes = self.managed_bytes.saturating_sub(object.size);
            self.objects[index] = GcObject::FREE;
            self.active_count = self.active_count.saturating_sub(1);
            collected += 1;
        }

        tracing::debug!(
            collected,
            survivors = self.active_count,
            managed_bytes = self.managed_bytes,
            "gc collect"
        );
        collected
    }

    /// True iff the declared reference graph contains a cycle among live
    /// objects. Purely informational; no marks or edges are touched.
    #[must_use]
    pub fn detect_cycles(&self) -> bool {
        const WHITE: u8 = 0;
        const GREY: u8 = 1;
        const BLACK: u8 = 2;

        let mut color = vec![WHITE; MAX_OBJECTS];

        for start in 0..MAX_OBJECTS {
            if !self.objects[start].active || color[start] != WHITE {
                continue;
            }

            // Iterative tricolor DFS; a back edge onto a grey node closes
            // a cycle.
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            color[start] = GREY;

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                let mut descend = None;

                while frame.1 < MAX_OBJECTS {
                    let child = frame.1;
                    frame.1 += 1;

                    if !self.objects[child].active || !self.edges.test(node, child) {
                        continue;
                    }
                    if color[child] == GREY {
                        return true;
                    }
                    if color[child] == WHITE {
                        descend = Some(child);
                        break;
                    }
                }

                match descend {
                    Some(child) => {
                        color[child] = GREY;
                        stack.push((child, 0));
                    }
                    None => {
                        color[node] = BLACK;
                        stack.pop();
                    }
                }
            }
        }

        false
    }

    fn find_index(&self, ptr: NonNull<u8>) -> Option<usize> {
        let addr = ptr.as_ptr() as usize;
        self.objects
            .iter()
            .position(|object| object.active && object.addr == addr)
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        for object in &*self.objects {
            if object.active {
                self.allocator
                    .dealloc(NonNull::new(object.addr as *mut u8), object.size, object.align);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::default::DefaultAllocator;

    fn collector() -> (Arc<DefaultAllocator>, GarbageCollector) {
        let allocator = Arc::new(DefaultAllocator::new());
        let gc = GarbageCollector::new(allocator.clone(), true);
        (allocator, gc)
    }

    #[test]
    fn disabled_collector_refuses_allocation() {
        let (_, mut gc) = collector();
        gc.set_enabled(false);
        assert!(gc.alloc(16, 8).is_none());
        gc.set_enabled(true);
        assert!(gc.alloc(16, 8).is_some());
    }

    #[test]
    fn unreferenced_objects_are_swept() {
        let (allocator, mut gc) = collector();
        gc.alloc(16, 8).unwrap();
        gc.alloc(16, 8).unwrap();
        assert_eq!(gc.object_count(), 2);
        assert_eq!(gc.managed_bytes(), 32);

        assert_eq!(gc.collect(), 2);
        assert_eq!(gc.object_count(), 0);
        assert_eq!(gc.managed_bytes(), 0);
        assert_eq!(allocator.active_allocations(), 0);
    }

    #[test]
    fn roots_and_their_children_survive() {
        let (_, mut gc) = collector();
        let root = gc.alloc(8, 8).unwrap();
        let child = gc.alloc(8, 8).unwrap();
        let garbage = gc.alloc(8, 8).unwrap();

        assert!(gc.retain(root));
        assert!(gc.add_reference(root, child));
        let _ = garbage;

        assert_eq!(gc.collect(), 1);
        assert_eq!(gc.object_count(), 2);
    }

    #[test]
    fn released_cycle_is_collected_whole() {
        let (allocator, mut gc) = collector();
        let a = gc.alloc(24, 8).unwrap();
        let b = gc.alloc(24, 8).unwrap();

        assert!(gc.retain(a));
        assert!(gc.retain(b));
        assert!(gc.add_reference(a, b));
        assert!(gc.add_reference(b, a));
        assert!(gc.detect_cycles());

        assert_eq!(gc.collect(), 0);

        assert!(gc.release(a));
        assert!(gc.release(b));
        assert_eq!(gc.collect(), 2);
        assert_eq!(gc.object_count(), 0);
        assert_eq!(allocator.active_allocations(), 0);
    }

    #[test]
    fn acyclic_graph_reports_no_cycle() {
        let (_, mut gc) = collector();
        let a = gc.alloc(8, 8).unwrap();
        let b = gc.alloc(8, 8).unwrap();
        let c = gc.alloc(8, 8).unwrap();

        gc.add_reference(a, b);
        gc.add_reference(b, c);
        gc.add_reference(a, c);
        assert!(!gc.detect_cycles());

        gc.add_reference(c, a);
        assert!(gc.detect_cycles());
    }

    #[test]
    fn edges_require_live_endpoints() {
        let (_, mut gc) = collector();
        let a = gc.alloc(8, 8).unwrap();
        let bogus = NonNull::new(0xdead_beef_usize as *mut u8).unwrap();

        assert!(!gc.add_reference(a, bogus));
        assert!(!gc.remove_reference(bogus, a));
        assert!(!gc.retain(bogus));
        assert!(!gc.release(bogus));
    }

    #[test]
    fn release_below_zero_fails() {
        let (_, mut gc) = collector();
        let a = gc.alloc(8, 8).unwrap();
        assert!(!gc.release(a));
        assert!(gc.retain(a));
        assert!(gc.release(a));
        assert!(!gc.release(a));
    }

    #[test]
    fn table_overflow_returns_none() {
        let (_, mut gc) = collector();
        for _ in 0..MAX_OBJECTS {
            assert!(gc.alloc(1, 1).is_some());
        }
        assert!(gc.alloc(1, 1).is_none());
    }

    #[test]
    fn drop_frees_survivors() {
        let allocator = Arc::new(DefaultAllocator::new());
        {
            let mut gc = GarbageCollector::new(allocator.clone(), true);
            let a = gc.alloc(64, 8).unwrap();
            gc.retain(a);
        }
        assert_eq!(allocator.active_allocations(), 0);
    }
}
