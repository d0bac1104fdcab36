// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::any::Any;
use core::cell::RefCell;
use core::fmt;
use std::borrow::Cow;
use std::rc::Rc;
use std::sync::Arc;

use keel_mem::{RawAllocator, TempAllocator};
use keel_task::Scheduler;

use crate::error::RuntimeError;
use crate::location::SourceLocation;
use crate::stack_trace::StackTrace;

/// Decides whether a reported error counts as handled.
pub type ErrorHandler = Box<dyn FnMut(&RuntimeError) -> bool>;

/// The ambient reference bag threaded through every runtime-aware
/// operation: allocators, scheduler, the live stack trace, the error
/// handler and the most recently reported error.
///
/// A context belongs to one execution (one OS thread); the allocator
/// handle is the only shareable piece in it.
pub struct Context {
    allocator: Arc<dyn RawAllocator>,
    temp_allocator: Option<Rc<TempAllocator>>,
    scheduler: Option<Rc<RefCell<Scheduler>>>,
    stack_trace: Rc<RefCell<StackTrace>>,
    error_handler: Option<ErrorHandler>,
    caller_location: SourceLocation,
    thread_local: Option<Rc<dyn Any>>,
    gc_enabled: bool,
    last_error: Option<RuntimeError>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("caller_location", &self.caller_location)
            .field("gc_enabled", &self.gc_enabled)
            .field("has_error", &self.last_error.is_some())
            .finish_non_exhaustive()
    }
}

impl Context {
    #[must_use]
    pub fn new(allocator: Arc<dyn RawAllocator>) -> Self {
        Self {
            allocator,
            temp_allocator: None,
            scheduler: None,
            stack_trace: Rc::new(RefCell::new(StackTrace::new())),
            error_handler: None,
            caller_location: SourceLocation::unknown(),
            thread_local: None,
            gc_enabled: false,
            last_error: None,
        }
    }

    /// Drops everything execution-specific; the allocator and temp
    /// allocator handles survive (the runtime clears those itself on
    /// shutdown).
    pub fn reset(&mut self) {
        self.scheduler = None;
        self.stack_trace = Rc::new(RefCell::new(StackTrace::new()));
        self.error_handler = None;
        self.caller_location = SourceLocation::unknown();
        self.thread_local = None;
        self.gc_enabled = false;
        self.last_error = None;
    }

    #[must_use]
    pub fn allocator(&self) -> &Arc<dyn RawAllocator> {
        &self.allocator
    }

    pub fn set_allocator(&mut self, allocator: Arc<dyn RawAllocator>) {
        self.allocator = allocator;
    }

    #[must_use]
    pub fn temp_allocator(&self) -> Option<&Rc<TempAllocator>> {
        self.temp_allocator.as_ref()
    }

    pub fn set_temp_allocator(&mut self, temp: Option<Rc<TempAllocator>>) {
        self.temp_allocator = temp;
    }

    #[must_use]
    pub fn scheduler(&self) -> Option<&Rc<RefCell<Scheduler>>> {
        self.scheduler.as_ref()
    }

    pub fn set_scheduler(&mut self, scheduler: Option<Rc<RefCell<Scheduler>>>) {
        self.scheduler = scheduler;
    }

    #[must_use]
    pub fn stack_trace(&self) -> &Rc<RefCell<StackTrace>> {
        &self.stack_trace
    }

    pub fn set_stack_trace(&mut self, trace: Rc<RefCell<StackTrace>>) {
        self.stack_trace = trace;
    }

    /// Remembers the guest position of the current call for errors that
    /// carry none of their own.
    pub fn set_source_location(
        &mut self,
        file: impl Into<Cow<'static, str>>,
        line: u32,
        column: u32,
    ) {
        self.caller_location = SourceLocation::new(file, line, column);
    }

    #[must_use]
    pub fn caller_location(&self) -> &SourceLocation {
        &self.caller_location
    }

    pub fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.error_handler = Some(handler);
    }

    pub fn clear_error_handler(&mut self) {
        self.error_handler = None;
    }

    #[must_use]
    pub fn thread_local(&self) -> Option<&Rc<dyn Any>> {
        self.thread_local.as_ref()
    }

    pub fn set_thread_local(&mut self, value: Option<Rc<dyn Any>>) {
        self.thread_local = value;
    }

    #[must_use]
    pub fn gc_enabled(&self) -> bool {
        self.gc_enabled
    }

    pub fn set_gc_enabled(&mut self, enabled: bool) {
        self.gc_enabled = enabled;
    }

    /// Records `error` as the context's pending error.
    ///
    /// An error without a location inherits the caller location, and the
    /// context's live stack trace is attached as a snapshot. If an error
    /// handler is installed it runs; its verdict ("handled") is returned.
    pub fn report_error(&mut self, mut error: RuntimeError) -> bool {
        if !error.location().is_known() {
            error.set_location(self.caller_location.clone());
        }
        error.attach_stack_trace(&self.stack_trace.borrow());

        tracing::debug!(name = error.name(), message = error.message(), "guest error reported");

        let handled = match &mut self.error_handler {
            Some(handler) => handler(&error),
            None => false,
        };

        self.last_error = Some(error);
        handled
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&RuntimeError> {
        self.last_error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub(crate) fn take_error(&mut self) -> Option<RuntimeError> {
        self.last_error.take()
    }

    pub(crate) fn restore_error(&mut self, error: Option<RuntimeError>) {
        self.last_error = error;
    }
}
