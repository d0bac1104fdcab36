// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Runtime bootstrap and teardown.
//!
//! Initialisation is ordered (allocator, context, stack trace, scheduler,
//! garbage collector, temp allocator) and every step that can fail rolls
//! the earlier steps back, records a `RuntimeInitializationError` and
//! reports `InitFailed`. Shutdown tears down in reverse order.

use core::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use keel_mem::{DefaultAllocator, GarbageCollector, TempAllocator};
use keel_task::Scheduler;

use crate::context::Context;
use crate::error::RuntimeError;
use crate::location::SourceLocation;
use crate::stack_trace::StackTrace;

/// Temp-allocator capacity when the options leave it zero.
pub const DEFAULT_TEMP_CAPACITY: usize = 64 * 1024;
/// Scheduler worker count when the options leave it zero.
pub const DEFAULT_SCHEDULER_WORKERS: usize = 4;

const BOOTSTRAP_FILE: &str = "runtime.bootstrap";

/// Tunables accepted by [`Runtime::init`]; zero values fall back to the
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub temp_allocator_capacity: usize,
    pub scheduler_worker_count: usize,
    pub gc_enabled: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            temp_allocator_capacity: DEFAULT_TEMP_CAPACITY,
            scheduler_worker_count: DEFAULT_SCHEDULER_WORKERS,
            gc_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    Ok,
    AlreadyInitialized,
    /// Reserved for embedders driving init through raw bindings, where a
    /// missing runtime or options block is representable.
    InvalidArgument,
    InitFailed,
}

/// The assembled runtime: the default allocator, the ambient context, and
/// the subsystems the context hands out.
#[derive(Debug)]
pub struct Runtime {
    initialized: bool,
    allocator: Arc<DefaultAllocator>,
    context: Context,
    stack_trace: Rc<RefCell<StackTrace>>,
    scheduler: Option<Rc<RefCell<Scheduler>>>,
    gc: Option<Rc<RefCell<GarbageCollector>>>,
    temp_allocator: Option<Rc<TempAllocator>>,
    startup_error: Option<RuntimeError>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// An uninitialised runtime; call [`init`](Self::init) before use.
    #[must_use]
    pub fn new() -> Self {
        let allocator = Arc::new(DefaultAllocator::new());
        let context = Context::new(Arc::clone(&allocator) as Arc<dyn keel_mem::RawAllocator>);
        let stack_trace = Rc::clone(context.stack_trace());

        Self {
            initialized: false,
            allocator,
            context,
            stack_trace,
            scheduler: None,
            gc: None,
            temp_allocator: None,
            startup_error: None,
        }
    }

    /// Brings the runtime up in dependency order.
    pub fn init(&mut self, options: Option<&RuntimeOptions>) -> RuntimeStatus {
        if self.initialized {
            return RuntimeStatus::AlreadyInitialized;
        }

        let defaults = RuntimeOptions::default();
        let mut effective = options.copied().unwrap_or(defaults);
        if effective.temp_allocator_capacity == 0 {
            effective.temp_allocator_capacity = defaults.temp_allocator_capacity;
        }
        if effective.scheduler_worker_count == 0 {
            effective.scheduler_worker_count = defaults.scheduler_worker_count;
        }

        self.allocator = Arc::new(DefaultAllocator::new());
        self.context = Context::new(Arc::clone(&self.allocator) as Arc<dyn keel_mem::RawAllocator>);
        self.stack_trace = Rc::new(RefCell::new(StackTrace::new()));
        self.context.set_stack_trace(Rc::clone(&self.stack_trace));
        self.startup_error = None;

        let scheduler = Rc::new(RefCell::new(Scheduler::new(
            effective.scheduler_worker_count,
        )));
        self.context.set_scheduler(Some(Rc::clone(&scheduler)));
        self.scheduler = Some(scheduler);

        let gc = GarbageCollector::new(
            Arc::clone(&self.allocator) as Arc<dyn keel_mem::RawAllocator>,
            effective.gc_enabled,
        );
        self.gc = Some(Rc::new(RefCell::new(gc)));

        let Some(temp_allocator) = TempAllocator::new(effective.temp_allocator_capacity) else {
            return self.fail_init("Failed to initialize temporary allocator.");
        };
        let temp_allocator = Rc::new(temp_allocator);
        self.context
            .set_temp_allocator(Some(Rc::clone(&temp_allocator)));
        self.temp_allocator = Some(temp_allocator);
        self.context.set_gc_enabled(effective.gc_enabled);

        self.initialized = true;
        tracing::debug!(
            workers = effective.scheduler_worker_count,
            temp_capacity = effective.temp_allocator_capacity,
            gc = effective.gc_enabled,
            "runtime initialized"
        );
        RuntimeStatus::Ok
    }

    /// Tears everything down in reverse init order and resets the
    /// context, stack trace and startup error. Safe to call on an
    /// uninitialised runtime.
    pub fn shutdown(&mut self) {
        if self.initialized {
            self.context.set_temp_allocator(None);
            self.temp_allocator = None;
            // Dropping the collector frees every still-live managed
            // object through the default allocator.
            self.gc = None;
            if let Some(scheduler) = self.scheduler.take() {
                scheduler.borrow_mut().shutdown();
            }
            self.context.set_scheduler(None);
            self.initialized = false;
            tracing::debug!("runtime shut down");
        }

        self.context.reset();
        self.stack_trace = Rc::clone(self.context.stack_trace());
        self.startup_error = None;
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[must_use]
    pub fn allocator(&self) -> &Arc<DefaultAllocator> {
        &self.allocator
    }

    #[must_use]
    pub fn context(&self) -> Option<&Context> {
        self.initialized.then_some(&self.context)
    }

    #[must_use]
    pub fn context_mut(&mut self) -> Option<&mut Context> {
        if self.initialized {
            Some(&mut self.context)
        } else {
            None
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> Option<&Rc<RefCell<Scheduler>>> {
        if self.initialized {
            self.scheduler.as_ref()
        } else {
            None
        }
    }

    #[must_use]
    pub fn gc(&self) -> Option<&Rc<RefCell<GarbageCollector>>> {
        if self.initialized { self.gc.as_ref() } else { None }
    }

    #[must_use]
    pub fn temp_allocator(&self) -> Option<&Rc<TempAllocator>> {
        if self.initialized {
            self.temp_allocator.as_ref()
        } else {
            None
        }
    }

    /// The context's pending error if any, else the captured startup
    /// error.
    #[must_use]
    pub fn last_error(&self) -> Option<&RuntimeError> {
        self.context.last_error().or(self.startup_error.as_ref())
    }

    fn fail_init(&mut self, message: &'static str) -> RuntimeStatus {
        tracing::warn!(message, "runtime bootstrap failed");

        self.gc = None;
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.borrow_mut().shutdown();
        }
        self.context.set_scheduler(None);
        self.context.set_temp_allocator(None);
        self.temp_allocator = None;

        let error = RuntimeError::new(
            "RuntimeInitializationError",
            message,
            SourceLocation::new(BOOTSTRAP_FILE, 0, 0),
        );
        self.context.restore_error(Some(error.clone()));
        self.startup_error = Some(error);
        RuntimeStatus::InitFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_shutdown() {
        let mut runtime = Runtime::new();
        assert!(!runtime.is_initialized());
        assert!(runtime.context().is_none());

        assert_eq!(runtime.init(None), RuntimeStatus::Ok);
        assert!(runtime.is_initialized());
        assert!(runtime.context().is_some());
        assert!(runtime.scheduler().is_some());
        assert!(runtime.gc().is_some());
        assert!(runtime.temp_allocator().is_some());
        assert!(runtime.last_error().is_none());

        runtime.shutdown();
        assert!(!runtime.is_initialized());
        assert!(runtime.context().is_none());
        assert!(runtime.scheduler().is_none());
    }

    #[test]
    fn double_init_is_rejected() {
        let mut runtime = Runtime::new();
        assert_eq!(runtime.init(None), RuntimeStatus::Ok);
        assert_eq!(runtime.init(None), RuntimeStatus::AlreadyInitialized);
        runtime.shutdown();
    }

    #[test]
    fn reinit_after_shutdown_works() {
        let mut runtime = Runtime::new();
        assert_eq!(runtime.init(None), RuntimeStatus::Ok);
        runtime.shutdown();
        assert_eq!(runtime.init(None), RuntimeStatus::Ok);
        runtime.shutdown();
    }

    #[test]
    fn zero_options_fall_back_to_defaults() {
        let mut runtime = Runtime::new();
        let options = RuntimeOptions {
            temp_allocator_capacity: 0,
            scheduler_worker_count: 0,
            gc_enabled: false,
        };

        assert_eq!(runtime.init(Some(&options)), RuntimeStatus::Ok);
        assert_eq!(
            runtime.temp_allocator().unwrap().capacity(),
            DEFAULT_TEMP_CAPACITY
        );
        assert_eq!(
            runtime.scheduler().unwrap().borrow().worker_count(),
            DEFAULT_SCHEDULER_WORKERS
        );
        runtime.shutdown();
    }

    #[test]
    fn gc_flag_reaches_collector_and_context() {
        let mut runtime = Runtime::new();
        let options = RuntimeOptions {
            gc_enabled: true,
            ..RuntimeOptions::default()
        };

        assert_eq!(runtime.init(Some(&options)), RuntimeStatus::Ok);
        assert!(runtime.gc().unwrap().borrow().is_enabled());
        assert!(runtime.context().unwrap().gc_enabled());
        runtime.shutdown();
    }

    #[test]
    fn shutdown_frees_live_gc_objects() {
        let mut runtime = Runtime::new();
        let options = RuntimeOptions {
            gc_enabled: true,
            ..RuntimeOptions::default()
        };
        runtime.init(Some(&options));

        {
            let gc = runtime.gc().unwrap();
            let mut gc = gc.borrow_mut();
            let object = gc.alloc(128, 8).unwrap();
            gc.retain(object);
        }
        assert_eq!(runtime.allocator().active_allocations(), 1);

        let allocator = Arc::clone(runtime.allocator());
        runtime.shutdown();
        assert_eq!(allocator.active_allocations(), 0);
    }

    #[test]
    fn shutdown_without_init_is_harmless() {
        let mut runtime = Runtime::new();
        runtime.shutdown();
        assert!(!runtime.is_initialized());
    }
}
