// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Core runtime for a statically-typed application language: the substrate
//! compiled programs execute on.
//!
//! The memory family lives in [`keel_mem`], the cooperative scheduler in
//! [`keel_task`] and the preemptive pool layer in [`keel_exec`]; this crate
//! adds structured errors with stack traces, the ambient [`Context`], the
//! foreign-function bridge, the wire codec, and the ordered bootstrap that
//! ties all of it together.

pub mod codec;
pub mod context;
pub mod error;
pub mod ffi;
pub mod location;
pub mod runtime;
pub mod stack_trace;

pub use keel_exec as exec;
pub use keel_mem as mem;
pub use keel_task as task;

pub use context::Context;
pub use error::{RuntimeError, try_recover};
pub use location::SourceLocation;
pub use runtime::{Runtime, RuntimeOptions, RuntimeStatus};
pub use stack_trace::{StackFrame, StackTrace};
