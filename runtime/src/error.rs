// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cause-chained runtime errors with stack-trace snapshots.
//!
//! These are the *guest-visible* errors the language surfaces to programs;
//! Rust-level failures inside the runtime use ordinary `Result`s. The
//! rendered format is a stable contract consumed by tooling:
//!
//! ```text
//! <Name>: <Message> (<file>:<line>:<col>)
//! caused by: <Name2>: <Message2> (...)
//! stack trace:
//! #0 <fn> (<file>:<line>:<col>)
//! ... truncated N frame(s)
//! ```

use core::fmt;
use std::borrow::Cow;

use crate::context::Context;
use crate::location::SourceLocation;
use crate::stack_trace::StackTrace;

/// Errors with no (or an empty) name render as this.
pub const DEFAULT_ERROR_NAME: &str = "RuntimeError";

/// Upper bound on a stored message, in bytes.
pub const MESSAGE_CAPACITY: usize = 256;

/// Rendering of "there is no error"; formatting is total.
pub const NO_ERROR: &str = "<no error>";

/// A guest-level error: name, bounded message, source position, optional
/// stack-trace snapshot, and a singly-linked chain of causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    name: Cow<'static, str>,
    message: String,
    location: SourceLocation,
    stack_trace: Option<StackTrace>,
    cause: Option<Box<RuntimeError>>,
}

impl RuntimeError {
    /// Creates an error. An empty `name` is normalised to
    /// [`DEFAULT_ERROR_NAME`]; the message is truncated to
    /// [`MESSAGE_CAPACITY`] bytes on a character boundary.
    #[must_use]
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        message: &str,
        location: SourceLocation,
    ) -> Self {
        let name = name.into();
        Self {
            name: if name.is_empty() {
                Cow::Borrowed(DEFAULT_ERROR_NAME)
            } else {
                name
            },
            message: truncate_message(message),
            location,
            stack_trace: None,
            cause: None,
        }
    }

    /// Creates an error wrapping `cause`.
    #[must_use]
    pub fn wrap(
        name: impl Into<Cow<'static, str>>,
        message: &str,
        location: SourceLocation,
        cause: RuntimeError,
    ) -> Self {
        let mut error = Self::new(name, message, location);
        error.cause = Some(Box::new(cause));
        error
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn set_message(&mut self, message: &str) {
        self.message = truncate_message(message);
    }

    #[must_use]
    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    pub fn set_location(&mut self, location: SourceLocation) {
        self.location = location;
    }

    /// Stores a snapshot of `trace` as it is now.
    pub fn attach_stack_trace(&mut self, trace: &StackTrace) {
        self.stack_trace = Some(trace.clone());
    }

    #[must_use]
    pub fn stack_trace(&self) -> Option<&StackTrace> {
        self.stack_trace.as_ref()
    }

    #[must_use]
    pub fn cause(&self) -> Option<&RuntimeError> {
        self.cause.as_deref()
    }

    /// Walks to the innermost cause (`self` when there is none).
    #[must_use]
    pub fn root_cause(&self) -> &RuntimeError {
        let mut cursor = self;
        while let Some(cause) = cursor.cause.as_deref() {
            cursor = cause;
        }
        cursor
    }

    /// Number of errors in the chain, `self` included.
    #[must_use]
    pub fn chain_depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = Some(self);
        while let Some(error) = cursor {
            depth += 1;
            cursor = error.cause.as_deref();
        }
        depth
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cursor = Some(self);
        let mut first = true;
        while let Some(error) = cursor {
            if !first {
                f.write_str("\ncaused by: ")?;
            }
            write!(f, "{}: {} ({})", error.name, error.message, error.location)?;
            first = false;
            cursor = error.cause.as_deref();
        }

        if let Some(trace) = &self.stack_trace {
            if trace.depth() > 0 {
                write!(f, "\nstack trace:\n{trace}")?;
            }
        }

        Ok(())
    }
}

impl core::error::Error for RuntimeError {}

/// Total formatting: renders [`NO_ERROR`] for the absent case.
#[must_use]
pub fn format_error(error: Option<&RuntimeError>) -> String {
    match error {
        Some(error) => error.to_string(),
        None => NO_ERROR.to_owned(),
    }
}

fn truncate_message(message: &str) -> String {
    if message.len() <= MESSAGE_CAPACITY {
        return message.to_owned();
    }

    let mut end = MESSAGE_CAPACITY;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_owned()
}

/// Runs `try_fn`; on a reported error, offers it to `recover_fn`.
///
/// The context's pending error is stashed first so a nested recovery scope
/// observes only its own failures. Outcomes:
///
/// - `try_fn` succeeds → true (whatever it reported stays reported)
/// - `try_fn` fails without reporting → the stashed error is restored,
///   false
/// - `try_fn` fails and reported → `recover_fn` decides: accepting clears
///   the error and yields true, declining keeps it and yields false
pub fn try_recover<T, R>(context: &mut Context, try_fn: T, recover_fn: R) -> bool
where
    T: FnOnce(&mut Context) -> bool,
    R: FnOnce(&mut Context, &RuntimeError) -> bool,
{
    let previous = context.take_error();

    if try_fn(context) {
        return true;
    }

    let Some(error) = context.take_error() else {
        context.restore_error(previous);
        return false;
    };

    if recover_fn(context, &error) {
        true
    } else {
        context.restore_error(Some(error));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_defaults() {
        let error = RuntimeError::new("", "boom", SourceLocation::unknown());
        assert_eq!(error.name(), "RuntimeError");
    }

    #[test]
    fn display_matches_contract() {
        let error = RuntimeError::new(
            "TypeError",
            "expected i64",
            SourceLocation::new("main.oaf", 4, 11),
        );
        assert_eq!(error.to_string(), "TypeError: expected i64 (main.oaf:4:11)");
    }

    #[test]
    fn missing_file_renders_unknown() {
        let error = RuntimeError::new("IoError", "closed", SourceLocation::unknown());
        assert_eq!(error.to_string(), "IoError: closed (<unknown>:0:0)");
    }

    #[test]
    fn cause_chain_renders_in_order() {
        let root = RuntimeError::new("IoError", "disk gone", SourceLocation::new("io.oaf", 8, 2));
        let wrapped = RuntimeError::wrap(
            "ConfigError",
            "cannot load settings",
            SourceLocation::new("config.oaf", 21, 3),
            root,
        );

        assert_eq!(
            wrapped.to_string(),
            "ConfigError: cannot load settings (config.oaf:21:3)\n\
             caused by: IoError: disk gone (io.oaf:8:2)"
        );
        assert_eq!(wrapped.chain_depth(), 2);
        assert_eq!(wrapped.root_cause().name(), "IoError");
    }

    #[test]
    fn attached_trace_is_rendered() {
        let mut trace = StackTrace::new();
        trace.push("main", SourceLocation::new("app.oaf", 2, 1));

        let mut error = RuntimeError::new("PanicError", "bad", SourceLocation::unknown());
        error.attach_stack_trace(&trace);

        assert_eq!(
            error.to_string(),
            "PanicError: bad (<unknown>:0:0)\nstack trace:\n#0 main (app.oaf:2:1)"
        );
    }

    #[test]
    fn trace_is_a_snapshot_not_a_reference() {
        let mut trace = StackTrace::new();
        trace.push("main", SourceLocation::unknown());

        let mut error = RuntimeError::new("E", "m", SourceLocation::unknown());
        error.attach_stack_trace(&trace);
        trace.push("later", SourceLocation::unknown());

        assert_eq!(error.stack_trace().unwrap().depth(), 1);
    }

    #[test]
    fn long_messages_are_truncated() {
        let long = "x".repeat(MESSAGE_CAPACITY * 2);
        let error = RuntimeError::new("E", &long, SourceLocation::unknown());
        assert_eq!(error.message().len(), MESSAGE_CAPACITY);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MESSAGE_CAPACITY);
        let error = RuntimeError::new("E", &long, SourceLocation::unknown());
        assert!(error.message().len() <= MESSAGE_CAPACITY);
        assert!(error.message().chars().all(|c| c == 'é'));
    }

    #[test]
    fn format_error_is_total() {
        assert_eq!(format_error(None), "<no error>");
    }
}
