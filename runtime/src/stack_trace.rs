// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use std::borrow::Cow;

use arrayvec::ArrayVec;

use crate::location::SourceLocation;

/// Frames retained per trace; deeper pushes are counted, not stored.
pub const MAX_FRAMES: usize = 64;

/// One guest call-stack entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    function: Cow<'static, str>,
    location: SourceLocation,
}

impl StackFrame {
    #[must_use]
    pub fn new(function: impl Into<Cow<'static, str>>, location: SourceLocation) -> Self {
        Self {
            function: function.into(),
            location,
        }
    }

    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    #[must_use]
    pub fn location(&self) -> &SourceLocation {
        &self.location
    }
}

/// Bounded snapshot-able guest call stack.
///
/// Pushes beyond [`MAX_FRAMES`] fail and bump the overflow counter, which
/// the rendering turns into a `... truncated N frame(s)` tail so dropped
/// frames stay visible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackTrace {
    frames: ArrayVec<StackFrame, MAX_FRAMES>,
    overflow_count: usize,
}

impl StackTrace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a frame; false once the trace is at capacity (the overflow
    /// is counted instead).
    pub fn push(
        &mut self,
        function: impl Into<Cow<'static, str>>,
        location: SourceLocation,
    ) -> bool {
        if self.frames.is_full() {
            self.overflow_count += 1;
            return false;
        }

        self.frames.push(StackFrame::new(function, location));
        true
    }

    /// Pops the innermost frame; false on an empty trace.
    pub fn pop(&mut self) -> bool {
        self.frames.pop().is_some()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub fn frame(&self, index: usize) -> Option<&StackFrame> {
        self.frames.get(index)
    }

    #[must_use]
    pub fn overflow_count(&self) -> usize {
        self.overflow_count
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.overflow_count = 0;
    }
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.frames.is_empty() {
            return f.write_str("<empty stack trace>");
        }

        for (index, frame) in self.frames.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }

            let function = if frame.function().is_empty() {
                "<unknown>"
            } else {
                frame.function()
            };
            write!(f, "#{index} {function} ({})", frame.location())?;
        }

        if self.overflow_count > 0 {
            write!(f, "\n... truncated {} frame(s)", self.overflow_count)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_depth() {
        let mut trace = StackTrace::new();
        assert!(trace.push("main", SourceLocation::new("main.oaf", 1, 1)));
        assert!(trace.push("helper", SourceLocation::new("main.oaf", 9, 5)));
        assert_eq!(trace.depth(), 2);

        assert!(trace.pop());
        assert_eq!(trace.depth(), 1);
        assert!(trace.pop());
        assert!(!trace.pop());
    }

    #[test]
    fn renders_numbered_frames() {
        let mut trace = StackTrace::new();
        trace.push("main", SourceLocation::new("app.oaf", 3, 1));
        trace.push("fail", SourceLocation::new("app.oaf", 17, 9));

        assert_eq!(
            trace.to_string(),
            "#0 main (app.oaf:3:1)\n#1 fail (app.oaf:17:9)"
        );
    }

    #[test]
    fn empty_trace_has_placeholder() {
        assert_eq!(StackTrace::new().to_string(), "<empty stack trace>");
    }

    #[test]
    fn overflow_is_counted_and_rendered() {
        let mut trace = StackTrace::new();
        for index in 0..MAX_FRAMES {
            assert!(trace.push("f", SourceLocation::new("deep.oaf", u32::try_from(index).unwrap(), 1)));
        }

        assert!(!trace.push("beyond", SourceLocation::unknown()));
        assert!(!trace.push("beyond", SourceLocation::unknown()));
        assert_eq!(trace.overflow_count(), 2);
        assert!(trace.to_string().ends_with("... truncated 2 frame(s)"));
    }

    #[test]
    fn missing_names_render_unknown() {
        let mut trace = StackTrace::new();
        trace.push("", SourceLocation::unknown());
        assert_eq!(trace.to_string(), "#0 <unknown> (<unknown>:0:0)");
    }
}
