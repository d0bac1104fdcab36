// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use std::borrow::Cow;

/// Placeholder rendered for locations with no file name.
pub const UNKNOWN_FILE: &str = "<unknown>";

/// A guest source position: file, 1-based line and column.
///
/// Guest file names usually come from the compiler as static strings;
/// dynamically assembled names (eval, REPL chunks) are owned. Hence the
/// `Cow`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    file: Option<Cow<'static, str>>,
    line: u32,
    column: u32,
}

impl SourceLocation {
    #[must_use]
    pub fn new(file: impl Into<Cow<'static, str>>, line: u32, column: u32) -> Self {
        Self {
            file: Some(file.into()),
            line,
            column,
        }
    }

    /// A location that renders as `<unknown>:0:0`.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            file: None,
            line: 0,
            column: 0,
        }
    }

    #[must_use]
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    #[must_use]
    pub fn file_or_unknown(&self) -> &str {
        self.file.as_deref().unwrap_or(UNKNOWN_FILE)
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub fn column(&self) -> u32 {
        self.column
    }

    /// True when a file name is attached.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.file.is_some()
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file_or_unknown(), self.line, self.column)
    }
}
