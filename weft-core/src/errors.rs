//! Error reporting.
//!
//! Verification outcomes are not Rust errors: they accumulate as
//! human-readable one-liners in an [`Errors`] collector, in discovery order.
//! An empty collector means the transformation verified. The parser is the
//! one component with a typed failure, [`ParseError`], carrying the line it
//! gave up on.

use std::fmt;

use thiserror::Error;

/// Ordered collector of verification diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Errors {
    errs: Vec<String>,
}

impl Errors {
    /// Append a diagnostic.
    pub fn add(&mut self, msg: impl Into<String>) {
        self.errs.push(msg.into());
    }

    /// True when nothing was reported, i.e. the transformation verified.
    pub fn is_empty(&self) -> bool {
        self.errs.is_empty()
    }

    /// Number of diagnostics.
    pub fn len(&self) -> usize {
        self.errs.len()
    }

    /// The diagnostics in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.errs.iter().map(String::as_str)
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.errs {
            writeln!(f, "ERROR: {}", e)?;
        }
        Ok(())
    }
}

/// A parse failure, with the 1-based line it occurred on.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("parse error at line {line}: {msg}")]
pub struct ParseError {
    /// 1-based source line.
    pub line: u32,
    /// What went wrong.
    pub msg: String,
}

impl ParseError {
    pub(crate) fn new(line: u32, msg: impl Into<String>) -> ParseError {
        ParseError {
            line,
            msg: msg.into(),
        }
    }
}
