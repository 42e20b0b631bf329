//! Error type shared by all execution crates.
//!
//! Errors carry a kind that places them in the failure taxonomy used by the
//! execution driver. A "blocked" node is never represented as an error.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;

pub type Result<T, E = ExecError> = std::result::Result<T, E>;

/// Classification of an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An underlying data source or buffer operation failed.
    ///
    /// Propagated unchanged up the node tree, aborting the plan.
    Component,
    /// A deterministic value-level failure during evaluation.
    Processing,
    /// A programming defect, e.g. opening a node twice.
    Invariant,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Component => write!(f, "component"),
            Self::Processing => write!(f, "processing"),
            Self::Invariant => write!(f, "invariant"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug)]
pub struct ExecError {
    inner: Box<ExecErrorInner>,
}

#[derive(Debug)]
struct ExecErrorInner {
    msg: String,
    kind: ErrorKind,
    source: Option<Box<dyn Error + Send + Sync>>,
    fields: Vec<(String, String)>,
    backtrace: Backtrace,
}

impl ExecError {
    pub fn new(msg: impl Into<String>) -> Self {
        ExecError {
            inner: Box::new(ExecErrorInner {
                msg: msg.into(),
                kind: ErrorKind::Internal,
                source: None,
                fields: Vec::new(),
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        let mut err = Self::new(msg);
        err.inner.source = Some(source);
        err
    }

    /// Create an error for a failed data source or buffer operation.
    pub fn component(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(ErrorKind::Component)
    }

    /// Create an error for a value-level evaluation failure.
    pub fn processing(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(ErrorKind::Processing)
    }

    /// Create an error for a violated programming invariant.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::new(msg).with_kind(ErrorKind::Invariant)
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.inner.kind = kind;
        self
    }

    /// Attach an additional key/value pair to the error for display.
    pub fn with_field(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.inner.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn get_msg(&self) -> &str {
        &self.inner.msg
    }

    pub fn get_field(&self, key: &str) -> Option<&str> {
        self.inner
            .fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_backtrace(&self) -> Option<&Backtrace> {
        match self.inner.backtrace.status() {
            BacktraceStatus::Captured => Some(&self.inner.backtrace),
            _ => None,
        }
    }

    pub fn is_component(&self) -> bool {
        self.inner.kind == ErrorKind::Component
    }

    pub fn is_processing(&self) -> bool {
        self.inner.kind == ErrorKind::Processing
    }

    pub fn is_invariant(&self) -> bool {
        self.inner.kind == ErrorKind::Invariant
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;

        if !self.inner.fields.is_empty() {
            write!(f, " (")?;
            for (idx, (key, value)) in self.inner.fields.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}: {value}")?;
            }
            write!(f, ")")?;
        }

        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }

        if let Some(bt) = self.get_backtrace() {
            write!(f, "\nBacktrace: {bt}")?;
        }

        Ok(())
    }
}

impl Error for ExecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<fmt::Error> for ExecError {
    fn from(value: fmt::Error) -> Self {
        ExecError::with_source("Format error", Box::new(value))
    }
}

impl From<std::io::Error> for ExecError {
    fn from(value: std::io::Error) -> Self {
        ExecError::with_source("IO error", Box::new(value)).with_kind(ErrorKind::Component)
    }
}

/// An extension trait for adding context to the Error variant of a result.
pub trait ResultExt<T, E> {
    /// Wrap an error with a static context string.
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E: Error + Send + Sync + 'static> ResultExt<T, E> for std::result::Result<T, E> {
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(ExecError::with_source(msg, Box::new(e))),
        }
    }
}

pub trait OptionExt<T> {
    /// Return an error if the option is None.
    fn required(self, msg: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, msg: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(ExecError::new(format!("Missing required value: {msg}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_fields() {
        let err = ExecError::processing("Too many distinct values")
            .with_field("count", 12)
            .with_field("limit", 10);
        let s = err.to_string();
        assert!(s.starts_with("Too many distinct values (count: 12, limit: 10)"));
        assert_eq!(ErrorKind::Processing, err.kind());
        assert_eq!(Some("12"), err.get_field("count"));
    }

    #[test]
    fn required_none() {
        let v: Option<i32> = None;
        let err = v.required("batch").unwrap_err();
        assert_eq!("Missing required value: batch", err.get_msg());
        assert_eq!(ErrorKind::Internal, err.kind());
    }

    #[test]
    fn context_keeps_source() {
        let res: std::result::Result<(), fmt::Error> = Err(fmt::Error);
        let err = res.context("failed to render command").unwrap_err();
        assert!(err.source().is_some());
        assert_eq!("failed to render command", err.get_msg());
    }
}
