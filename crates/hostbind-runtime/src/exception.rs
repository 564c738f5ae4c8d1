//! The pending-exception indicator.
//!
//! Every fallible runtime entry point reports failure the same way: it returns
//! a null result (`None` / `false` / `-1`) and leaves a [`HostException`] in the
//! per-thread indicator. Callers either propagate the null result, or fetch and
//! clear the exception.

use std::fmt;

use thiserror::Error;

use crate::interp::with;

/// Exception classes understood by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    TypeError,
    ValueError,
    IndexError,
    KeyError,
    AttributeError,
    OverflowError,
    RuntimeError,
    NotImplementedError,
    ReferenceError,
    ImportError,
    SystemError,
}

impl ExceptionKind {
    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::IndexError => "IndexError",
            ExceptionKind::KeyError => "KeyError",
            ExceptionKind::AttributeError => "AttributeError",
            ExceptionKind::OverflowError => "OverflowError",
            ExceptionKind::RuntimeError => "RuntimeError",
            ExceptionKind::NotImplementedError => "NotImplementedError",
            ExceptionKind::ReferenceError => "ReferenceError",
            ExceptionKind::ImportError => "ImportError",
            ExceptionKind::SystemError => "SystemError",
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An exception raised inside the host runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct HostException {
    pub kind: ExceptionKind,
    pub message: String,
}

impl HostException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Raise an exception, replacing any that is already pending.
pub fn set_error(kind: ExceptionKind, message: impl Into<String>) {
    restore_error(HostException::new(kind, message));
}

/// Put a previously fetched exception back into the indicator.
pub fn restore_error(exception: HostException) {
    with(|interp| {
        *interp.pending.borrow_mut() = Some(exception);
    });
}

pub fn error_occurred() -> bool {
    with(|interp| interp.pending.borrow().is_some())
}

/// Copy of the pending exception, leaving it in place.
pub fn peek_error() -> Option<HostException> {
    with(|interp| interp.pending.borrow().clone())
}

/// Take the pending exception out of the indicator.
pub fn fetch_error() -> Option<HostException> {
    with(|interp| interp.pending.borrow_mut().take())
}

pub fn clear_error() {
    with(|interp| {
        interp.pending.borrow_mut().take();
    });
}
