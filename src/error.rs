//! Error channel between native code and the host runtime.
//!
//! Every failure inside the bridge is a [`BridgeError`]. Errors that originate
//! in the host runtime are carried as [`BridgeError::Pending`]: the runtime has
//! already set its exception indicator, and the bridge only has to get out of
//! the way. Everything else is translated into a host exception at the
//! boundary by [`BridgeError::restore`].

use hostbind_runtime::{ExceptionKind, HostException};
use thiserror::Error;

/// Result alias used throughout the bridge.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// The host runtime raised; the exception is held here until it is
    /// restored at the boundary.
    #[error("{site}: {exception}")]
    Pending {
        site: String,
        exception: HostException,
    },

    /// A host object had the wrong shape for the requested native type.
    #[error("{site}: expected {expected}, got {actual}")]
    Conversion {
        site: String,
        expected: String,
        actual: String,
    },

    /// A host integer does not fit the native integer type.
    #[error("{site}: value {value} does not fit in {target}")]
    Overflow {
        site: String,
        value: i128,
        target: &'static str,
    },

    #[error("{site}() takes {expected} positional arguments but {got} were given")]
    Arity {
        site: String,
        expected: usize,
        got: usize,
    },

    #[error("{site}() got unexpected keyword arguments: {}", .names.join(", "))]
    UnexpectedKeywords { site: String, names: Vec<String> },

    /// Registration surface used out of order.
    #[error("registration error: {message}")]
    Registration { message: String },

    /// A weak back-reference outlived the host object it pointed at.
    #[error("{site}: the host object has already been released")]
    Expired { site: String },

    /// A pure virtual method was called on a host subclass that does not
    /// override it.
    #[error("{type_name}.{method} is not implemented")]
    Unimplemented { type_name: String, method: String },

    #[error("{site} panicked: {message}")]
    Panic { site: String, message: String },

    #[error("{message}")]
    Native { message: String },
}

impl BridgeError {
    /// Take the runtime's pending exception into a `Pending` error.
    ///
    /// If the runtime reported failure without setting an exception, a
    /// SystemError is synthesized so the failure is never lost.
    pub fn pending(site: impl Into<String>) -> Self {
        let exception = hostbind_runtime::fetch_error().unwrap_or_else(|| {
            HostException::new(
                ExceptionKind::SystemError,
                "error return without exception set",
            )
        });
        BridgeError::Pending {
            site: site.into(),
            exception,
        }
    }

    pub fn conversion(
        site: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        BridgeError::Conversion {
            site: site.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn registration(message: impl Into<String>) -> Self {
        BridgeError::Registration {
            message: message.into(),
        }
    }

    pub fn native(message: impl Into<String>) -> Self {
        BridgeError::Native {
            message: message.into(),
        }
    }

    /// Host exception class this error becomes at the boundary.
    pub fn exception_kind(&self) -> ExceptionKind {
        match self {
            BridgeError::Pending { exception, .. } => exception.kind,
            BridgeError::Conversion { .. }
            | BridgeError::Arity { .. }
            | BridgeError::UnexpectedKeywords { .. } => ExceptionKind::TypeError,
            BridgeError::Overflow { .. } => ExceptionKind::OverflowError,
            BridgeError::Registration { .. }
            | BridgeError::Panic { .. }
            | BridgeError::Native { .. } => ExceptionKind::RuntimeError,
            BridgeError::Expired { .. } => ExceptionKind::ReferenceError,
            BridgeError::Unimplemented { .. } => ExceptionKind::NotImplementedError,
        }
    }

    /// Whether this error is a host exception passing through.
    pub fn is_pending(&self) -> bool {
        matches!(self, BridgeError::Pending { .. })
    }

    /// Install this error as the host runtime's pending exception.
    ///
    /// A `Pending` error puts the original exception back untouched.
    pub fn restore(self) {
        match self {
            BridgeError::Pending { exception, .. } => {
                tracing::trace!(%exception, "passing host exception through");
                hostbind_runtime::restore_error(exception);
            }
            other => {
                let kind = other.exception_kind();
                tracing::debug!(%kind, error = %other, "translating native error");
                hostbind_runtime::set_error(kind, other.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_message_names_site() {
        let err = BridgeError::Arity {
            site: "add".to_string(),
            expected: 2,
            got: 3,
        };
        assert_eq!(
            err.to_string(),
            "add() takes 2 positional arguments but 3 were given"
        );
        assert_eq!(err.exception_kind(), ExceptionKind::TypeError);
    }

    #[test]
    fn unexpected_keywords_lists_names() {
        let err = BridgeError::UnexpectedKeywords {
            site: "f".to_string(),
            names: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.to_string().ends_with("a, b"));
    }

    #[test]
    fn overflow_maps_to_overflow_error() {
        let err = BridgeError::Overflow {
            site: "argument 1".to_string(),
            value: 300,
            target: "u8",
        };
        assert!(err.to_string().contains("300"));
        assert_eq!(err.exception_kind(), ExceptionKind::OverflowError);
    }

    #[test]
    fn restore_sets_translated_exception() {
        BridgeError::Unimplemented {
            type_name: "Base".to_string(),
            method: "f".to_string(),
        }
        .restore();
        let exc = hostbind_runtime::fetch_error().unwrap();
        assert_eq!(exc.kind, ExceptionKind::NotImplementedError);
        assert_eq!(exc.message, "Base.f is not implemented");
    }

    #[test]
    fn pending_round_trips_original_exception() {
        hostbind_runtime::set_error(ExceptionKind::KeyError, "missing");
        let err = BridgeError::pending("lookup");
        assert!(err.is_pending());
        assert!(!hostbind_runtime::error_occurred());

        err.restore();
        let exc = hostbind_runtime::fetch_error().unwrap();
        assert_eq!(exc, HostException::new(ExceptionKind::KeyError, "missing"));
    }

    #[test]
    fn pending_without_exception_becomes_system_error() {
        hostbind_runtime::clear_error();
        let err = BridgeError::pending("call");
        assert_eq!(err.exception_kind(), ExceptionKind::SystemError);
    }

    #[test]
    fn expired_maps_to_reference_error() {
        let err = BridgeError::Expired {
            site: "Base.f".to_string(),
        };
        assert_eq!(err.exception_kind(), ExceptionKind::ReferenceError);
        assert!(err.to_string().contains("released"));
    }
}
