//! Error types for engine operations.

use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by the engine.
///
/// Every variant maps to a DOMException-style [`code`](EngineError::code) so
/// callers can carry the engine's own classification alongside their own.
/// Errors are `Clone` because one failure is delivered to both the failing
/// request and its enclosing transaction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The engine is not available in this environment.
    #[error("storage engine is not available in this environment")]
    Unavailable,

    /// A database version of zero was requested.
    #[error("invalid version {version}: versions start at 1")]
    InvalidVersion {
        /// The rejected version.
        version: u32,
    },

    /// The requested version is older than the stored one.
    #[error("requested version {requested} is less than the stored version {stored}")]
    Version {
        /// The version passed to `open`.
        requested: u32,
        /// The version currently stored.
        stored: u32,
    },

    /// A key or unique index constraint was violated.
    #[error("constraint violated: {message}")]
    Constraint {
        /// Description of the violation.
        message: String,
    },

    /// The supplied value or key is not acceptable.
    #[error("data error: {message}")]
    Data {
        /// Description of the problem.
        message: String,
    },

    /// A named object store or index does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// What was looked up.
        message: String,
    },

    /// The operation is not allowed in the current state (e.g. closed connection).
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the state problem.
        message: String,
    },

    /// The arguments describe an access the engine cannot perform.
    #[error("invalid access: {message}")]
    InvalidAccess {
        /// Description of the problem.
        message: String,
    },

    /// A write was attempted inside a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// The transaction no longer accepts requests.
    #[error("transaction is no longer active")]
    TransactionInactive,

    /// The transaction was aborted.
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Why the transaction was aborted.
        reason: String,
    },

    /// A stored value could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// Snapshot file I/O failed.
    #[error("I/O error: {message}")]
    Io {
        /// The underlying I/O error message.
        message: String,
    },
}

impl EngineError {
    /// Returns the DOMException-style name of this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable => "NotSupportedError",
            Self::InvalidVersion { .. } => "TypeError",
            Self::Version { .. } => "VersionError",
            Self::Constraint { .. } => "ConstraintError",
            Self::Data { .. } => "DataError",
            Self::NotFound { .. } => "NotFoundError",
            Self::InvalidState { .. } => "InvalidStateError",
            Self::InvalidAccess { .. } => "InvalidAccessError",
            Self::ReadOnly => "ReadOnlyError",
            Self::TransactionInactive => "TransactionInactiveError",
            Self::Aborted { .. } => "AbortError",
            Self::Codec { .. } => "DataCloneError",
            Self::Io { .. } => "UnknownError",
        }
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an invalid access error.
    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::InvalidAccess {
            message: message.into(),
        }
    }

    /// Creates an abort error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_dom_exception_names() {
        assert_eq!(EngineError::constraint("x").code(), "ConstraintError");
        assert_eq!(EngineError::invalid_state("x").code(), "InvalidStateError");
        assert_eq!(
            EngineError::Version {
                requested: 1,
                stored: 2
            }
            .code(),
            "VersionError"
        );
    }

    #[test]
    fn io_errors_keep_message() {
        let err: EngineError = io::Error::new(io::ErrorKind::NotFound, "missing file").into();
        assert!(err.to_string().contains("missing file"));
    }
}
