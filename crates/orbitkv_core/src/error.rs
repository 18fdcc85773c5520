//! Error types for adapter operations.

use orbitkv_engine::EngineError;
use std::fmt;
use thiserror::Error;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// The engine's own classification of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineContext {
    /// DOMException-style code, e.g. `ConstraintError`.
    pub code: String,
    /// Engine message.
    pub message: String,
}

impl From<&EngineError> for EngineContext {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Kind of an [`AdapterError`], for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The engine is unavailable.
    UnsupportedEnvironment,
    /// An open or delete waits on older connections.
    ConnectionBlocked,
    /// The connection is closed or superseded.
    ConnectionClosed,
    /// Bad caller input.
    InvalidArgument,
    /// Insert collision.
    DuplicateKey,
    /// Sub-record mutation or unknown op.
    UnsupportedOperation,
    /// Any other engine failure.
    EngineRequestFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnsupportedEnvironment => "UnsupportedEnvironment",
            Self::ConnectionBlocked => "ConnectionBlocked",
            Self::ConnectionClosed => "ConnectionClosed",
            Self::InvalidArgument => "InvalidArgument",
            Self::DuplicateKey => "DuplicateKey",
            Self::UnsupportedOperation => "UnsupportedOperation",
            Self::EngineRequestFailed => "EngineRequestFailed",
        };
        f.write_str(name)
    }
}

/// Errors reported by the adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// The storage engine is not available. Fatal at construction.
    #[error("unsupported environment: {message}")]
    UnsupportedEnvironment {
        /// Description.
        message: String,
    },

    /// Older connections hold the namespace open.
    ///
    /// Reported through the blocked callback; the open keeps waiting.
    #[error("namespace '{namespace}' is blocked by a connection at version {old_version}")]
    ConnectionBlocked {
        /// Namespace being opened.
        namespace: String,
        /// Version held by the blocking connections.
        old_version: u32,
        /// Requested version, `None` for a deletion.
        new_version: Option<u32>,
    },

    /// The connection is closed or was superseded by a newer version.
    #[error("connection to '{namespace}' is closed")]
    ConnectionClosed {
        /// Namespace of the connection.
        namespace: String,
        /// Engine context, when the engine reported the closure.
        context: Option<EngineContext>,
    },

    /// Caller input is invalid.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description.
        message: String,
    },

    /// A record with the same identifier (or unique attribute) exists.
    #[error("duplicate key ({context})")]
    DuplicateKey {
        /// Engine context.
        context: EngineContext,
    },

    /// The operation is not implemented.
    #[error("unsupported operation: {message}")]
    UnsupportedOperation {
        /// Description.
        message: String,
    },

    /// The engine reported a failure.
    #[error("engine request failed ({context})")]
    EngineRequestFailed {
        /// Engine context.
        context: EngineContext,
    },
}

impl AdapterError {
    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an unsupported-operation error.
    pub fn unsupported_operation(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: message.into(),
        }
    }

    /// Creates a connection-closed error without engine context.
    pub fn connection_closed(namespace: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            namespace: namespace.into(),
            context: None,
        }
    }

    /// Maps an engine error, attributing closures to `namespace`.
    #[must_use]
    pub fn from_engine(namespace: &str, err: &EngineError) -> Self {
        let context = EngineContext::from(err);
        match err {
            EngineError::Unavailable => Self::UnsupportedEnvironment {
                message: context.message,
            },
            EngineError::Constraint { .. } => Self::DuplicateKey { context },
            EngineError::InvalidState { .. } => Self::ConnectionClosed {
                namespace: namespace.to_string(),
                context: Some(context),
            },
            _ => Self::EngineRequestFailed { context },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedEnvironment { .. } => ErrorKind::UnsupportedEnvironment,
            Self::ConnectionBlocked { .. } => ErrorKind::ConnectionBlocked,
            Self::ConnectionClosed { .. } => ErrorKind::ConnectionClosed,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            Self::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            Self::EngineRequestFailed { .. } => ErrorKind::EngineRequestFailed,
        }
    }

    /// Returns the originating engine context, if the engine reported this failure.
    #[must_use]
    pub fn context(&self) -> Option<&EngineContext> {
        match self {
            Self::DuplicateKey { context } | Self::EngineRequestFailed { context } => Some(context),
            Self::ConnectionClosed { context, .. } => context.as_ref(),
            _ => None,
        }
    }
}

impl From<EngineError> for AdapterError {
    fn from(err: EngineError) -> Self {
        Self::from_engine("", &err)
    }
}
