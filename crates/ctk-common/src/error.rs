//! Unified error types for the ctk workspace.
//!
//! Remote failures arrive as transport errors and are normalized into the
//! domain kinds below before they reach a caller. Callers match on the kind
//! predicates (`is_not_found`, ...) rather than on transport codes.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CtkError {
    /// The remote entity (task, process, image, blob) does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// Description of the missing entity.
        message: String,
    },

    /// The entity being created already exists.
    #[error("already exists: {message}")]
    AlreadyExists {
        /// Description of the conflicting entity.
        message: String,
    },

    /// A caller supplied argument was rejected.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the rejected argument.
        message: String,
    },

    /// The operation is not legal for the current state of the entity.
    #[error("failed precondition: {message}")]
    FailedPrecondition {
        /// Description of the violated precondition, including the observed state.
        message: String,
    },

    /// The remote side could not be reached.
    #[error("unavailable: {message}")]
    Unavailable {
        /// Transport supplied detail.
        message: String,
    },

    /// The remote side failed while handling the request.
    #[error("internal: {message}")]
    Internal {
        /// Transport supplied detail.
        message: String,
    },

    /// The runtime answered a metrics query without any data for a task
    /// that still exists.
    #[error("no metrics received for task {id}")]
    NoMetrics {
        /// Task the query was filtered on.
        id: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A content digest validation failed.
    #[error("digest mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Expected digest.
        expected: String,
        /// Actual computed digest.
        actual: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Coarse classification of a [`CtkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`CtkError::NotFound`].
    NotFound,
    /// See [`CtkError::AlreadyExists`].
    AlreadyExists,
    /// See [`CtkError::InvalidArgument`].
    InvalidArgument,
    /// See [`CtkError::FailedPrecondition`].
    FailedPrecondition,
    /// See [`CtkError::Unavailable`].
    Unavailable,
    /// Remote failures, missing metrics, local I/O and serialization errors.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::FailedPrecondition => write!(f, "failed precondition"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

impl CtkError {
    /// Builds a [`CtkError::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Builds a [`CtkError::AlreadyExists`].
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists {
            message: message.into(),
        }
    }

    /// Builds a [`CtkError::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Builds a [`CtkError::FailedPrecondition`].
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::FailedPrecondition {
            message: message.into(),
        }
    }

    /// Builds a [`CtkError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the domain kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InvalidArgument { .. } | Self::Config { .. } => ErrorKind::InvalidArgument,
            Self::FailedPrecondition { .. } => ErrorKind::FailedPrecondition,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Internal { .. }
            | Self::NoMetrics { .. }
            | Self::Io { .. }
            | Self::HashMismatch { .. }
            | Self::Serialization { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the error reports a missing entity.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound)
    }

    /// Whether the error reports a conflicting entity.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self.kind(), ErrorKind::AlreadyExists)
    }

    /// Whether the error reports a rejected argument.
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidArgument)
    }

    /// Whether the error reports an operation illegal for the current state.
    #[must_use]
    pub const fn is_failed_precondition(&self) -> bool {
        matches!(self.kind(), ErrorKind::FailedPrecondition)
    }

    /// Prefixes the message of a kinded error, preserving its kind.
    ///
    /// Errors without a free-form message are returned unchanged.
    #[must_use]
    pub fn context(self, prefix: &str) -> Self {
        match self {
            Self::NotFound { message } => Self::NotFound {
                message: format!("{prefix}: {message}"),
            },
            Self::AlreadyExists { message } => Self::AlreadyExists {
                message: format!("{prefix}: {message}"),
            },
            Self::InvalidArgument { message } => Self::InvalidArgument {
                message: format!("{prefix}: {message}"),
            },
            Self::FailedPrecondition { message } => Self::FailedPrecondition {
                message: format!("{prefix}: {message}"),
            },
            Self::Unavailable { message } => Self::Unavailable {
                message: format!("{prefix}: {message}"),
            },
            Self::Internal { message } => Self::Internal {
                message: format!("{prefix}: {message}"),
            },
            other => other,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CtkError>;
