//! CSI error types.
//!
//! All errors in the `libcsi` crate are represented by the [`CsiError`] enum,
//! which derives [`thiserror::Error`] for ergonomic error handling and also
//! implements [`Serialize`]/[`Deserialize`] so errors can travel across the
//! QUIC transport layer.
//!
//! Each variant belongs to exactly one [`ErrorCode`], the coarse class a
//! caller uses to decide whether to fix the request, fix the host, or retry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// The caller supplied an invalid or missing request field.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The host is not in the state the call requires (e.g. the target
    /// directory was not pre-created, or mount helpers are missing).
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// An existing mount is incompatible with the requested access.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The volume identifier could not be decoded into `host:export`.
    #[error("malformed volume identifier {id}: {reason}")]
    MalformedIdentifier {
        /// The offending identifier or token.
        id: String,
        /// Why decoding failed.
        reason: String,
    },

    /// A mount operation failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Command output or OS error text.
        reason: String,
    },

    /// An unmount operation failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Command output or OS error text.
        reason: String,
    },

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The requested service is not offered by this plugin instance.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`CsiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Never retried as-is; the request must change.
    InvalidArgument,
    /// The environment must be remediated before retrying.
    FailedPrecondition,
    /// Existing host state disagrees with the request.
    Conflict,
    /// Possibly transient; safe to retry after inspecting host state.
    Internal,
    /// The operation is not served here.
    Unimplemented,
    /// The plugin could not be reached.
    Unavailable,
}

impl CsiError {
    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Create a [`CsiError::MalformedIdentifier`] for `id`.
    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedIdentifier {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Return the class this error belongs to.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) | Self::MalformedIdentifier { .. } => {
                ErrorCode::InvalidArgument
            }
            Self::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::MountFailed { .. } | Self::UnmountFailed { .. } | Self::Internal(_) => {
                ErrorCode::Internal
            }
            Self::TransportError(_) => ErrorCode::Unavailable,
            Self::Unimplemented(_) => ErrorCode::Unimplemented,
        }
    }
}
