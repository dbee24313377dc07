//! Domain error types
//!
//! Raised when a value fails validation at construction or a row is asked
//! to make a status transition its state machine forbids.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Local path is relative or escapes `/`
    #[error("invalid local path: {0}")]
    InvalidPath(String),

    #[error("invalid content hash: {0}")]
    InvalidHash(String),

    /// A `DriveItem` transition that its current status does not allow
    #[error("cannot move from {from} to {to}")]
    InvalidState { from: String, to: String },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A local path outside the account's root
    #[error("{0} is outside the local root")]
    PathNotInSyncRoot(String),

    #[error("invalid remote path: {0}")]
    InvalidRemotePath(String),

    #[error("invalid remote id: {0}")]
    InvalidRemoteId(String),

    #[error("invalid delta token: {0}")]
    InvalidDeltaToken(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}
