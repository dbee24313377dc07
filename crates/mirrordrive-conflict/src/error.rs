//! Error types for conflict detection

use mirrordrive_core::domain::DomainError;
use thiserror::Error;

/// Errors that can occur while classifying a change
#[derive(Debug, Error)]
pub enum ConflictError {
    /// The row could not be moved to the status the classification requires
    #[error("invalid row transition: {0}")]
    InvalidTransition(#[from] DomainError),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
