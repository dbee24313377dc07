//! MirrorDrive Graph - Microsoft Graph remote drive adapter
//!
//! Provides an async client for OneDrive via Microsoft Graph:
//! - Item listing and paginated delta queries
//! - Simple and chunked (upload session) uploads with `If-Match`
//! - Streaming downloads with progress reporting
//!
//! ## Modules
//!
//! - [`client`] - Authenticated HTTP client and status mapping
//! - [`items`] - Graph `driveItem` JSON and conversion to [`RemoteItem`]
//! - [`delta`] - Delta queries for incremental synchronization
//! - [`upload`] - File upload operations (small and large/chunked)
//! - [`provider`] - [`IRemoteDrive`] implementation
//!
//! Access tokens are supplied by the caller; acquiring and refreshing them
//! is outside this crate.
//!
//! [`RemoteItem`]: mirrordrive_core::ports::RemoteItem
//! [`IRemoteDrive`]: mirrordrive_core::ports::IRemoteDrive

pub mod client;
pub mod delta;
pub mod items;
pub mod provider;
pub mod upload;

use std::time::Duration;

use mirrordrive_core::ports::RemoteError;
use thiserror::Error;

pub use client::GraphClient;
pub use provider::GraphRemoteDrive;

/// Errors that can occur when communicating with the Microsoft Graph API
#[derive(Debug, Error)]
pub enum GraphError {
    /// Authentication credentials are invalid or expired
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Insufficient permissions for the requested operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A conflict was detected (e.g., name collision)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The `If-Match` entity tag no longer matches the item
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// The delta token is no longer valid (410 Gone)
    #[error("Delta token expired")]
    ResyncRequired,

    /// Rate limit exceeded; retry after the specified duration
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Duration to wait before retrying
        retry_after: Duration,
    },

    /// A server-side error occurred (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// Any other unexpected status
    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The API response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A request URL could not be built from the base URL and item path
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
}

impl From<GraphError> for RemoteError {
    fn from(err: GraphError) -> Self {
        let message = err.to_string();
        match err {
            GraphError::NotFound(_) => RemoteError::NotFound(message),
            GraphError::PreconditionFailed(_) => RemoteError::PreconditionFailed(message),
            GraphError::ResyncRequired => RemoteError::TokenExpired,
            GraphError::TooManyRequests { .. }
            | GraphError::ServerError(_)
            | GraphError::NetworkError(_) => RemoteError::Transient(message),
            GraphError::Unauthorized(_)
            | GraphError::Forbidden(_)
            | GraphError::Conflict(_)
            | GraphError::Status { .. }
            | GraphError::InvalidResponse(_)
            | GraphError::InvalidUrl(_) => RemoteError::Permanent(message),
        }
    }
}
