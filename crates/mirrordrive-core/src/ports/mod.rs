//! Port definitions (hexagonal architecture interfaces)
//!
//! The traits the sync engine depends on and adapter crates implement.
//!
//! ## Ports Overview
//!
//! - [`IRemoteDrive`] - Cloud drive listing, delta queries and transfers
//! - [`IStateRepository`] - Persistent storage for rows, tokens, conflicts, logs
//! - [`ILocalFileSystem`] - Local filesystem walking, I/O and hashing

pub mod local_filesystem;
pub mod remote_drive;
pub mod state_repository;

pub use local_filesystem::{FileSystemState, ILocalFileSystem, LocalEntry};
pub use remote_drive::{
    no_progress, DeltaPage, IRemoteDrive, ProgressSink, RemoteError, RemoteItem,
};
pub use state_repository::{IStateRepository, OperationFilter};
