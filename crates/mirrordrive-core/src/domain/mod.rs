//! Domain entities and business rules
//!
//! This module contains the core domain types for MirrorDrive:
//! - Newtypes for type-safe identifiers and validated values
//! - Account context and per-account tunables
//! - Drive items and their sync status state machine
//! - Conflict records, session logs and the file operation audit trail
//! - The in-memory progress snapshot
//! - Remote path normalization

pub mod account;
pub mod conflict;
pub mod drive_item;
pub mod errors;
pub mod newtypes;
pub mod operation_log;
pub mod paths;
pub mod session;
pub mod sync_state;

// Re-export commonly used types
pub use account::{AccountContext, AccountSettings, AuthState};
pub use conflict::{ConflictKind, Resolution, SyncConflict, VersionInfo};
pub use drive_item::{DriveItem, LocalMetadata, RemoteMetadata, SyncDirection, SyncStatus};
pub use errors::DomainError;
pub use newtypes::*;
pub use operation_log::{FileOperation, FileOperationLog, OperationOutcome};
pub use paths::normalize_remote_path;
pub use session::{SessionCounts, SessionError, SessionStatus, SyncSessionLog};
pub use sync_state::{SyncPhase, SyncRunStatus, SyncState};
