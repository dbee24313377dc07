//! MirrorDrive Audit - File operation audit trail
//!
//! Provides:
//! - `OperationLogger`: High-level service for recording transfers, deletions and conflicts
//! - `ReasonCode`: Structured reason codes for failures and conflicts
//! - Integration with `IStateRepository` for persistent, append-only storage

pub mod logger;
pub mod reason;

pub use logger::OperationLogger;
pub use reason::ReasonCode;
