//! MirrorDrive Conflict - Classification of remote changes against local state
//!
//! This crate provides:
//! - **Detection**: Pure comparison of a stored row with fresh remote and
//!   local facts ([`ConflictDetector`])
//! - **Recording**: Classification with persistence of conflict records,
//!   audit entries and parked rows ([`ConflictDetectionService`])

pub mod detector;
pub mod error;
pub mod service;

pub use detector::{ChangeSet, ConflictDetector};
pub use error::ConflictError;
pub use service::{ConflictDetectionService, Detection, Observation};
