//! MirrorDrive Sync - bidirectional synchronization engine
//!
//! Provides:
//! - Paged remote change processing with atomic per-page commits
//! - Local scanning with exclude globs and lazy hashing
//! - Bounded-parallel uploads and downloads
//! - Deletion reconciliation in both directions
//! - Session tracking and ordered progress broadcasting
//!
//! ## Modules
//!
//! - [`orchestrator`] - Phase pipeline for one sync run
//! - [`delta`] - Delta and full-listing processing
//! - [`classifier`] - Turns remote items into rows
//! - [`scanner`] - Local file scanner
//! - [`transfer`] - Upload and download pools
//! - [`deletion`] - Deletion reconciliation
//! - [`state`] - Session lifecycle and progress
//! - [`filesystem`] - Local filesystem adapter (atomic writes, QuickXorHash)
//! - [`watcher`] - Debounced local change notifications

pub mod classifier;
pub mod deletion;
pub mod delta;
pub mod error;
pub mod filesystem;
pub mod orchestrator;
pub mod scanner;
pub mod state;
pub mod transfer;
pub mod watcher;

pub use error::SyncError;
pub use filesystem::LocalFileSystemAdapter;
pub use orchestrator::{SyncOptions, SyncOrchestrator, SyncReport};
pub use state::{ProgressUpdate, SyncStateCoordinator};
