//! MirrorDrive Core - Domain model and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `AccountContext`, `DriveItem`, `SyncConflict`, `SyncSessionLog`,
//!   `FileOperationLog`, `SyncState`
//! - **Port definitions** - Traits for adapters: `IRemoteDrive`, `IStateRepository`, `ILocalFileSystem`
//! - **Configuration** - YAML-backed settings with validation
//!
//! # Architecture
//!
//! The domain module contains pure business rules (status transitions, path
//! normalization, progress arithmetic) with no I/O. Ports define the trait
//! interfaces that the sync engine depends on and adapter crates implement.

pub mod config;
pub mod domain;
pub mod ports;
