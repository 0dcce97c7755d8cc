//! Cirrus Core - Domain model, ports and configuration
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `SyncItem`, `ConflictRecord`, `FolderNode`, `OfflineCacheEntry`, `RetryableOperation`
//! - **Failure taxonomy** - `SyncFailure` with transient/permanent classification
//! - **Port definitions** - Traits for adapters: `ITransport`, `IItemStore`, `ILocalFileSystem`, `IEncryption`
//! - **Configuration** - YAML-backed `Config` with validation and a builder
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no I/O.
//! Ports define trait interfaces that adapter crates implement.
//! The engine in `cirrus-sync` orchestrates domain entities through ports.

pub mod config;
pub mod domain;
pub mod ports;
