//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the sync engine
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ITransport`] - Remote object store operations and change listing
//! - [`IItemStore`] - Durable item state, conflicts, selection and cursor
//! - [`ILocalFileSystem`] - Local file operations and fingerprints
//! - [`IEncryption`] - Optional content encryption

pub mod encryption;
pub mod item_store;
pub mod local_filesystem;
pub mod transport;

pub use encryption::{EncryptionKey, IEncryption};
pub use item_store::{IItemStore, ItemFilter, ItemUpdate};
pub use local_filesystem::{FileSystemState, ILocalFileSystem};
pub use transport::{ChangeSet, ITransport, TransferProgress, UNLIMITED_RATE};
