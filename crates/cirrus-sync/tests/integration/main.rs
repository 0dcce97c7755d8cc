//! Integration tests for cirrus-sync
//!
//! Drives a real [`SyncEngine`](cirrus_sync::SyncEngine) over a temporary
//! sync root and an in-memory remote store, and checks the end state of
//! both sides after the engine went idle.

#[allow(dead_code)]
mod common;

mod test_conflicts;
mod test_deletions;
mod test_encryption;
mod test_lifecycle;
mod test_offline_cache;
mod test_retry;
mod test_scheduler;
mod test_selection;
mod test_transfers;
