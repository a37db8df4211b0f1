//! # dupindex
//!
//! A file inventory that finds exact duplicates without hashing everything
//! and forgets deleted files without stat'ing everything.
//!
//! ## How it works
//!
//! - **Phase 1** ([`scanner`]) walks a root directory and records path, size
//!   and modification time per regular file. No file content is read.
//! - **Phase 2** ([`checksum`]) hashes only files whose size is shared by at
//!   least one other record, on a bounded worker pool ([`pool`]) that falls
//!   back to sequential execution when threads cannot be started.
//! - [`duplicates`] groups hashed records by `(checksum, size)`.
//! - [`reconcile`] checks directories before files, so a deleted subtree
//!   costs one filesystem call instead of one per file.
//!
//! ## Core Components
//!
//! - [`config`]: Layered configuration and size-string normalisation
//! - [`db`]: SQLite schema initialisation
//! - [`engine`]: Service object exposing every operation
//! - [`error`]: Centralized error type
//! - [`filter`]: Which filesystem entries belong in the inventory
//! - [`hasher`]: Content digests and the pre-hash re-check
//! - [`metrics`]: Process-lifetime counters
//! - [`store`]: The persistence contract and its SQLite implementation
//! - [`types`]: Records, queries and reports shared by all of the above

pub mod checksum;
pub mod config;
pub mod db;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod filter;
pub mod hasher;
pub mod metrics;
pub mod pool;
pub mod reconcile;
pub mod scanner;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use engine::Engine;
pub use error::{IndexError, IndexResult};
pub use store::{InventoryStore, SqliteInventory};
