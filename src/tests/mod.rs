//! Unit and integration tests for the indexing engine.
//!
//! ## Test Modules
//!
//! - **support**: Shared fixtures (in-memory store, file builders, a store that rejects batches)
//! - **filter_tests**: Path filter and pre-hash re-check
//! - **pool_tests**: Worker pool, including the spawn-failure fallback
//! - **scanner_tests**: Phase 1 metadata walk
//! - **checksum_tests**: Phase 2 candidate selection, batching and stale writes
//! - **duplicate_tests**: Duplicate grouping and pagination
//! - **reconcile_tests**: Directory-first reconciliation and pruning
//! - **engine_tests**: End-to-end runs through the engine
//! - **db_tests**: Schema and store queries
//! - **config_tests**: Configuration loading and validation
//! - **error_tests**: Error handling and validation helpers
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test
//! cargo test reconcile_tests
//! ```

pub mod support;

pub mod db_tests;
pub mod error_tests;
pub mod pool_tests;
