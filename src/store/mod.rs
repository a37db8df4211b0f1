//! Persistence boundary consumed by the engine.
//!
//! Every method is called from a single coordinating task; implementations
//! need not support concurrent callers. Worker threads never see the store.

use async_trait::async_trait;

use crate::error::IndexResult;
use crate::types::{
    ChecksumUpdate, DuplicatePage, DuplicateQuery, FileRecord, InventoryStats, ScannedFile, SearchPage,
    SearchQuery, SizeBucket, UpsertOutcome, UpsertSummary,
};

pub mod sqlite;

pub use sqlite::SqliteInventory;

#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Inserts or updates one record by `(path, filename)`.
    ///
    /// An unchanged size and modification time keeps the checksum; any change
    /// clears it.
    async fn upsert(&self, file: &ScannedFile) -> IndexResult<UpsertOutcome>;

    /// Same as [`upsert`](Self::upsert) for many records, in one transaction.
    async fn upsert_batch(&self, files: &[ScannedFile]) -> IndexResult<UpsertSummary>;

    /// Records directories seen by a scan (bookkeeping only).
    async fn record_directories(&self, dirs: &[String]) -> IndexResult<()>;

    async fn get(&self, path: &str, filename: &str) -> IndexResult<Option<FileRecord>>;

    /// Record counts per file size, split by checksum presence.
    async fn counts_by_size(&self) -> IndexResult<Vec<SizeBucket>>;

    async fn get_by_size_bucket(&self, size: u64) -> IndexResult<Vec<FileRecord>>;

    /// Records without a checksum whose size is shared by at least one other
    /// record. `size_threshold == 0` means no upper limit.
    async fn list_missing_checksum_candidates(&self, size_threshold: u64, skip_empty: bool)
        -> IndexResult<Vec<FileRecord>>;

    /// Applies one checksum if the record still has the size and modification
    /// time the checksum was computed against. Returns whether it applied.
    async fn set_checksum(&self, update: &ChecksumUpdate) -> IndexResult<bool>;

    /// Applies many checksums atomically: all rows or none. Returns the number
    /// that matched current metadata; stale ones are skipped, not errors.
    async fn set_checksums(&self, updates: &[ChecksumUpdate]) -> IndexResult<u64>;

    /// Distinct parent directories of all file records.
    async fn list_distinct_directories(&self) -> IndexResult<Vec<String>>;

    /// Records whose parent directory is exactly `dir`.
    async fn list_directory(&self, dir: &str) -> IndexResult<Vec<FileRecord>>;

    /// Records at or below `prefix`.
    async fn count_by_path_prefix(&self, prefix: &str) -> IndexResult<u64>;

    /// Deletes records (and directory bookkeeping) at or below `prefix`.
    /// Returns the number of file records removed.
    async fn delete_by_path_prefix(&self, prefix: &str) -> IndexResult<u64>;

    async fn delete_by_exact_path(&self, path: &str, filename: &str) -> IndexResult<bool>;

    /// Bookkept directories that own no file record at or below them.
    async fn list_empty_directories(&self) -> IndexResult<Vec<String>>;

    async fn delete_directories(&self, dirs: &[String]) -> IndexResult<u64>;

    async fn group_by_checksum(&self, query: &DuplicateQuery) -> IndexResult<DuplicatePage>;

    async fn search(&self, query: &SearchQuery) -> IndexResult<SearchPage>;

    async fn count_files(&self) -> IndexResult<u64>;

    async fn stats(&self) -> IndexResult<InventoryStats>;
}
