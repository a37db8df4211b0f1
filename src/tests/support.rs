use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

use crate::config::ChecksumSettings;
use crate::db;
use crate::error::{IndexError, IndexResult};
use crate::hasher::ChecksumAlgorithm;
use crate::pool::Spawner;
use crate::store::{InventoryStore, SqliteInventory};
use crate::types::{
    ChecksumUpdate, DuplicatePage, DuplicateQuery, FileRecord, InventoryStats, ScannedFile, SearchPage,
    SearchQuery, SizeBucket, UpsertOutcome, UpsertSummary,
};

pub async fn memory_store() -> SqliteInventory {
    // in-memory sqlite: one connection, or every query sees an empty database
    let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
    db::init_db(&pool).await.unwrap();
    db::ensure_algorithm(&pool, ChecksumAlgorithm::Sha256).await.unwrap();
    SqliteInventory::new(pool)
}

/// Creates `rel` under `root` (with parents) holding `content`.
pub fn write_file(root: &Path, rel: &str, content: &[u8]) -> PathBuf {
    let p = root.join(rel);
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&p, content).unwrap();
    p
}

/// The temp dir as the scanner will record it.
pub fn canonical_root(dir: &TempDir) -> PathBuf {
    dir.path().canonicalize().unwrap()
}

pub fn dir_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub fn settings(workers: usize, batch_size: usize) -> ChecksumSettings {
    ChecksumSettings {
        workers,
        batch_size,
        sequential: workers <= 1,
        commit_backoff_ms: 0,
        ..Default::default()
    }
}

/// Spawns `allow` real threads, then fails every further spawn.
pub struct FailingSpawner {
    allow: usize,
    pub attempts: AtomicUsize,
}

impl FailingSpawner {
    pub fn after(allow: usize) -> Self {
        Self { allow, attempts: AtomicUsize::new(0) }
    }
}

impl Spawner for FailingSpawner {
    fn spawn(&self, name: String, work: Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n >= self.allow {
            return Err(io::Error::new(io::ErrorKind::Other, "thread creation disallowed"));
        }
        std::thread::Builder::new().name(name).spawn(work)
    }
}

/// Rejects any checksum batch containing a poisoned file name; everything
/// else goes to the wrapped store.
pub struct FlakyStore {
    pub inner: SqliteInventory,
    pub poison: Vec<String>,
    pub commit_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: SqliteInventory, poison: &[&str]) -> Self {
        Self { inner, poison: poison.iter().map(|s| s.to_string()).collect(), commit_calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl InventoryStore for FlakyStore {
    async fn upsert(&self, file: &ScannedFile) -> IndexResult<UpsertOutcome> {
        self.inner.upsert(file).await
    }

    async fn upsert_batch(&self, files: &[ScannedFile]) -> IndexResult<UpsertSummary> {
        self.inner.upsert_batch(files).await
    }

    async fn record_directories(&self, dirs: &[String]) -> IndexResult<()> {
        self.inner.record_directories(dirs).await
    }

    async fn get(&self, path: &str, filename: &str) -> IndexResult<Option<FileRecord>> {
        self.inner.get(path, filename).await
    }

    async fn counts_by_size(&self) -> IndexResult<Vec<SizeBucket>> {
        self.inner.counts_by_size().await
    }

    async fn get_by_size_bucket(&self, size: u64) -> IndexResult<Vec<FileRecord>> {
        self.inner.get_by_size_bucket(size).await
    }

    async fn list_missing_checksum_candidates(
        &self,
        size_threshold: u64,
        skip_empty: bool,
    ) -> IndexResult<Vec<FileRecord>> {
        self.inner.list_missing_checksum_candidates(size_threshold, skip_empty).await
    }

    async fn set_checksum(&self, update: &ChecksumUpdate) -> IndexResult<bool> {
        self.inner.set_checksum(update).await
    }

    async fn set_checksums(&self, updates: &[ChecksumUpdate]) -> IndexResult<u64> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if updates.iter().any(|u| self.poison.contains(&u.filename)) {
            return Err(IndexError::Internal(anyhow::anyhow!("database disk image is malformed")));
        }
        self.inner.set_checksums(updates).await
    }

    async fn list_distinct_directories(&self) -> IndexResult<Vec<String>> {
        self.inner.list_distinct_directories().await
    }

    async fn list_directory(&self, dir: &str) -> IndexResult<Vec<FileRecord>> {
        self.inner.list_directory(dir).await
    }

    async fn count_by_path_prefix(&self, prefix: &str) -> IndexResult<u64> {
        self.inner.count_by_path_prefix(prefix).await
    }

    async fn delete_by_path_prefix(&self, prefix: &str) -> IndexResult<u64> {
        self.inner.delete_by_path_prefix(prefix).await
    }

    async fn delete_by_exact_path(&self, path: &str, filename: &str) -> IndexResult<bool> {
        self.inner.delete_by_exact_path(path, filename).await
    }

    async fn list_empty_directories(&self) -> IndexResult<Vec<String>> {
        self.inner.list_empty_directories().await
    }

    async fn delete_directories(&self, dirs: &[String]) -> IndexResult<u64> {
        self.inner.delete_directories(dirs).await
    }

    async fn group_by_checksum(&self, query: &DuplicateQuery) -> IndexResult<DuplicatePage> {
        self.inner.group_by_checksum(query).await
    }

    async fn search(&self, query: &SearchQuery) -> IndexResult<SearchPage> {
        self.inner.search(query).await
    }

    async fn count_files(&self) -> IndexResult<u64> {
        self.inner.count_files().await
    }

    async fn stats(&self) -> IndexResult<InventoryStats> {
        self.inner.stats().await
    }
}
