use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pool::ExecutionMode;

/// A content digest rendered as lowercase hex.
///
/// A record without a checksum carries `None`; there is no empty-string
/// sentinel anywhere in the crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Timestamps are kept at microsecond precision in the inventory.
pub fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

/// Truncates a filesystem time to the precision the inventory stores.
pub fn system_time_utc(t: SystemTime) -> DateTime<Utc> {
    from_micros(DateTime::<Utc>::from(t).timestamp_micros())
}

/// One indexed file. Identity is `(path, filename)`, where `path` is the
/// absolute parent directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub filename: String,
    pub checksum: Option<Checksum>,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn full_path(&self) -> PathBuf {
        Path::new(&self.path).join(&self.filename)
    }
}

/// Lightweight metadata captured by the Phase 1 walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: String,
    pub filename: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// What an upsert did to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    /// Same size and modification time; the checksum (if any) was kept.
    Unchanged { kept_checksum: bool },
    /// Metadata changed; any previous checksum was cleared.
    Updated { invalidated_checksum: bool },
}

/// Aggregated outcomes of one upsert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub added: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub checksums_invalidated: u64,
    pub checksums_reused: u64,
}

impl UpsertSummary {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Added => self.added += 1,
            UpsertOutcome::Unchanged { kept_checksum } => {
                self.unchanged += 1;
                if kept_checksum {
                    self.checksums_reused += 1;
                }
            }
            UpsertOutcome::Updated { invalidated_checksum } => {
                self.updated += 1;
                if invalidated_checksum {
                    self.checksums_invalidated += 1;
                }
            }
        }
    }
}

/// Number of records sharing one file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeBucket {
    pub size: u64,
    /// All records of this size, with or without a checksum.
    pub total: u64,
    /// Records of this size still lacking a checksum.
    pub missing: u64,
}

impl SizeBucket {
    /// Only sizes shared by at least two records can hold duplicates.
    pub fn is_candidate(&self) -> bool {
        self.total >= 2
    }
}

/// A checksum computed by a worker, tagged with the metadata it was computed
/// against. The store applies it only if the record still matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumUpdate {
    pub path: String,
    pub filename: String,
    pub checksum: Checksum,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// Ephemeral state of one metadata scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSession {
    pub id: Uuid,
    pub root: PathBuf,
    pub recursive: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files_seen: u64,
    pub files_added: u64,
    pub files_updated: u64,
    pub files_unchanged: u64,
    /// Entries rejected by the path filter (hidden, excluded, special).
    pub skipped: u64,
    /// Subset of `skipped` that were symbolic links.
    pub symlinks_skipped: u64,
    pub directories_seen: u64,
    pub checksums_invalidated: u64,
    pub checksums_reused: u64,
    /// Per-entry walk errors and failed persistence batches.
    pub errors: u64,
    pub cancelled: bool,
}

impl ScanSession {
    pub fn new(root: PathBuf, recursive: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            root,
            recursive,
            started_at: Utc::now(),
            finished_at: None,
            files_seen: 0,
            files_added: 0,
            files_updated: 0,
            files_unchanged: 0,
            skipped: 0,
            symlinks_skipped: 0,
            directories_seen: 0,
            checksums_invalidated: 0,
            checksums_reused: 0,
            errors: 0,
            cancelled: false,
        }
    }

    pub fn absorb(&mut self, summary: &UpsertSummary) {
        self.files_added += summary.added;
        self.files_updated += summary.updated;
        self.files_unchanged += summary.unchanged;
        self.checksums_invalidated += summary.checksums_invalidated;
        self.checksums_reused += summary.checksums_reused;
    }
}

/// Counts returned by one checksum pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChecksumReport {
    pub candidate_buckets: u64,
    /// Records dispatched to workers.
    pub candidates: u64,
    /// Records in candidate buckets left out by the size threshold or skip-empty.
    pub excluded_by_size: u64,
    pub computed: u64,
    pub committed: u64,
    /// The live file was no longer a regular file (or had vanished).
    pub skipped_special: u64,
    /// The file changed between scan and hash, or during hashing.
    pub skipped_stale: u64,
    pub read_errors: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    /// Computed checksums dropped because their batch could not be committed.
    pub records_dropped: u64,
    pub mode: Option<ExecutionMode>,
    pub degraded_reason: Option<String>,
    pub cancelled: bool,
}

impl ChecksumReport {
    pub fn degraded(&self) -> bool {
        self.mode == Some(ExecutionMode::Degraded)
    }
}

/// Result of running both phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReport {
    pub scan: ScanSession,
    pub checksums: ChecksumReport,
}

/// Filters and pagination for duplicate lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateQuery {
    pub min_group_size: usize,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    /// Glob applied to the parent directory.
    pub path_pattern: Option<String>,
    /// Glob applied to the file name.
    pub filename_pattern: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Default for DuplicateQuery {
    fn default() -> Self {
        Self {
            min_group_size: 2,
            min_size: None,
            max_size: None,
            path_pattern: None,
            filename_pattern: None,
            limit: None,
            offset: 0,
        }
    }
}

/// Records sharing the same `(checksum, size)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub checksum: Checksum,
    pub size: u64,
    pub files: Vec<FileRecord>,
}

impl DuplicateGroup {
    pub fn count(&self) -> usize {
        self.files.len()
    }

    /// Space reclaimable by keeping a single copy.
    pub fn wasted_bytes(&self) -> u64 {
        self.size.saturating_mul(self.files.len().saturating_sub(1) as u64)
    }
}

/// One page of duplicate groups plus the total number of groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicatePage {
    pub groups: Vec<DuplicateGroup>,
    pub total_groups: u64,
}

/// Inventory search criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub filename_pattern: Option<String>,
    pub path_pattern: Option<String>,
    pub checksum: Option<Checksum>,
    pub has_checksum: Option<bool>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    pub files: Vec<FileRecord>,
    pub total: u64,
}

/// Aggregate statistics over the whole inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryStats {
    pub total_files: u64,
    pub total_size: u64,
    pub files_with_checksum: u64,
    pub files_without_checksum: u64,
    pub duplicate_groups: u64,
    pub duplicate_files: u64,
    pub wasted_bytes: u64,
    pub unique_directories: u64,
    pub largest_file_size: u64,
    pub smallest_file_size: u64,
    pub newest_modification: Option<DateTime<Utc>>,
    pub oldest_modification: Option<DateTime<Utc>>,
    pub last_indexed: Option<DateTime<Utc>>,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub dry_run: bool,
    /// Records covered by the pass (all records at the time it started).
    pub total_checked: u64,
    pub files_removed: u64,
    pub files_removed_by_directory: u64,
    pub files_removed_individually: u64,
    pub directories_short_circuited: u64,
    /// Existence checks issued against directories.
    pub directory_checks: u64,
    /// Existence checks issued against individual files.
    pub file_checks: u64,
    /// Per-file checks avoided thanks to a missing directory.
    pub filesystem_calls_saved: u64,
    /// Paths whose state could not be determined (kept in the inventory).
    pub errors: u64,
    /// Removed `(path, filename)` pairs, for callers that want to show them.
    pub removed: Vec<RemovedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemovedEntry {
    /// Every record under a directory that no longer exists.
    Directory { path: String, files: u64 },
    File { path: String, filename: String },
}

/// Outcome of pruning directory bookkeeping rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub dry_run: bool,
    pub empty_directories: u64,
    pub directories: Vec<String>,
}
