use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::filter::{PathFilter, Recheck};
use crate::metrics::Metrics;
use crate::types::{system_time_utc, Checksum, ChecksumUpdate, FileRecord};

const READ_CHUNK: usize = 64 * 1024;

/// Content digest used for duplicate detection. One inventory uses exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(ChecksumAlgorithm::Sha256),
            "blake3" => Ok(ChecksumAlgorithm::Blake3),
            other => Err(format!("unknown checksum algorithm '{}'", other)),
        }
    }
}

/// Streams a file through the chosen digest.
pub fn digest_file(path: &Path, algorithm: ChecksumAlgorithm) -> io::Result<(Checksum, u64)> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total: u64 = 0;
    match algorithm {
        ChecksumAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                total += n as u64;
            }
            Ok((Checksum::new(format!("{:x}", hasher.finalize())), total))
        }
        ChecksumAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                total += n as u64;
            }
            Ok((Checksum::new(hasher.finalize().to_hex().to_string()), total))
        }
    }
}

/// A record waiting for its checksum, with the metadata the inventory holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTask {
    pub path: String,
    pub filename: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

impl HashTask {
    pub fn full_path(&self) -> PathBuf {
        Path::new(&self.path).join(&self.filename)
    }
}

impl From<FileRecord> for HashTask {
    fn from(r: FileRecord) -> Self {
        Self { path: r.path, filename: r.filename, size: r.size, modified_at: r.modified_at }
    }
}

#[derive(Debug)]
pub enum HashOutcome {
    Computed(ChecksumUpdate),
    /// No longer a regular file, or gone.
    NotRegular(PathBuf),
    /// Size or modification time differs from the inventory; a rescan is due.
    Stale(PathBuf),
    Failed { path: PathBuf, error: String },
}

/// Worker body: re-checks the live file, hashes it, and re-checks again.
///
/// The result is tagged with the inventory's metadata, and the store only
/// applies it if that metadata is still current. A checksum is therefore never
/// attached to content other than the one it was computed from.
pub fn hash_task(task: HashTask, algorithm: ChecksumAlgorithm, metrics: &Metrics) -> HashOutcome {
    let full = task.full_path();

    let before = match PathFilter::recheck(&full) {
        Recheck::Regular(md) => md,
        Recheck::NotRegular | Recheck::Missing => return HashOutcome::NotRegular(full),
        Recheck::Unreadable(e) => return HashOutcome::Failed { path: full, error: e.to_string() },
    };
    if !matches_task(&task, before.len(), before.modified().ok().map(system_time_utc)) {
        return HashOutcome::Stale(full);
    }

    let (checksum, bytes) = match digest_file(&full, algorithm) {
        Ok(v) => v,
        Err(e) => return HashOutcome::Failed { path: full, error: e.to_string() },
    };
    metrics.add_bytes_hashed(bytes);

    let after = match PathFilter::recheck(&full) {
        Recheck::Regular(md) => md,
        Recheck::NotRegular | Recheck::Missing => return HashOutcome::NotRegular(full),
        Recheck::Unreadable(e) => return HashOutcome::Failed { path: full, error: e.to_string() },
    };
    if bytes != task.size || !matches_task(&task, after.len(), after.modified().ok().map(system_time_utc)) {
        return HashOutcome::Stale(full);
    }

    HashOutcome::Computed(ChecksumUpdate {
        path: task.path,
        filename: task.filename,
        checksum,
        size: task.size,
        modified_at: task.modified_at,
    })
}

fn matches_task(task: &HashTask, len: u64, modified: Option<DateTime<Utc>>) -> bool {
    len == task.size && modified.map(|m| m == task.modified_at).unwrap_or(false)
}
