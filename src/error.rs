use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for the indexing engine.
///
/// Only failures that stop an operation from starting or finishing end up
/// here. Per-entry filesystem problems (permission denied, vanished files,
/// special files) are counted in the run's summary and logged instead.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Invalid or inconsistent configuration, reported before any work begins.
    #[error("Configuration error: {0}")]
    Config(String),
    /// The scan root does not exist or is not a directory.
    #[error("Invalid root path {path}: {reason}")]
    InvalidRoot {
        /// The offending root as given by the caller.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },
    /// The inventory was built with a different checksum algorithm.
    #[error("Inventory uses checksum algorithm '{stored}', but '{configured}' is configured")]
    AlgorithmMismatch { stored: String, configured: String },
    /// A query argument was out of range.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// For errors related to database operations.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// For errors related to I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// An exclude or filter glob failed to compile.
    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] globset::Error),
    /// For internal errors that callers are not expected to handle.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IndexError {
    /// Whether this error should prevent a run from starting at all.
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            IndexError::Config(_) | IndexError::InvalidRoot { .. } | IndexError::AlgorithmMismatch { .. }
        )
    }
}

impl From<::config::ConfigError> for IndexError {
    fn from(err: ::config::ConfigError) -> Self {
        IndexError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for IndexError {
    fn from(err: tokio::task::JoinError) -> Self {
        IndexError::Internal(anyhow::anyhow!("background task failed: {}", err))
    }
}

/// A type alias for `Result<T, IndexError>`, used throughout the crate.
pub type IndexResult<T> = Result<T, IndexError>;

/// Helpers that reject bad input before the engine sees it.
pub mod validation {
    use super::*;
    use std::path::Path;

    /// Validates a scan root and returns its canonical absolute form.
    ///
    /// The root must exist and be a directory. Canonicalising here makes the
    /// stored paths independent of the caller's working directory.
    pub fn validate_root_path(path: &Path) -> IndexResult<PathBuf> {
        if path.as_os_str().is_empty() {
            return Err(IndexError::InvalidRoot {
                path: path.to_path_buf(),
                reason: "path cannot be empty".to_string(),
            });
        }
        let canonical = path.canonicalize().map_err(|e| IndexError::InvalidRoot {
            path: path.to_path_buf(),
            reason: format!("cannot resolve: {}", e),
        })?;
        if !canonical.is_dir() {
            return Err(IndexError::InvalidRoot {
                path: path.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        Ok(canonical)
    }

    /// Validates that a size range is well formed.
    pub fn validate_size_range(min: Option<u64>, max: Option<u64>) -> IndexResult<()> {
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(IndexError::InvalidQuery(format!(
                    "min_size ({}) is greater than max_size ({})",
                    lo, hi
                )));
            }
        }
        Ok(())
    }
}
