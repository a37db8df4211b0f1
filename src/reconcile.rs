//! Removes inventory records whose files are gone.
//!
//! Directories are checked before files, shallowest first. A missing
//! directory drops every record at or below it with one store call and no
//! further filesystem checks; only directories that still exist have their
//! immediate files checked one by one.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::IndexResult;
use crate::metrics::Metrics;
use crate::store::InventoryStore;
use crate::types::{PruneReport, ReconcileReport, RemovedEntry};

#[derive(Debug)]
enum Presence {
    Present,
    /// The path is gone, or is no longer a directory where one is expected.
    Gone,
    Unknown(io::Error),
}

async fn probe_dir(path: &Path) -> Presence {
    match tokio::fs::symlink_metadata(path).await {
        Ok(md) if md.is_dir() => Presence::Present,
        Ok(_) => Presence::Gone,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Presence::Gone,
        Err(e) => Presence::Unknown(e),
    }
}

/// Only a regular file counts; a link or directory in its place is gone.
async fn probe_file(path: &Path) -> Presence {
    match tokio::fs::symlink_metadata(path).await {
        Ok(md) if md.is_file() => Presence::Present,
        Ok(_) => Presence::Gone,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Presence::Gone,
        Err(e) => Presence::Unknown(e),
    }
}

/// Parents before children: fewer components first, then lexicographic.
fn order_directories(dirs: Vec<String>) -> Vec<String> {
    let mut keyed: Vec<(usize, String)> = dirs.into_iter().map(|d| (Path::new(&d).components().count(), d)).collect();
    keyed.sort();
    keyed.into_iter().map(|(_, d)| d).collect()
}

pub struct Reconciler<'a, S: InventoryStore + ?Sized> {
    store: &'a S,
    metrics: Metrics,
}

impl<'a, S: InventoryStore + ?Sized> Reconciler<'a, S> {
    pub fn new(store: &'a S, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    /// Diffs the inventory against the live filesystem.
    ///
    /// With `dry_run` the report lists what would be removed and the store is
    /// left untouched. Paths whose state cannot be determined (for example
    /// permission denied) are kept and counted as errors.
    pub async fn reconcile(&self, dry_run: bool) -> IndexResult<ReconcileReport> {
        let mut report = ReconcileReport { dry_run, ..Default::default() };
        report.total_checked = self.store.count_files().await?;
        let directories = order_directories(self.store.list_distinct_directories().await?);
        info!(
            "Reconciling {} record(s) across {} director(ies){}",
            report.total_checked,
            directories.len(),
            if dry_run { " (dry run)" } else { "" }
        );

        let mut missing: Vec<PathBuf> = Vec::new();
        for dir in directories {
            let dir_path = PathBuf::from(&dir);
            // Already covered by a missing ancestor: no check, no second count.
            if missing.iter().any(|m| dir_path.starts_with(m)) {
                continue;
            }

            report.directory_checks += 1;
            match probe_dir(&dir_path).await {
                Presence::Present => self.reconcile_files(&dir, dry_run, &mut report).await?,
                Presence::Gone => {
                    let covered = if dry_run {
                        self.store.count_by_path_prefix(&dir).await
                    } else {
                        self.store.delete_by_path_prefix(&dir).await
                    };
                    match covered {
                        Ok(n) => {
                            debug!("Directory {} is gone; {} record(s) at or below it", dir, n);
                            report.directories_short_circuited += 1;
                            report.files_removed_by_directory += n;
                            report.filesystem_calls_saved += n.saturating_sub(1);
                            report.removed.push(RemovedEntry::Directory { path: dir.clone(), files: n });
                        }
                        Err(e) => {
                            warn!("Failed to remove records under {}: {}", dir, e);
                            report.errors += 1;
                        }
                    }
                    missing.push(dir_path);
                }
                Presence::Unknown(e) => {
                    warn!("Cannot check directory {}: {}", dir, e);
                    report.errors += 1;
                }
            }
        }

        report.files_removed = report.files_removed_by_directory + report.files_removed_individually;
        if !dry_run {
            self.metrics.add_removed(report.files_removed);
        }
        self.metrics.add_warnings(report.errors as usize);
        info!(
            "Reconcile finished: removed={} ({} via {} missing director(ies), {} individually), dir checks={}, file checks={}, saved={}, errors={}{}",
            report.files_removed,
            report.files_removed_by_directory,
            report.directories_short_circuited,
            report.files_removed_individually,
            report.directory_checks,
            report.file_checks,
            report.filesystem_calls_saved,
            report.errors,
            if dry_run { " (dry run)" } else { "" }
        );
        Ok(report)
    }

    async fn reconcile_files(&self, dir: &str, dry_run: bool, report: &mut ReconcileReport) -> IndexResult<()> {
        for record in self.store.list_directory(dir).await? {
            report.file_checks += 1;
            match probe_file(&record.full_path()).await {
                Presence::Present => {}
                Presence::Gone => {
                    let removed = if dry_run {
                        Ok(true)
                    } else {
                        self.store.delete_by_exact_path(&record.path, &record.filename).await
                    };
                    match removed {
                        Ok(true) => {
                            report.files_removed_individually += 1;
                            report.removed.push(RemovedEntry::File { path: record.path, filename: record.filename });
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!("Failed to remove record {}: {}", record.full_path().display(), e);
                            report.errors += 1;
                        }
                    }
                }
                Presence::Unknown(e) => {
                    warn!("Cannot check {}: {}", record.full_path().display(), e);
                    report.errors += 1;
                }
            }
        }
        Ok(())
    }

    /// Drops directory bookkeeping rows that no longer own any file record.
    pub async fn prune_empty_directories(&self, dry_run: bool) -> IndexResult<PruneReport> {
        let directories = self.store.list_empty_directories().await?;
        let empty_directories = if dry_run {
            directories.len() as u64
        } else {
            self.store.delete_directories(&directories).await?
        };
        info!(
            "Pruned {} empty director(ies){}",
            empty_directories,
            if dry_run { " (dry run)" } else { "" }
        );
        Ok(PruneReport { dry_run, empty_directories, directories })
    }
}
