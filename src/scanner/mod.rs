//! Phase 1: metadata-only walk.
//!
//! The walk runs on a blocking thread and ships batches over a bounded
//! channel; the async side upserts them. Nothing here reads file content.

use std::path::Path;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{validation, IndexResult};
use crate::filter::{PathFilter, Verdict};
use crate::metrics::Metrics;
use crate::store::InventoryStore;
use crate::types::{system_time_utc, ScanSession, ScannedFile};

#[derive(Debug, Default)]
struct WalkTally {
    skipped: u64,
    symlinks: u64,
    errors: u64,
}

#[derive(Debug, Default)]
struct WalkBatch {
    files: Vec<ScannedFile>,
    directories: Vec<String>,
    tally: WalkTally,
}

impl WalkBatch {
    fn len(&self) -> usize {
        self.files.len() + self.directories.len()
    }
}

pub struct MetadataScanner<'a, S: InventoryStore + ?Sized> {
    store: &'a S,
    filter: PathFilter,
    batch_size: usize,
    metrics: Metrics,
}

impl<'a, S: InventoryStore + ?Sized> MetadataScanner<'a, S> {
    pub fn new(store: &'a S, filter: PathFilter, batch_size: usize, metrics: Metrics) -> Self {
        Self { store, filter, batch_size: batch_size.max(1), metrics }
    }

    /// Walks `root` and upserts every indexable file.
    ///
    /// An invalid root is an error before any work starts. Everything after
    /// that (unreadable entries, failed batches, cancellation) is reflected in
    /// the returned session instead.
    pub async fn scan(&self, root: &Path, recursive: bool, cancel: &CancellationToken) -> IndexResult<ScanSession> {
        let root = validation::validate_root_path(root)?;
        let mut session = ScanSession::new(root.clone(), recursive);
        self.metrics.inc_scans_started();
        info!("Scanning {} (recursive={})", root.display(), recursive);

        let (tx, mut rx) = mpsc::channel::<WalkBatch>(16);
        let filter = self.filter.clone();
        let batch_size = self.batch_size;
        let cancel_walk = cancel.clone();
        let walker = task::spawn_blocking(move || walk(&root, recursive, &filter, batch_size, &cancel_walk, &tx));

        while let Some(batch) = rx.recv().await {
            session.files_seen += batch.files.len() as u64;
            session.directories_seen += batch.directories.len() as u64;
            session.skipped += batch.tally.skipped;
            session.symlinks_skipped += batch.tally.symlinks;
            session.errors += batch.tally.errors;

            if !batch.directories.is_empty() {
                if let Err(e) = self.store.record_directories(&batch.directories).await {
                    warn!("Failed to record {} directories: {}", batch.directories.len(), e);
                    session.errors += 1;
                }
            }
            if !batch.files.is_empty() {
                match self.store.upsert_batch(&batch.files).await {
                    Ok(summary) => {
                        session.absorb(&summary);
                        self.metrics.add_files_indexed(batch.files.len() as u64);
                        debug!(
                            "Persisted {} files ({} added, {} updated, {} unchanged)",
                            batch.files.len(),
                            summary.added,
                            summary.updated,
                            summary.unchanged
                        );
                    }
                    Err(e) => {
                        warn!("Failed to persist batch of {} files: {}", batch.files.len(), e);
                        session.errors += 1;
                    }
                }
            }
        }
        walker.await?;

        session.cancelled = cancel.is_cancelled();
        session.finished_at = Some(Utc::now());
        self.metrics.add_warnings(session.errors as usize);
        self.metrics.inc_scans_completed();
        info!(
            "Scan of {} finished: seen={}, added={}, updated={}, unchanged={}, skipped={} (symlinks {}), invalidated={}, errors={}{}",
            session.root.display(),
            session.files_seen,
            session.files_added,
            session.files_updated,
            session.files_unchanged,
            session.skipped,
            session.symlinks_skipped,
            session.checksums_invalidated,
            session.errors,
            if session.cancelled { " (cancelled)" } else { "" }
        );
        Ok(session)
    }
}

fn walk(
    root: &Path,
    recursive: bool,
    filter: &PathFilter,
    batch_size: usize,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<WalkBatch>,
) {
    let mut batch = WalkBatch::default();
    let mut it = WalkDir::new(root)
        .follow_links(false)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name()
        .into_iter();

    while let Some(next) = it.next() {
        if cancel.is_cancelled() {
            break;
        }
        let entry = match next {
            Ok(e) => e,
            Err(e) => {
                let p = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                warn!("Skipping unreadable entry {}: {}", p, e);
                batch.tally.errors += 1;
                continue;
            }
        };
        // Stored keys must name the entry on disk, so a lossy name is no key.
        if entry.path().to_str().is_none() {
            warn!("Skipping entry with a non-UTF-8 path: {}", entry.path().display());
            batch.tally.errors += 1;
            if entry.file_type().is_dir() {
                it.skip_current_dir();
            }
            continue;
        }
        // walkdir does not follow links here, so this is lstat metadata.
        let md = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to stat {}: {}", entry.path().display(), e);
                batch.tally.errors += 1;
                continue;
            }
        };

        if entry.file_type().is_dir() {
            if entry.depth() > 0 && !filter.should_descend(entry.path(), &md) {
                batch.tally.skipped += 1;
                it.skip_current_dir();
                continue;
            }
            // A non-recursive walk lists subdirectories without entering them.
            if recursive || entry.depth() == 0 {
                if let Some(dir) = entry.path().to_str() {
                    batch.directories.push(dir.to_owned());
                }
            }
        } else {
            match filter.classify(entry.path(), &md) {
                Verdict::Index => match scanned_file(entry.path(), &md) {
                    Some(f) => batch.files.push(f),
                    None => batch.tally.errors += 1,
                },
                Verdict::Symlink => {
                    batch.tally.skipped += 1;
                    batch.tally.symlinks += 1;
                }
                verdict => {
                    debug!("Skipping {} ({:?})", entry.path().display(), verdict);
                    batch.tally.skipped += 1;
                }
            }
        }

        if batch.len() >= batch_size && tx.blocking_send(std::mem::take(&mut batch)).is_err() {
            return;
        }
    }

    let _ = tx.blocking_send(batch);
}

fn scanned_file(path: &Path, md: &std::fs::Metadata) -> Option<ScannedFile> {
    let parent = path.parent()?;
    let filename = path.file_name()?;
    let modified = match md.modified() {
        Ok(t) => system_time_utc(t),
        Err(e) => {
            warn!("No modification time for {}: {}", path.display(), e);
            return None;
        }
    };
    Some(ScannedFile {
        path: parent.to_str()?.to_owned(),
        filename: filename.to_str()?.to_owned(),
        size: md.len(),
        modified_at: modified,
    })
}
