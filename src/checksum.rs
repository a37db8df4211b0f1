//! Phase 2: checksums for duplicate candidates only.
//!
//! A file can only have a duplicate if another file has the same size, so
//! only records in size buckets with two or more members are hashed. Hashing
//! runs on a [`WorkerPool`]; results flow back to this task, which alone
//! writes to the store, in batches that commit atomically.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ChecksumSettings;
use crate::error::IndexResult;
use crate::hasher::{hash_task, HashOutcome, HashTask};
use crate::metrics::Metrics;
use crate::pool::{ExecutionMode, Spawner, ThreadSpawner, WorkerPool};
use crate::store::InventoryStore;
use crate::types::{ChecksumReport, ChecksumUpdate};

pub struct ChecksumScheduler<'a, S: InventoryStore + ?Sized> {
    store: &'a S,
    settings: ChecksumSettings,
    metrics: Metrics,
    spawner: Arc<dyn Spawner>,
}

impl<'a, S: InventoryStore + ?Sized> ChecksumScheduler<'a, S> {
    pub fn new(store: &'a S, settings: ChecksumSettings, metrics: Metrics) -> Self {
        Self { store, settings, metrics, spawner: Arc::new(ThreadSpawner) }
    }

    /// Replaces the thread spawner (used to simulate spawn failures).
    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    fn pool(&self) -> WorkerPool {
        let pool = if self.settings.sequential {
            WorkerPool::sequential()
        } else {
            WorkerPool::new(self.settings.workers)
        };
        pool.with_spawner(self.spawner.clone()).with_name("checksum-worker")
    }

    /// Computes checksums for every record in a candidate bucket that lacks one.
    ///
    /// Records above `size_threshold` (0 = unlimited) and, with `skip_empty`,
    /// zero-byte records are left alone. Per-file problems and failed batch
    /// commits are counted in the report; only store reads made before
    /// dispatch can fail the call.
    pub async fn compute_missing_checksums(&self, cancel: &CancellationToken) -> IndexResult<ChecksumReport> {
        let mut report = ChecksumReport::default();

        let buckets = self.store.counts_by_size().await?;
        let candidate_missing: u64 = buckets.iter().filter(|b| b.is_candidate()).map(|b| b.missing).sum();
        report.candidate_buckets = buckets.iter().filter(|b| b.is_candidate() && b.missing > 0).count() as u64;

        let records = self
            .store
            .list_missing_checksum_candidates(self.settings.size_threshold, self.settings.skip_empty)
            .await?;
        report.candidates = records.len() as u64;
        report.excluded_by_size = candidate_missing.saturating_sub(report.candidates);

        info!(
            "Checksum pass: {} candidate bucket(s), {} file(s) to hash, {} excluded by size rules",
            report.candidate_buckets, report.candidates, report.excluded_by_size
        );
        if records.is_empty() {
            report.mode = Some(if self.settings.sequential { ExecutionMode::Sequential } else { ExecutionMode::Parallel });
            return Ok(report);
        }

        let tasks: Vec<HashTask> = records.into_iter().map(HashTask::from).collect();
        let (tx, mut rx) = mpsc::unbounded_channel::<HashOutcome>();
        let pool = self.pool();
        debug!("Hashing {} file(s) on up to {} worker(s)", report.candidates, pool.workers());
        let algorithm = self.settings.algorithm;
        let worker_metrics = self.metrics.clone();
        let cancel_pool = cancel.clone();
        let runner = task::spawn_blocking(move || {
            pool.run(tasks, move |t| hash_task(t, algorithm, &worker_metrics), tx, &cancel_pool)
        });

        let batch_size = self.settings.batch_size.max(1);
        let mut pending: Vec<ChecksumUpdate> = Vec::with_capacity(batch_size);
        while let Some(outcome) = rx.recv().await {
            match outcome {
                HashOutcome::Computed(update) => {
                    report.computed += 1;
                    pending.push(update);
                    if pending.len() >= batch_size {
                        self.commit(std::mem::take(&mut pending), &mut report).await;
                    }
                }
                HashOutcome::NotRegular(path) => {
                    debug!("Skipping {}: no longer a regular file", path.display());
                    report.skipped_special += 1;
                }
                HashOutcome::Stale(path) => {
                    debug!("Skipping {}: changed since it was indexed", path.display());
                    report.skipped_stale += 1;
                }
                HashOutcome::Failed { path, error } => {
                    warn!("Failed to hash {}: {}", path.display(), error);
                    report.read_errors += 1;
                }
            }
        }
        // Results already computed are committed even when cancelled.
        self.commit(pending, &mut report).await;

        let pool_report = runner.await?;
        report.mode = Some(pool_report.mode);
        report.cancelled = pool_report.cancelled;
        report.read_errors += pool_report.panicked as u64;
        if pool_report.mode == ExecutionMode::Degraded {
            self.metrics.inc_degraded_runs();
            report.degraded_reason = pool_report.spawn_error.clone();
            warn!(
                "Checksum pass ran in degraded sequential mode: {}",
                pool_report.spawn_error.as_deref().unwrap_or("unknown spawn failure")
            );
        }
        self.metrics.add_checksums(report.committed);
        self.metrics.add_warnings((report.read_errors + report.batches_failed) as usize);

        info!(
            "Checksum pass finished: computed={}, committed={}, special={}, stale={}, errors={}, failed batches={}, mode={:?}{}",
            report.computed,
            report.committed,
            report.skipped_special,
            report.skipped_stale,
            report.read_errors,
            report.batches_failed,
            pool_report.mode,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    /// Commits one batch, splitting it on failure.
    ///
    /// A rejected batch is halved and each half retried, up to
    /// `max_commit_attempts` tries for any given record. What still fails is
    /// dropped and counted; earlier batches stay committed.
    async fn commit(&self, batch: Vec<ChecksumUpdate>, report: &mut ChecksumReport) {
        if batch.is_empty() {
            return;
        }
        let max_attempts = self.settings.max_commit_attempts.max(1);
        let mut work: Vec<(Vec<ChecksumUpdate>, u32)> = vec![(batch, 1)];

        while let Some((chunk, attempt)) = work.pop() {
            match self.store.set_checksums(&chunk).await {
                Ok(applied) => {
                    report.batches_committed += 1;
                    report.committed += applied;
                    report.skipped_stale += chunk.len() as u64 - applied;
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(
                        "Giving up on {} checksum(s) after {} attempt(s): {}",
                        chunk.len(),
                        attempt,
                        e
                    );
                    report.batches_failed += 1;
                    report.records_dropped += chunk.len() as u64;
                }
                Err(e) => {
                    debug!("Commit of {} checksum(s) failed (attempt {}): {}", chunk.len(), attempt, e);
                    if self.settings.commit_backoff_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(self.settings.commit_backoff_ms * attempt as u64))
                            .await;
                    }
                    if chunk.len() > 1 {
                        let mut left = chunk;
                        let right = left.split_off(left.len() / 2);
                        work.push((right, attempt + 1));
                        work.push((left, attempt + 1));
                    } else {
                        work.push((chunk, attempt + 1));
                    }
                }
            }
        }
    }
}
