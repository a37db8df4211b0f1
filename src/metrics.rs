use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Process-lifetime counters, shared with checksum workers.
#[derive(Clone)]
pub struct Metrics {
    pub scans_started: Arc<AtomicUsize>,
    pub scans_completed: Arc<AtomicUsize>,
    pub files_indexed: Arc<AtomicU64>,
    pub checksums_computed: Arc<AtomicU64>,
    pub bytes_hashed: Arc<AtomicU64>,
    pub records_removed: Arc<AtomicU64>,
    pub warnings_count: Arc<AtomicUsize>,
    pub degraded_runs: Arc<AtomicUsize>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans_started: Arc::new(AtomicUsize::new(0)),
            scans_completed: Arc::new(AtomicUsize::new(0)),
            files_indexed: Arc::new(AtomicU64::new(0)),
            checksums_computed: Arc::new(AtomicU64::new(0)),
            bytes_hashed: Arc::new(AtomicU64::new(0)),
            records_removed: Arc::new(AtomicU64::new(0)),
            warnings_count: Arc::new(AtomicUsize::new(0)),
            degraded_runs: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_scans_started(&self) {
        self.scans_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scans_completed(&self) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_degraded_runs(&self) {
        self.degraded_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_files_indexed(&self, count: u64) {
        self.files_indexed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_checksums(&self, count: u64) {
        self.checksums_computed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_bytes_hashed(&self, bytes: u64) {
        self.bytes_hashed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_removed(&self, count: u64) {
        self.records_removed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_warnings(&self, count: usize) {
        self.warnings_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scans_started: self.scans_started.load(Ordering::Relaxed),
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            files_indexed: self.files_indexed.load(Ordering::Relaxed),
            checksums_computed: self.checksums_computed.load(Ordering::Relaxed),
            bytes_hashed: self.bytes_hashed.load(Ordering::Relaxed),
            records_removed: self.records_removed.load(Ordering::Relaxed),
            warnings_count: self.warnings_count.load(Ordering::Relaxed),
            degraded_runs: self.degraded_runs.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub scans_started: usize,
    pub scans_completed: usize,
    pub files_indexed: u64,
    pub checksums_computed: u64,
    pub bytes_hashed: u64,
    pub records_removed: u64,
    pub warnings_count: usize,
    pub degraded_runs: usize,
    pub uptime_seconds: u64,
}
