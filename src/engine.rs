//! Service object tying the inventory store to the indexing phases.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::checksum::ChecksumScheduler;
use crate::config::{self, EngineConfig};
use crate::duplicates::DuplicateFinder;
use crate::error::{validation, IndexError, IndexResult};
use crate::filter::PathFilter;
use crate::metrics::Metrics;
use crate::pool::Spawner;
use crate::reconcile::Reconciler;
use crate::scanner::MetadataScanner;
use crate::store::{InventoryStore, SqliteInventory};
use crate::types::{
    ChecksumReport, DuplicatePage, DuplicateQuery, IndexReport, InventoryStats, PruneReport, ReconcileReport,
    ScanSession, SearchPage, SearchQuery,
};

pub struct Engine<S: InventoryStore = SqliteInventory> {
    store: S,
    config: EngineConfig,
    filter: PathFilter,
    metrics: Metrics,
    spawner: Option<Arc<dyn Spawner>>,
}

impl Engine<SqliteInventory> {
    /// Opens (creating if needed) the SQLite inventory named in `config`.
    pub async fn open(config: EngineConfig) -> IndexResult<Self> {
        config::ensure_sqlite_parent_dir(&config.database_url)
            .map_err(|e| IndexError::Config(format!("database.url: {}", e)))?;
        let store = SqliteInventory::open(&config.database_url, config.checksum.algorithm).await?;
        info!("Opened inventory at {}", config.database_url);
        Self::with_store(store, config)
    }
}

impl<S: InventoryStore> Engine<S> {
    pub fn with_store(store: S, config: EngineConfig) -> IndexResult<Self> {
        let filter = PathFilter::new(&config.scan.excludes, config.scan.include_hidden)?;
        Ok(Self { store, config, filter, metrics: Metrics::new(), spawner: None })
    }

    /// Overrides how checksum workers are started.
    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Phase 1 only. `recursive` falls back to the configured default.
    pub async fn scan_metadata(
        &self,
        root: &Path,
        recursive: Option<bool>,
        cancel: &CancellationToken,
    ) -> IndexResult<ScanSession> {
        let recursive = recursive.unwrap_or(self.config.scan.recursive);
        MetadataScanner::new(&self.store, self.filter.clone(), self.config.scan.batch_size, self.metrics.clone())
            .scan(root, recursive, cancel)
            .await
    }

    /// Phase 2 only, over whatever the inventory currently holds.
    pub async fn compute_checksums(&self, cancel: &CancellationToken) -> IndexResult<ChecksumReport> {
        let mut scheduler = ChecksumScheduler::new(&self.store, self.config.checksum.clone(), self.metrics.clone());
        if let Some(spawner) = &self.spawner {
            scheduler = scheduler.with_spawner(spawner.clone());
        }
        scheduler.compute_missing_checksums(cancel).await
    }

    /// Both phases. A cancelled scan skips the checksum pass.
    pub async fn full_index(
        &self,
        root: &Path,
        recursive: Option<bool>,
        cancel: &CancellationToken,
    ) -> IndexResult<IndexReport> {
        let scan = self.scan_metadata(root, recursive, cancel).await?;
        let checksums = if scan.cancelled {
            ChecksumReport { cancelled: true, ..Default::default() }
        } else {
            self.compute_checksums(cancel).await?
        };
        Ok(IndexReport { scan, checksums })
    }

    pub async fn find_duplicates(&self, query: &DuplicateQuery) -> IndexResult<DuplicatePage> {
        DuplicateFinder::new(&self.store).find_duplicates(query).await
    }

    /// Duplicate query seeded from the configured group size and page limit.
    pub fn default_duplicate_query(&self) -> DuplicateQuery {
        DuplicateQuery {
            min_group_size: self.config.duplicates.min_group_size,
            limit: self.config.duplicates.page_limit,
            ..Default::default()
        }
    }

    /// `dry_run` falls back to the configured default.
    pub async fn reconcile(&self, dry_run: Option<bool>) -> IndexResult<ReconcileReport> {
        Reconciler::new(&self.store, self.metrics.clone())
            .reconcile(dry_run.unwrap_or(self.config.dry_run))
            .await
    }

    pub async fn prune_empty_directories(&self, dry_run: Option<bool>) -> IndexResult<PruneReport> {
        Reconciler::new(&self.store, self.metrics.clone())
            .prune_empty_directories(dry_run.unwrap_or(self.config.dry_run))
            .await
    }

    pub async fn search(&self, query: &SearchQuery) -> IndexResult<SearchPage> {
        validation::validate_size_range(query.min_size, query.max_size)?;
        if let (Some(after), Some(before)) = (query.modified_after, query.modified_before) {
            if after > before {
                return Err(IndexError::InvalidQuery("modified_after is later than modified_before".into()));
            }
        }
        self.store.search(query).await
    }

    pub async fn stats(&self) -> IndexResult<InventoryStats> {
        self.store.stats().await
    }
}
