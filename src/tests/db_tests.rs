#[cfg(test)]
mod tests {
    use crate::db;
    use crate::error::IndexError;
    use crate::hasher::ChecksumAlgorithm;
    use crate::store::{InventoryStore, SqliteInventory};
    use crate::types::{Checksum, ChecksumUpdate, ScannedFile, SearchQuery, UpsertOutcome};
    use chrono::{Duration, TimeZone, Utc};
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn setup_test_db() -> sqlx::SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::init_db(&pool).await.unwrap();
        pool
    }

    fn scanned(path: &str, filename: &str, size: u64, minute: u32) -> ScannedFile {
        ScannedFile {
            path: path.into(),
            filename: filename.into(),
            size,
            modified_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
        }
    }

    fn update_for(f: &ScannedFile, checksum: &str) -> ChecksumUpdate {
        ChecksumUpdate {
            path: f.path.clone(),
            filename: f.filename.clone(),
            checksum: Checksum::new(checksum),
            size: f.size,
            modified_at: f.modified_at,
        }
    }

    #[tokio::test]
    async fn test_init_db() {
        let pool = setup_test_db().await;

        let tables: Vec<String> = sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();

        assert!(tables.contains(&"files".to_string()));
        assert!(tables.contains(&"directories".to_string()));
        assert!(tables.contains(&"meta".to_string()));

        // Idempotent
        db::init_db(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_algorithm_is_pinned_once_checksums_exist() {
        let pool = setup_test_db().await;
        db::ensure_algorithm(&pool, ChecksumAlgorithm::Sha256).await.unwrap();
        // Nothing hashed yet: switching is allowed.
        db::ensure_algorithm(&pool, ChecksumAlgorithm::Blake3).await.unwrap();

        let store = SqliteInventory::new(pool.clone());
        let f = scanned("/d", "a", 1, 0);
        store.upsert(&f).await.unwrap();
        assert!(store.set_checksum(&update_for(&f, "abc")).await.unwrap());

        let err = db::ensure_algorithm(&pool, ChecksumAlgorithm::Sha256).await.unwrap_err();
        assert!(matches!(err, IndexError::AlgorithmMismatch { .. }));
        assert!(err.is_fatal_config());
        db::ensure_algorithm(&pool, ChecksumAlgorithm::Blake3).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_outcomes() {
        let store = SqliteInventory::new(setup_test_db().await);
        let f = scanned("/d", "a.txt", 10, 0);

        assert_eq!(store.upsert(&f).await.unwrap(), UpsertOutcome::Added);
        assert_eq!(store.upsert(&f).await.unwrap(), UpsertOutcome::Unchanged { kept_checksum: false });

        store.set_checksum(&update_for(&f, "sum")).await.unwrap();
        assert_eq!(store.upsert(&f).await.unwrap(), UpsertOutcome::Unchanged { kept_checksum: true });

        let changed = scanned("/d", "a.txt", 10, 5);
        assert_eq!(store.upsert(&changed).await.unwrap(), UpsertOutcome::Updated { invalidated_checksum: true });
        let rec = store.get("/d", "a.txt").await.unwrap().unwrap();
        assert!(rec.checksum.is_none());
        assert_eq!(rec.modified_at, changed.modified_at);
    }

    #[tokio::test]
    async fn test_stale_checksum_update_is_ignored() {
        let store = SqliteInventory::new(setup_test_db().await);
        let old = scanned("/d", "a", 10, 0);
        store.upsert(&old).await.unwrap();
        store.upsert(&scanned("/d", "a", 10, 1)).await.unwrap();

        assert!(!store.set_checksum(&update_for(&old, "stale")).await.unwrap());
        let applied = store
            .set_checksums(&[update_for(&old, "stale"), update_for(&scanned("/d", "a", 10, 1), "fresh")])
            .await
            .unwrap();
        assert_eq!(applied, 1);
        assert_eq!(store.get("/d", "a").await.unwrap().unwrap().checksum, Some(Checksum::new("fresh")));
    }

    #[tokio::test]
    async fn test_size_buckets_and_candidates() {
        let store = SqliteInventory::new(setup_test_db().await);
        let files = vec![
            scanned("/d", "a", 10, 0),
            scanned("/d", "b", 10, 0),
            scanned("/d", "c", 20, 0),
            scanned("/d", "e1", 0, 0),
            scanned("/d", "e2", 0, 0),
        ];
        let summary = store.upsert_batch(&files).await.unwrap();
        assert_eq!(summary.added, 5);
        store.set_checksum(&update_for(&files[0], "x")).await.unwrap();

        let buckets = store.counts_by_size().await.unwrap();
        let ten = buckets.iter().find(|b| b.size == 10).unwrap();
        assert_eq!((ten.total, ten.missing), (2, 1));
        assert!(ten.is_candidate());
        assert!(!buckets.iter().find(|b| b.size == 20).unwrap().is_candidate());

        let names = |v: Vec<crate::types::FileRecord>| v.into_iter().map(|r| r.filename).collect::<Vec<_>>();
        assert_eq!(names(store.list_missing_checksum_candidates(0, false).await.unwrap()), vec!["e1", "e2", "b"]);
        assert_eq!(names(store.list_missing_checksum_candidates(0, true).await.unwrap()), vec!["b"]);
        assert!(store.list_missing_checksum_candidates(5, true).await.unwrap().is_empty());
        assert_eq!(store.get_by_size_bucket(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_prefix_operations_respect_path_boundaries() {
        let store = SqliteInventory::new(setup_test_db().await);
        let sep = std::path::MAIN_SEPARATOR;
        let a = format!("{}r{}a", sep, sep);
        let ab = format!("{}r{}ab", sep, sep);
        let a_sub = format!("{}{}sub", a, sep);
        store
            .upsert_batch(&[scanned(&a, "1", 1, 0), scanned(&a_sub, "2", 1, 0), scanned(&ab, "3", 1, 0)])
            .await
            .unwrap();
        store.record_directories(&[a.clone(), a_sub.clone(), ab.clone()]).await.unwrap();

        assert_eq!(store.count_by_path_prefix(&a).await.unwrap(), 2);
        assert_eq!(store.delete_by_path_prefix(&a).await.unwrap(), 2);
        assert_eq!(store.count_files().await.unwrap(), 1);
        assert_eq!(store.list_distinct_directories().await.unwrap(), vec![ab.clone()]);
        // directory bookkeeping under the prefix went with the files
        assert!(store.list_empty_directories().await.unwrap().is_empty());

        assert!(store.delete_by_exact_path(&ab, "3").await.unwrap());
        assert!(!store.delete_by_exact_path(&ab, "3").await.unwrap());
        assert_eq!(store.list_empty_directories().await.unwrap(), vec![ab.clone()]);
        assert_eq!(store.delete_directories(&[ab]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_filters_and_order() {
        let store = SqliteInventory::new(setup_test_db().await);
        let files = vec![
            scanned("/music", "song.mp3", 4000, 10),
            scanned("/music", "other.mp3", 4000, 20),
            scanned("/docs", "notes.txt", 10, 30),
        ];
        store.upsert_batch(&files).await.unwrap();
        store.set_checksum(&update_for(&files[0], "s1")).await.unwrap();

        let mp3 = store
            .search(&SearchQuery { filename_pattern: Some("*.mp3".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(mp3.total, 2);
        // newest first
        assert_eq!(mp3.files[0].filename, "other.mp3");

        let hashed = store.search(&SearchQuery { has_checksum: Some(true), ..Default::default() }).await.unwrap();
        assert_eq!(hashed.total, 1);
        let by_sum = store
            .search(&SearchQuery { checksum: Some(Checksum::new("s1")), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(by_sum.files[0].filename, "song.mp3");

        let recent = store
            .search(&SearchQuery { modified_after: Some(files[1].modified_at), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(recent.total, 2);

        let paged = store.search(&SearchQuery { limit: Some(1), offset: 1, ..Default::default() }).await.unwrap();
        assert_eq!(paged.total, 3);
        assert_eq!(paged.files.len(), 1);
        assert_eq!(paged.files[0].filename, "other.mp3");
    }

    #[tokio::test]
    async fn test_stats() {
        let store = SqliteInventory::new(setup_test_db().await);
        let files = vec![
            scanned("/a", "x", 100, 1),
            scanned("/b", "x", 100, 2),
            scanned("/c", "x", 100, 3),
            scanned("/a", "big", 900, 4),
        ];
        store.upsert_batch(&files).await.unwrap();
        for f in &files[..3] {
            store.set_checksum(&update_for(f, "same")).await.unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_files, 4);
        assert_eq!(stats.total_size, 1200);
        assert_eq!(stats.files_with_checksum, 3);
        assert_eq!(stats.files_without_checksum, 1);
        assert_eq!(stats.duplicate_groups, 1);
        assert_eq!(stats.duplicate_files, 3);
        assert_eq!(stats.wasted_bytes, 200);
        assert_eq!(stats.unique_directories, 3);
        assert_eq!(stats.largest_file_size, 900);
        assert_eq!(stats.smallest_file_size, 100);
        assert_eq!(stats.newest_modification, Some(files[3].modified_at));
        assert_eq!(stats.oldest_modification, Some(files[0].modified_at));
        assert!(stats.last_indexed.unwrap() > Utc::now() - Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_open_file_database_persists_between_connections() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("inv.db").display());

        {
            let store = SqliteInventory::open(&url, ChecksumAlgorithm::Sha256).await.unwrap();
            store.upsert(&scanned("/d", "kept", 3, 0)).await.unwrap();
            store.pool().close().await;
        }

        let store = SqliteInventory::open(&url, ChecksumAlgorithm::Sha256).await.unwrap();
        assert!(store.get("/d", "kept").await.unwrap().is_some());
    }
}
