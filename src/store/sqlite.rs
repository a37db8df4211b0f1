use std::path::MAIN_SEPARATOR_STR;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

use crate::error::IndexResult;
use crate::hasher::ChecksumAlgorithm;
use crate::store::InventoryStore;
use crate::types::{
    from_micros, to_micros, Checksum, ChecksumUpdate, DuplicateGroup, DuplicatePage, DuplicateQuery, FileRecord,
    InventoryStats, ScannedFile, SearchPage, SearchQuery, SizeBucket, UpsertOutcome, UpsertSummary,
};

const FILE_COLUMNS: &str = "path, filename, checksum, size, modified_at, indexed_at";

// SQLite's default bound-parameter limit is 999.
const SQLITE_MAX_VARS: usize = 999;
const DIR_BINDS_PER_ROW: usize = 2;

/// `files` + `directories` tables in a SQLite database.
#[derive(Clone)]
pub struct SqliteInventory {
    pool: SqlitePool,
}

impl SqliteInventory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connects, initialises the schema, and pins the checksum algorithm.
    pub async fn open(url: &str, algorithm: ChecksumAlgorithm) -> IndexResult<Self> {
        let pool = crate::db::connect(url).await?;
        crate::db::ensure_algorithm(&pool, algorithm).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// `prefix` followed by exactly one separator, for "strictly below" matches.
fn child_prefix(prefix: &str) -> String {
    if prefix.ends_with(MAIN_SEPARATOR_STR) {
        prefix.to_string()
    } else {
        format!("{}{}", prefix, MAIN_SEPARATOR_STR)
    }
}

fn row_to_record(row: &SqliteRow) -> IndexResult<FileRecord> {
    Ok(FileRecord {
        path: row.try_get("path")?,
        filename: row.try_get("filename")?,
        checksum: row.try_get::<Option<String>, _>("checksum")?.map(Checksum::new),
        size: row.try_get::<i64, _>("size")?.max(0) as u64,
        modified_at: from_micros(row.try_get("modified_at")?),
        indexed_at: from_micros(row.try_get("indexed_at")?),
    })
}

async fn upsert_one(conn: &mut SqliteConnection, file: &ScannedFile, now: i64) -> IndexResult<UpsertOutcome> {
    let size = file.size as i64;
    let mtime = to_micros(&file.modified_at);
    let existing: Option<(i64, i64, Option<String>)> =
        sqlx::query_as("SELECT size, modified_at, checksum FROM files WHERE path = ?1 AND filename = ?2")
            .bind(&file.path)
            .bind(&file.filename)
            .fetch_optional(&mut *conn)
            .await?;

    match existing {
        None => {
            sqlx::query(
                "INSERT INTO files (path, filename, checksum, size, modified_at, indexed_at) VALUES (?1, ?2, NULL, ?3, ?4, ?5)",
            )
            .bind(&file.path)
            .bind(&file.filename)
            .bind(size)
            .bind(mtime)
            .bind(now)
            .execute(&mut *conn)
            .await?;
            Ok(UpsertOutcome::Added)
        }
        Some((old_size, old_mtime, checksum)) if old_size == size && old_mtime == mtime => {
            sqlx::query("UPDATE files SET indexed_at = ?3 WHERE path = ?1 AND filename = ?2")
                .bind(&file.path)
                .bind(&file.filename)
                .bind(now)
                .execute(&mut *conn)
                .await?;
            Ok(UpsertOutcome::Unchanged { kept_checksum: checksum.is_some() })
        }
        Some((_, _, checksum)) => {
            sqlx::query(
                "UPDATE files SET size = ?3, modified_at = ?4, checksum = NULL, indexed_at = ?5 WHERE path = ?1 AND filename = ?2",
            )
            .bind(&file.path)
            .bind(&file.filename)
            .bind(size)
            .bind(mtime)
            .bind(now)
            .execute(&mut *conn)
            .await?;
            Ok(UpsertOutcome::Updated { invalidated_checksum: checksum.is_some() })
        }
    }
}

async fn apply_checksum(conn: &mut SqliteConnection, u: &ChecksumUpdate) -> IndexResult<bool> {
    let res = sqlx::query(
        "UPDATE files SET checksum = ?1 WHERE path = ?2 AND filename = ?3 AND size = ?4 AND modified_at = ?5",
    )
    .bind(u.checksum.as_str())
    .bind(&u.path)
    .bind(&u.filename)
    .bind(u.size as i64)
    .bind(to_micros(&u.modified_at))
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() > 0)
}

fn push_duplicate_filters(qb: &mut QueryBuilder<'_, Sqlite>, q: &DuplicateQuery) {
    qb.push(" WHERE checksum IS NOT NULL");
    if let Some(min) = q.min_size {
        qb.push(" AND size >= ").push_bind(min as i64);
    }
    if let Some(max) = q.max_size {
        qb.push(" AND size <= ").push_bind(max as i64);
    }
    if let Some(p) = &q.path_pattern {
        qb.push(" AND path GLOB ").push_bind(p.clone());
    }
    if let Some(p) = &q.filename_pattern {
        qb.push(" AND filename GLOB ").push_bind(p.clone());
    }
}

fn push_search_filters(qb: &mut QueryBuilder<'_, Sqlite>, q: &SearchQuery) {
    qb.push(" WHERE 1=1");
    if let Some(p) = &q.filename_pattern {
        qb.push(" AND filename GLOB ").push_bind(p.clone());
    }
    if let Some(p) = &q.path_pattern {
        qb.push(" AND path GLOB ").push_bind(p.clone());
    }
    if let Some(c) = &q.checksum {
        qb.push(" AND checksum = ").push_bind(c.as_str().to_string());
    }
    match q.has_checksum {
        Some(true) => {
            qb.push(" AND checksum IS NOT NULL");
        }
        Some(false) => {
            qb.push(" AND checksum IS NULL");
        }
        None => {}
    }
    if let Some(min) = q.min_size {
        qb.push(" AND size >= ").push_bind(min as i64);
    }
    if let Some(max) = q.max_size {
        qb.push(" AND size <= ").push_bind(max as i64);
    }
    if let Some(t) = &q.modified_after {
        qb.push(" AND modified_at >= ").push_bind(to_micros(t));
    }
    if let Some(t) = &q.modified_before {
        qb.push(" AND modified_at <= ").push_bind(to_micros(t));
    }
}

fn sql_limit(limit: Option<usize>) -> i64 {
    // SQLite treats a negative LIMIT as unlimited.
    limit.map(|l| l as i64).unwrap_or(-1)
}

#[async_trait]
impl InventoryStore for SqliteInventory {
    async fn upsert(&self, file: &ScannedFile) -> IndexResult<UpsertOutcome> {
        let mut conn = self.pool.acquire().await?;
        upsert_one(&mut conn, file, to_micros(&Utc::now())).await
    }

    async fn upsert_batch(&self, files: &[ScannedFile]) -> IndexResult<UpsertSummary> {
        let mut summary = UpsertSummary::default();
        if files.is_empty() {
            return Ok(summary);
        }
        let now = to_micros(&Utc::now());
        let mut tx = self.pool.begin().await?;
        for file in files {
            summary.record(upsert_one(&mut tx, file, now).await?);
        }
        tx.commit().await?;
        Ok(summary)
    }

    async fn record_directories(&self, dirs: &[String]) -> IndexResult<()> {
        if dirs.is_empty() {
            return Ok(());
        }
        let now = to_micros(&Utc::now());
        let mut tx = self.pool.begin().await?;
        for chunk in dirs.chunks(SQLITE_MAX_VARS / DIR_BINDS_PER_ROW) {
            let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO directories (path, indexed_at) ");
            qb.push_values(chunk, |mut b, d| {
                b.push_bind(d.clone()).push_bind(now);
            });
            qb.push(" ON CONFLICT(path) DO UPDATE SET indexed_at = excluded.indexed_at");
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, path: &str, filename: &str) -> IndexResult<Option<FileRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM files WHERE path = ?1 AND filename = ?2", FILE_COLUMNS))
            .bind(path)
            .bind(filename)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn counts_by_size(&self) -> IndexResult<Vec<SizeBucket>> {
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            r#"SELECT size, COUNT(*) AS total,
                      SUM(CASE WHEN checksum IS NULL THEN 1 ELSE 0 END) AS missing
               FROM files GROUP BY size ORDER BY size"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(size, total, missing)| SizeBucket {
                size: size.max(0) as u64,
                total: total.max(0) as u64,
                missing: missing.max(0) as u64,
            })
            .collect())
    }

    async fn get_by_size_bucket(&self, size: u64) -> IndexResult<Vec<FileRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM files WHERE size = ?1 ORDER BY path, filename",
            FILE_COLUMNS
        ))
        .bind(size as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn list_missing_checksum_candidates(
        &self,
        size_threshold: u64,
        skip_empty: bool,
    ) -> IndexResult<Vec<FileRecord>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM files", FILE_COLUMNS));
        qb.push(
            " WHERE checksum IS NULL AND size IN (SELECT size FROM files GROUP BY size HAVING COUNT(*) >= 2)",
        );
        if skip_empty {
            qb.push(" AND size > 0");
        }
        if size_threshold > 0 {
            qb.push(" AND size <= ").push_bind(size_threshold as i64);
        }
        qb.push(" ORDER BY size, path, filename");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn set_checksum(&self, update: &ChecksumUpdate) -> IndexResult<bool> {
        let mut conn = self.pool.acquire().await?;
        apply_checksum(&mut conn, update).await
    }

    async fn set_checksums(&self, updates: &[ChecksumUpdate]) -> IndexResult<u64> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut applied = 0u64;
        for u in updates {
            if apply_checksum(&mut tx, u).await? {
                applied += 1;
            }
        }
        tx.commit().await?;
        Ok(applied)
    }

    async fn list_distinct_directories(&self) -> IndexResult<Vec<String>> {
        let dirs: Vec<String> = sqlx::query_scalar("SELECT DISTINCT path FROM files ORDER BY path")
            .fetch_all(&self.pool)
            .await?;
        Ok(dirs)
    }

    async fn list_directory(&self, dir: &str) -> IndexResult<Vec<FileRecord>> {
        let rows = sqlx::query(&format!("SELECT {} FROM files WHERE path = ?1 ORDER BY filename", FILE_COLUMNS))
            .bind(dir)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn count_by_path_prefix(&self, prefix: &str) -> IndexResult<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM files WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2",
        )
        .bind(prefix)
        .bind(child_prefix(prefix))
        .fetch_one(&self.pool)
        .await?;
        Ok(n.max(0) as u64)
    }

    async fn delete_by_path_prefix(&self, prefix: &str) -> IndexResult<u64> {
        let below = child_prefix(prefix);
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query("DELETE FROM files WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2")
            .bind(prefix)
            .bind(&below)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM directories WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2")
            .bind(prefix)
            .bind(&below)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(res.rows_affected())
    }

    async fn delete_by_exact_path(&self, path: &str, filename: &str) -> IndexResult<bool> {
        let res = sqlx::query("DELETE FROM files WHERE path = ?1 AND filename = ?2")
            .bind(path)
            .bind(filename)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_empty_directories(&self) -> IndexResult<Vec<String>> {
        let dirs: Vec<String> = sqlx::query_scalar(
            r#"SELECT d.path FROM directories d
               WHERE NOT EXISTS (
                   SELECT 1 FROM files f
                   WHERE f.path = d.path
                      OR substr(f.path, 1, length(CASE WHEN substr(d.path, -1) = ?1 THEN d.path ELSE d.path || ?1 END))
                         = (CASE WHEN substr(d.path, -1) = ?1 THEN d.path ELSE d.path || ?1 END)
               )
               ORDER BY d.path"#,
        )
        .bind(MAIN_SEPARATOR_STR)
        .fetch_all(&self.pool)
        .await?;
        Ok(dirs)
    }

    async fn delete_directories(&self, dirs: &[String]) -> IndexResult<u64> {
        if dirs.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;
        for d in dirs {
            removed += sqlx::query("DELETE FROM directories WHERE path = ?1")
                .bind(d)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn group_by_checksum(&self, query: &DuplicateQuery) -> IndexResult<DuplicatePage> {
        let min_members = query.min_group_size.max(2) as i64;

        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM (SELECT 1 FROM files");
        push_duplicate_filters(&mut count_qb, query);
        count_qb.push(" GROUP BY checksum, size HAVING COUNT(*) >= ").push_bind(min_members).push(")");
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut page_qb = QueryBuilder::<Sqlite>::new("SELECT checksum, size, COUNT(*) AS member_count FROM files");
        push_duplicate_filters(&mut page_qb, query);
        page_qb
            .push(" GROUP BY checksum, size HAVING COUNT(*) >= ")
            .push_bind(min_members)
            .push(" ORDER BY member_count DESC, size DESC, checksum ASC LIMIT ")
            .push_bind(sql_limit(query.limit))
            .push(" OFFSET ")
            .push_bind(query.offset as i64);
        let keys: Vec<(String, i64, i64)> = page_qb.build_query_as().fetch_all(&self.pool).await?;

        let mut groups = Vec::with_capacity(keys.len());
        for (checksum, size, _) in keys {
            let mut member_qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM files", FILE_COLUMNS));
            push_duplicate_filters(&mut member_qb, query);
            member_qb
                .push(" AND checksum = ")
                .push_bind(checksum.clone())
                .push(" AND size = ")
                .push_bind(size)
                .push(" ORDER BY path, filename");
            let rows = member_qb.build().fetch_all(&self.pool).await?;
            let files = rows.iter().map(row_to_record).collect::<IndexResult<Vec<_>>>()?;
            groups.push(DuplicateGroup { checksum: Checksum::new(checksum), size: size.max(0) as u64, files });
        }

        Ok(DuplicatePage { groups, total_groups: total.max(0) as u64 })
    }

    async fn search(&self, query: &SearchQuery) -> IndexResult<SearchPage> {
        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM files");
        push_search_filters(&mut count_qb, query);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM files", FILE_COLUMNS));
        push_search_filters(&mut qb, query);
        qb.push(" ORDER BY modified_at DESC, path, filename LIMIT ")
            .push_bind(sql_limit(query.limit))
            .push(" OFFSET ")
            .push_bind(query.offset as i64);
        let rows = qb.build().fetch_all(&self.pool).await?;
        let files = rows.iter().map(row_to_record).collect::<IndexResult<Vec<_>>>()?;
        Ok(SearchPage { files, total: total.max(0) as u64 })
    }

    async fn count_files(&self) -> IndexResult<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files").fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }

    async fn stats(&self) -> IndexResult<InventoryStats> {
        let (total, size, with_checksum, largest, smallest, newest, oldest, last_indexed): (
            i64,
            i64,
            i64,
            i64,
            i64,
            Option<i64>,
            Option<i64>,
            Option<i64>,
        ) = sqlx::query_as(
            r#"SELECT COUNT(*), COALESCE(SUM(size), 0), COUNT(checksum),
                      COALESCE(MAX(size), 0), COALESCE(MIN(size), 0),
                      MAX(modified_at), MIN(modified_at), MAX(indexed_at)
               FROM files"#,
        )
        .fetch_one(&self.pool)
        .await?;

        let (groups, dup_files, wasted): (i64, i64, i64) = sqlx::query_as(
            r#"SELECT COUNT(*), COALESCE(SUM(n), 0), COALESCE(SUM((n - 1) * size), 0)
               FROM (SELECT size, COUNT(*) AS n FROM files
                     WHERE checksum IS NOT NULL
                     GROUP BY checksum, size HAVING COUNT(*) > 1)"#,
        )
        .fetch_one(&self.pool)
        .await?;

        let dirs: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT path) FROM files").fetch_one(&self.pool).await?;

        Ok(InventoryStats {
            total_files: total.max(0) as u64,
            total_size: size.max(0) as u64,
            files_with_checksum: with_checksum.max(0) as u64,
            files_without_checksum: (total - with_checksum).max(0) as u64,
            duplicate_groups: groups.max(0) as u64,
            duplicate_files: dup_files.max(0) as u64,
            wasted_bytes: wasted.max(0) as u64,
            unique_directories: dirs.max(0) as u64,
            largest_file_size: largest.max(0) as u64,
            smallest_file_size: smallest.max(0) as u64,
            newest_modification: newest.map(from_micros),
            oldest_modification: oldest.map(from_micros),
            last_indexed: last_indexed.map(from_micros),
        })
    }
}
