use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{migrate::MigrateDatabase, Sqlite, SqlitePool};
use tracing::info;

use crate::error::{IndexError, IndexResult};
use crate::hasher::ChecksumAlgorithm;

const META_ALGORITHM: &str = "checksum_algorithm";

/// Opens (creating if needed) the SQLite database and applies the schema.
///
/// In-memory URLs get a single connection, since every SQLite memory
/// connection is its own database.
pub async fn connect(url: &str) -> IndexResult<SqlitePool> {
    let in_memory = url.contains(":memory:") || url.contains("mode=memory");
    if !in_memory && !Sqlite::database_exists(url).await.unwrap_or(false) {
        info!("Creating SQLite database at {}", url);
        Sqlite::create_database(url).await?;
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 4 })
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                let _ = sqlx::query("PRAGMA busy_timeout=10000;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA cache_size=-65536;").execute(&mut *conn).await; // ~64MB page cache
                let _ = sqlx::query("PRAGMA temp_store=MEMORY;").execute(&mut *conn).await;
                Ok(())
            })
        })
        .connect(url)
        .await?;
    init_db(&pool).await?;
    Ok(pool)
}

pub async fn init_db(pool: &SqlitePool) -> IndexResult<()> {
    if let Err(e) = sqlx::query("PRAGMA journal_mode=WAL;").execute(pool).await {
        tracing::warn!("Failed to set WAL journal mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA synchronous=NORMAL;").execute(pool).await {
        tracing::warn!("Failed to set synchronous mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA busy_timeout=10000;").execute(pool).await {
        tracing::warn!("Failed to set busy_timeout: {}", e);
    }

    // files: one row per indexed file; `path` is the absolute parent directory
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS files (
            path TEXT NOT NULL,
            filename TEXT NOT NULL,
            checksum TEXT NULL,
            size INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            indexed_at INTEGER NOT NULL,
            PRIMARY KEY (path, filename)
        )"#,
    )
    .execute(pool)
    .await?;

    // directories: bookkeeping for every directory visited by a scan
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS directories (
            path TEXT PRIMARY KEY,
            indexed_at INTEGER NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        ("idx_files_checksum_size", "CREATE INDEX IF NOT EXISTS idx_files_checksum_size ON files(checksum, size)"),
        ("idx_files_size", "CREATE INDEX IF NOT EXISTS idx_files_size ON files(size)"),
        ("idx_files_path", "CREATE INDEX IF NOT EXISTS idx_files_path ON files(path)"),
        ("idx_files_modified", "CREATE INDEX IF NOT EXISTS idx_files_modified ON files(modified_at DESC)"),
    ];
    for (name, query) in indexes {
        if let Err(e) = sqlx::query(query).execute(pool).await {
            tracing::warn!("Failed to create index {}: {}", name, e);
        }
    }

    Ok(())
}

/// Pins the inventory to one checksum algorithm.
///
/// The first caller records its algorithm; later callers must match it,
/// otherwise checksums from different digests would be compared.
pub async fn ensure_algorithm(pool: &SqlitePool, algorithm: ChecksumAlgorithm) -> IndexResult<()> {
    let stored: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?1")
        .bind(META_ALGORITHM)
        .fetch_optional(pool)
        .await?;
    match stored {
        Some(s) if s == algorithm.as_str() => Ok(()),
        Some(s) => {
            let with_checksum: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE checksum IS NOT NULL")
                .fetch_one(pool)
                .await?;
            if with_checksum > 0 {
                return Err(IndexError::AlgorithmMismatch { stored: s, configured: algorithm.to_string() });
            }
            // Nothing hashed yet, so switching is free.
            sqlx::query("UPDATE meta SET value = ?2 WHERE key = ?1")
                .bind(META_ALGORITHM)
                .bind(algorithm.as_str())
                .execute(pool)
                .await?;
            Ok(())
        }
        None => {
            sqlx::query("INSERT INTO meta (key, value) VALUES (?1, ?2)")
                .bind(META_ALGORITHM)
                .bind(algorithm.as_str())
                .execute(pool)
                .await?;
            Ok(())
        }
    }
}
