//! Embedded SQLite backend: all records of a cache root in one database.
//!
//! Used when many small files make per-file sidecars noisy. Rows are keyed
//! by `(tenant_folder, file_name)` so several tenants can share a database.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::{debug, instrument};

use super::{FreshnessError, FreshnessRecord, FreshnessStore, ResumeMarker};

/// Maximum number of connections in the pool.
/// Kept low for SQLite since it uses file-level locking.
const MAX_CONNECTIONS: u32 = 4;

/// SQLite busy timeout in milliseconds.
const BUSY_TIMEOUT_MS: u32 = 5000;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS freshness_records (
        tenant_folder TEXT NOT NULL,
        file_name TEXT NOT NULL,
        tenant TEXT NOT NULL,
        version_tag TEXT,
        last_modified_time INTEGER,
        saved_at TEXT NOT NULL,
        PRIMARY KEY (tenant_folder, file_name)
    )",
    "CREATE TABLE IF NOT EXISTS resume_markers (
        tenant_folder TEXT NOT NULL,
        file_name TEXT NOT NULL,
        version_tag TEXT,
        bytes_on_disk INTEGER NOT NULL,
        saved_at TEXT NOT NULL,
        PRIMARY KEY (tenant_folder, file_name)
    )",
];

/// Database-backed freshness store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns [`FreshnessError::Database`] if the connection or schema
    /// setup fails.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn open(db_path: &Path) -> Result<Self, FreshnessError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        Self::with_pool(pool).await
    }

    /// Creates an in-memory database, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns [`FreshnessError::Database`] if the connection fails.
    pub async fn in_memory() -> Result<Self, FreshnessError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, FreshnessError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        debug!("freshness schema ready");
        Ok(Self { pool })
    }
}

fn folder_key(tenant_folder: &Path) -> String {
    tenant_folder.to_string_lossy().into_owned()
}

fn parse_saved_at(raw: &str) -> Result<DateTime<Utc>, FreshnessError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FreshnessError::Database(sqlx::Error::Decode(Box::new(e))))
}

fn record_from_row(row: &SqliteRow) -> Result<FreshnessRecord, FreshnessError> {
    let saved_at: String = row.try_get("saved_at")?;
    Ok(FreshnessRecord {
        file_name: row.try_get("file_name")?,
        tenant: row.try_get("tenant")?,
        version_tag: row.try_get("version_tag")?,
        last_modified_time: row.try_get("last_modified_time")?,
        saved_at: parse_saved_at(&saved_at)?,
    })
}

fn marker_from_row(row: &SqliteRow) -> Result<ResumeMarker, FreshnessError> {
    let saved_at: String = row.try_get("saved_at")?;
    let bytes: i64 = row.try_get("bytes_on_disk")?;
    Ok(ResumeMarker {
        version_tag: row.try_get("version_tag")?,
        bytes_on_disk: u64::try_from(bytes).unwrap_or(0),
        saved_at: parse_saved_at(&saved_at)?,
    })
}

#[async_trait]
impl FreshnessStore for SqliteStore {
    async fn read(
        &self,
        file_name: &str,
        tenant_folder: &Path,
    ) -> Result<Option<FreshnessRecord>, FreshnessError> {
        let row = sqlx::query(
            "SELECT file_name, tenant, version_tag, last_modified_time, saved_at
             FROM freshness_records WHERE tenant_folder = ? AND file_name = ?",
        )
        .bind(folder_key(tenant_folder))
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn write(
        &self,
        tenant_folder: &Path,
        record: &FreshnessRecord,
    ) -> Result<(), FreshnessError> {
        sqlx::query(
            "INSERT INTO freshness_records
                (tenant_folder, file_name, tenant, version_tag, last_modified_time, saved_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (tenant_folder, file_name) DO UPDATE SET
                tenant = excluded.tenant,
                version_tag = excluded.version_tag,
                last_modified_time = excluded.last_modified_time,
                saved_at = excluded.saved_at",
        )
        .bind(folder_key(tenant_folder))
        .bind(&record.file_name)
        .bind(&record.tenant)
        .bind(record.version_tag.as_deref())
        .bind(record.last_modified_time)
        .bind(record.saved_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, file_name: &str, tenant_folder: &Path) -> Result<(), FreshnessError> {
        sqlx::query("DELETE FROM freshness_records WHERE tenant_folder = ? AND file_name = ?")
            .bind(folder_key(tenant_folder))
            .bind(file_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn read_resume(
        &self,
        file_name: &str,
        tenant_folder: &Path,
    ) -> Result<Option<ResumeMarker>, FreshnessError> {
        let row = sqlx::query(
            "SELECT version_tag, bytes_on_disk, saved_at
             FROM resume_markers WHERE tenant_folder = ? AND file_name = ?",
        )
        .bind(folder_key(tenant_folder))
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(marker_from_row).transpose()
    }

    async fn write_resume(
        &self,
        file_name: &str,
        tenant_folder: &Path,
        marker: &ResumeMarker,
    ) -> Result<(), FreshnessError> {
        sqlx::query(
            "INSERT INTO resume_markers
                (tenant_folder, file_name, version_tag, bytes_on_disk, saved_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (tenant_folder, file_name) DO UPDATE SET
                version_tag = excluded.version_tag,
                bytes_on_disk = excluded.bytes_on_disk,
                saved_at = excluded.saved_at",
        )
        .bind(folder_key(tenant_folder))
        .bind(file_name)
        .bind(marker.version_tag.as_deref())
        .bind(i64::try_from(marker.bytes_on_disk).unwrap_or(i64::MAX))
        .bind(marker.saved_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_resume(
        &self,
        file_name: &str,
        tenant_folder: &Path,
    ) -> Result<(), FreshnessError> {
        sqlx::query("DELETE FROM resume_markers WHERE tenant_folder = ? AND file_name = ?")
            .bind(folder_key(tenant_folder))
            .bind(file_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
