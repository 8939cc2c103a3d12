//! Freshness metadata: proof that a file was already fetched at a known
//! remote version.
//!
//! A [`FreshnessRecord`] is written after every verified-complete download
//! and read before the next one, so unchanged files are not transferred
//! again. While a file is partial a [`ResumeMarker`] remembers which remote
//! version the on-disk bytes belong to, so a resumed range is never
//! appended to bytes of a different version.
//!
//! Storage sits behind the [`FreshnessStore`] trait. Two backends exist:
//! - [`SidecarStore`] - one JSON file next to each data file (default)
//! - [`SqliteStore`] - one embedded database per cache root

mod error;
mod sidecar;
mod sqlite;

use std::fmt::Debug;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use error::FreshnessError;
pub use sidecar::SidecarStore;
pub use sqlite::SqliteStore;

/// Persisted proof of a completed download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessRecord {
    /// Data file name inside the tenant folder.
    pub file_name: String,
    /// Tenant the file belongs to.
    pub tenant: String,
    /// Remote version tag (`ETag`) at download time.
    pub version_tag: Option<String>,
    /// Raw server last-modified value (seconds or milliseconds since epoch).
    pub last_modified_time: Option<i64>,
    /// When the record was written.
    pub saved_at: DateTime<Utc>,
}

impl FreshnessRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        file_name: impl Into<String>,
        tenant: impl Into<String>,
        version_tag: Option<String>,
        last_modified_time: Option<i64>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            tenant: tenant.into(),
            version_tag,
            last_modified_time,
            saved_at: Utc::now(),
        }
    }
}

/// Remote version of the bytes currently sitting in a partial file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeMarker {
    /// Version tag of the response the partial bytes came from.
    pub version_tag: Option<String>,
    /// Partial length on disk when the marker was written.
    pub bytes_on_disk: u64,
    /// When the marker was written.
    pub saved_at: DateTime<Utc>,
}

impl ResumeMarker {
    /// Creates a marker stamped with the current time.
    #[must_use]
    pub fn new(version_tag: Option<String>, bytes_on_disk: u64) -> Self {
        Self {
            version_tag,
            bytes_on_disk,
            saved_at: Utc::now(),
        }
    }
}

/// Backing store for freshness records and resume markers.
///
/// Implementations must tolerate concurrent calls for *different* file
/// names; a single file name is only ever handled by one task at a time.
#[async_trait]
pub trait FreshnessStore: Send + Sync + Debug {
    /// Reads the record for `file_name`, if one exists.
    async fn read(
        &self,
        file_name: &str,
        tenant_folder: &Path,
    ) -> Result<Option<FreshnessRecord>, FreshnessError>;

    /// Persists `record`, replacing any previous record for the same file.
    async fn write(
        &self,
        tenant_folder: &Path,
        record: &FreshnessRecord,
    ) -> Result<(), FreshnessError>;

    /// Removes the record for `file_name`. Missing records are not an error.
    async fn remove(&self, file_name: &str, tenant_folder: &Path) -> Result<(), FreshnessError>;

    /// Reads the resume marker for a partial `file_name`.
    async fn read_resume(
        &self,
        file_name: &str,
        tenant_folder: &Path,
    ) -> Result<Option<ResumeMarker>, FreshnessError>;

    /// Persists the resume marker for a partial `file_name`.
    async fn write_resume(
        &self,
        file_name: &str,
        tenant_folder: &Path,
        marker: &ResumeMarker,
    ) -> Result<(), FreshnessError>;

    /// Removes the resume marker. Missing markers are not an error.
    async fn clear_resume(&self, file_name: &str, tenant_folder: &Path)
    -> Result<(), FreshnessError>;
}

/// Returns true iff `local_path` exists and its modification time is at or
/// after `server_last_modified`.
#[must_use]
pub fn is_up_to_date(local_path: &Path, server_last_modified: SystemTime) -> bool {
    match std::fs::metadata(local_path).and_then(|m| m.modified()) {
        Ok(local) => local >= server_last_modified,
        Err(_) => false,
    }
}

/// Returns true when another process holds `path` open with an exclusive
/// lock (or the OS refuses to open it for writing).
///
/// A missing file is never locked.
#[must_use]
pub fn is_file_locked(path: &Path) -> bool {
    let file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return false,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot open file for writing, treating as locked");
            return true;
        }
    };

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "file is locked by another process");
            true
        }
    }
}

/// Sets the modification time of `path` to `modified`.
///
/// # Errors
///
/// Returns the underlying IO error if the timestamp cannot be applied.
pub fn set_modified(path: &Path, modified: SystemTime) -> std::io::Result<()> {
    filetime::set_file_mtime(path, FileTime::from_system_time(modified))
}
