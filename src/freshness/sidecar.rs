//! JSON sidecar backend: one metadata file next to each data file.
//!
//! Layout inside a tenant folder:
//! - `IllinoisWater.mmpk` - data file
//! - `IllinoisWater.mmpk.json` - [`FreshnessRecord`]
//! - `IllinoisWater.mmpk.resume.json` - [`ResumeMarker`], only while partial

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::{FreshnessError, FreshnessRecord, FreshnessStore, ResumeMarker};

const RECORD_SUFFIX: &str = ".json";
const RESUME_SUFFIX: &str = ".resume.json";

/// Flat-file freshness store.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarStore;

impl SidecarStore {
    /// Creates a sidecar store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Derives the sidecar path of a data file.
///
/// Keyed by the full file name, so `water.mmpk` and `water.vtpk` in the same
/// folder never share a record:
/// - `water.mmpk` → `water.mmpk.json`
/// - `layers.json` → `layers.json.json`
#[must_use]
pub fn sidecar_path(tenant_folder: &Path, file_name: &str) -> PathBuf {
    tenant_folder.join(format!("{file_name}{RECORD_SUFFIX}"))
}

/// Derives the resume-marker path of a data file.
#[must_use]
pub fn resume_path(tenant_folder: &Path, file_name: &str) -> PathBuf {
    tenant_folder.join(format!("{file_name}{RESUME_SUFFIX}"))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, FreshnessError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(FreshnessError::io(path, e)),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| FreshnessError::serialize(path, e))
}

/// Writes `value` to a temporary sibling and renames it into place, so a
/// crash never leaves a half-written sidecar behind.
async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), FreshnessError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| FreshnessError::serialize(path, e))?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|e| FreshnessError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(FreshnessError::io(path, e));
    }
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<(), FreshnessError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FreshnessError::io(path, e)),
    }
}

#[async_trait]
impl FreshnessStore for SidecarStore {
    #[instrument(level = "debug", skip(self, tenant_folder))]
    async fn read(
        &self,
        file_name: &str,
        tenant_folder: &Path,
    ) -> Result<Option<FreshnessRecord>, FreshnessError> {
        let path = sidecar_path(tenant_folder, file_name);
        let record: Option<FreshnessRecord> = read_json(&path).await?;
        // A record naming another file says nothing about this one.
        Ok(record.filter(|record| {
            let matches = record.file_name == file_name;
            if !matches {
                debug!(
                    path = %path.display(),
                    recorded = %record.file_name,
                    "ignoring foreign sidecar"
                );
            }
            matches
        }))
    }

    #[instrument(level = "debug", skip(self, tenant_folder, record), fields(file = %record.file_name))]
    async fn write(
        &self,
        tenant_folder: &Path,
        record: &FreshnessRecord,
    ) -> Result<(), FreshnessError> {
        let path = sidecar_path(tenant_folder, &record.file_name);
        write_json(&path, record).await?;
        debug!(path = %path.display(), "freshness sidecar written");
        Ok(())
    }

    async fn remove(&self, file_name: &str, tenant_folder: &Path) -> Result<(), FreshnessError> {
        remove_if_present(&sidecar_path(tenant_folder, file_name)).await
    }

    async fn read_resume(
        &self,
        file_name: &str,
        tenant_folder: &Path,
    ) -> Result<Option<ResumeMarker>, FreshnessError> {
        read_json(&resume_path(tenant_folder, file_name)).await
    }

    async fn write_resume(
        &self,
        file_name: &str,
        tenant_folder: &Path,
        marker: &ResumeMarker,
    ) -> Result<(), FreshnessError> {
        write_json(&resume_path(tenant_folder, file_name), marker).await
    }

    async fn clear_resume(
        &self,
        file_name: &str,
        tenant_folder: &Path,
    ) -> Result<(), FreshnessError> {
        remove_if_present(&resume_path(tenant_folder, file_name)).await
    }
}
