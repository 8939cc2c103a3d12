//! Error types for one tenant's sync cycle.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort one tenant's cycle. Per-file failures never surface
/// here; they are reported as [`crate::download::DownloadOutcome`]s.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Authentication was refused or returned no token.
    #[error("[AUTH] authentication failed for tenant {tenant}: {reason}")]
    Authentication {
        /// Tenant name.
        tenant: String,
        /// What went wrong.
        reason: String,
    },

    /// The file list could not be fetched or parsed.
    #[error("file discovery failed for tenant {tenant}: {reason}")]
    Discovery {
        /// Tenant name.
        tenant: String,
        /// What went wrong.
        reason: String,
    },

    /// The tenant cache folder could not be created.
    #[error("cannot prepare cache folder {path}: {source}")]
    CacheFolder {
        /// Folder path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The transfer semaphore was closed unexpectedly.
    #[error("transfer semaphore closed unexpectedly")]
    SemaphoreClosed,
}

impl SyncError {
    /// Creates an authentication error.
    pub fn authentication(tenant: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Authentication {
            tenant: tenant.into(),
            reason: reason.into(),
        }
    }

    /// Creates a discovery error.
    pub fn discovery(tenant: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Discovery {
            tenant: tenant.into(),
            reason: reason.into(),
        }
    }

    /// Creates a cache folder error.
    pub fn cache_folder(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CacheFolder {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_display() {
        let msg = SyncError::authentication("acme", "HTTP 401").to_string();
        assert_eq!(msg, "[AUTH] authentication failed for tenant acme: HTTP 401");
    }

    #[test]
    fn test_cache_folder_display_has_path() {
        let err = SyncError::cache_folder(
            "/cache/acme",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(err.to_string().contains("/cache/acme"));
    }
}
