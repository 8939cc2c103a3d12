//! Error types for freshness metadata persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while reading or writing freshness metadata.
///
/// None of these are fatal to a transfer: the data file is the source of
/// truth and callers log the failure and move on.
#[derive(Debug, Error)]
pub enum FreshnessError {
    /// File system error on a sidecar path.
    #[error("IO error on metadata file {path}: {source}")]
    Io {
        /// Sidecar path involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Sidecar content could not be encoded or decoded.
    #[error("malformed metadata in {path}: {source}")]
    Serialize {
        /// Sidecar path involved.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// Embedded database failure.
    #[error("metadata database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl FreshnessError {
    /// Creates an IO error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a serialization error for `path`.
    pub fn serialize(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialize {
            path: path.into(),
            source,
        }
    }
}
