//! Error types for the download module.
//!
//! Every variant carries the URL or path it concerns, so a log line is
//! actionable on its own.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while transferring one file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS, reset).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before headers arrived or between body reads.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Server answered with a non-success status.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Server rejected the bearer token (401/403).
    #[error("[AUTH] HTTP {status} downloading {url}: token rejected")]
    Unauthorized {
        /// The URL that was refused.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Success status but no body bytes.
    #[error("empty response body downloading {url}")]
    EmptyBody {
        /// The URL that returned nothing.
        url: String,
    },

    /// File system error while writing the target.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file-query endpoint or file name does not form a valid URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// On-disk length differs from the declared content length.
    #[error("incomplete transfer of {path}: expected {expected_bytes} bytes, got {actual_bytes}")]
    Incomplete {
        /// Target path.
        path: PathBuf,
        /// Declared total size.
        expected_bytes: u64,
        /// Size on disk.
        actual_bytes: u64,
    },

    /// Every allowed attempt ended incomplete.
    #[error("{file} still incomplete after {attempts} attempts ({bytes_on_disk} bytes on disk)")]
    RetriesExhausted {
        /// File name.
        file: String,
        /// Attempts made.
        attempts: u32,
        /// Partial length left for the next cycle.
        bytes_on_disk: u64,
    },

    /// The task running the transfer panicked or was aborted.
    #[error("transfer task for {file} ended abnormally: {reason}")]
    TaskFailed {
        /// File name.
        file: String,
        /// Join failure description.
        reason: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates an HTTP status error, promoting auth refusals.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        if matches!(status, 401 | 403) {
            Self::Unauthorized {
                url: url.into(),
                status,
            }
        } else {
            Self::HttpStatus {
                url: url.into(),
                status,
            }
        }
    }

    /// Creates an empty-body error.
    pub fn empty_body(url: impl Into<String>) -> Self {
        Self::EmptyBody { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a length mismatch error.
    pub fn incomplete(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Incomplete {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a task failure error from a join failure.
    pub fn task_failed(file: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::TaskFailed {
            file: file.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the next attempt may succeed by resuming from the bytes on
    /// disk (truncated body, dropped connection mid-stream).
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::Incomplete { .. } | Self::Network { .. } | Self::Timeout { .. }
        )
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs the
// URL or path for context, which the source errors don't carry.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_promotes_auth_codes() {
        assert!(matches!(
            DownloadError::http_status("https://x/f", 401),
            DownloadError::Unauthorized { status: 401, .. }
        ));
        assert!(matches!(
            DownloadError::http_status("https://x/f", 403),
            DownloadError::Unauthorized { status: 403, .. }
        ));
        assert!(matches!(
            DownloadError::http_status("https://x/f", 500),
            DownloadError::HttpStatus { status: 500, .. }
        ));
    }

    #[test]
    fn test_display_carries_context() {
        let msg = DownloadError::http_status("https://files.example.com/d", 404).to_string();
        assert!(msg.contains("404"), "{msg}");
        assert!(msg.contains("https://files.example.com/d"), "{msg}");

        let msg = DownloadError::incomplete("/cache/a.mmpk", 100, 40).to_string();
        assert!(msg.contains("/cache/a.mmpk"), "{msg}");
        assert!(msg.contains("100") && msg.contains("40"), "{msg}");
    }

    #[test]
    fn test_unauthorized_has_auth_prefix() {
        let msg = DownloadError::http_status("https://x/f", 401).to_string();
        assert!(msg.starts_with("[AUTH]"), "{msg}");
    }

    #[test]
    fn test_resumable_classification() {
        assert!(DownloadError::incomplete("/a", 2, 1).is_resumable());
        assert!(DownloadError::Timeout { url: "u".into() }.is_resumable());
        assert!(!DownloadError::http_status("u", 500).is_resumable());
        assert!(!DownloadError::empty_body("u").is_resumable());
        assert!(!DownloadError::invalid_url("u").is_resumable());
        assert!(!DownloadError::task_failed("a.mmpk", "panicked").is_resumable());
    }
}
