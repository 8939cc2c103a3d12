//! Resumable, throttled HTTP transfer of data packages.
//!
//! This module moves one file at a time from a tenant's file-query endpoint
//! into its cache folder.
//!
//! # Features
//!
//! - Streaming writes in 8 KiB pieces under a per-task byte-rate cap
//! - Resume from the on-disk offset via `Range` requests
//! - Remote version re-validation before appending to a partial file
//! - Bounded retries with linear backoff for short transfers
//! - Freshness short-circuit (locked or up-to-date files are never fetched)
//! - Cooperative cancellation at every chunk and every sleep
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use packsync_core::download::{
//!     DownloadRequest, FileWorkItem, HttpClient, ResumableDownloader,
//! };
//! use packsync_core::freshness::SidecarStore;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let downloader = ResumableDownloader::new(HttpClient::new(), Arc::new(SidecarStore::new()));
//! let request = DownloadRequest {
//!     item: FileWorkItem::new("IllinoisWater.mmpk"),
//!     tenant: "acme".into(),
//!     tenant_folder: "/var/cache/packsync/acme".into(),
//!     token: "bearer-token".into(),
//!     file_query_url: "https://files.example.com/download".into(),
//!     rate: 583_333,
//! };
//! let outcome = downloader.download(&request, &CancellationToken::new()).await;
//! println!("{}", outcome.label());
//! # }
//! ```

mod client;
mod constants;
mod downloader;
mod error;
mod headers;
mod retry;
mod throttle;

pub use client::HttpClient;
pub use constants::{CHUNK_SIZE, CONNECT_TIMEOUT_SECS, DEFAULT_MAX_ATTEMPTS, READ_TIMEOUT_SECS};
pub use downloader::{
    DownloadOutcome, DownloadProgressState, DownloadRequest, FileWorkItem, ResumableDownloader,
    SkipReason,
};
pub use error::DownloadError;
pub use headers::{ContentRange, ResponseMeta, parse_version_tag, timestamp_to_system_time};
pub use retry::{ResumeDecision, ResumePolicy};
pub use throttle::{StreamEnd, Throttle, WriteReport, write_throttled};

// Note: no module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
