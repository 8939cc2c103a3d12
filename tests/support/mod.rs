//! Shared fixtures for integration tests: socket guards, a range-aware
//! wiremock responder, and a raw server that cuts bodies short.

#![allow(dead_code)]

pub mod range_responder;
pub mod socket_guard;
pub mod truncating_server;

use std::path::Path;
use std::sync::Arc;

use packsync_core::{
    DownloadRequest, FileWorkItem, FreshnessStore, HttpClient, ResumableDownloader, SidecarStore,
};

pub const TENANT: &str = "acme";
pub const TOKEN: &str = "test-token";

/// Deterministic, non-repeating-looking payload of `len` bytes.
#[must_use]
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

#[must_use]
pub fn request(file_query_url: String, tenant_folder: &Path, file_name: &str) -> DownloadRequest {
    DownloadRequest {
        item: FileWorkItem::new(file_name),
        tenant: TENANT.to_string(),
        tenant_folder: tenant_folder.to_path_buf(),
        token: TOKEN.to_string(),
        file_query_url,
        rate: 0,
    }
}

#[must_use]
pub fn sidecar_downloader() -> (ResumableDownloader, Arc<dyn FreshnessStore>) {
    let store: Arc<dyn FreshnessStore> = Arc::new(SidecarStore::new());
    let downloader =
        ResumableDownloader::new(HttpClient::new_with_timeouts(5, 5), Arc::clone(&store));
    (downloader, store)
}
