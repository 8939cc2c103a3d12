//! Resumable, throttled transfer of one file into a tenant folder.
//!
//! One call of [`ResumableDownloader::download`] drives a file through:
//!
//! 1. read local state (freshness record, resume marker, bytes on disk)
//! 2. GET with bearer auth, `Range: bytes=<n>-` when a partial exists
//! 3. skip when the local copy is locked or already current
//! 4. re-validate the remote version before appending to a partial
//! 5. stream the body under the per-task rate cap
//! 6. verify the length; resume with linear backoff while short
//! 7. persist the freshness record and stamp the server mtime
//!
//! Every per-file failure ends up in [`DownloadOutcome`]; nothing here
//! returns `Err` to the caller.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use futures_util::{StreamExt, stream};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::client::HttpClient;
use super::error::DownloadError;
use super::headers::ResponseMeta;
use super::retry::{ResumeDecision, ResumePolicy};
use super::throttle::{StreamEnd, Throttle, write_throttled};
use crate::freshness::{
    FreshnessRecord, FreshnessStore, ResumeMarker, is_file_locked, is_up_to_date, set_modified,
};

/// A file to fetch for one tenant, as produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWorkItem {
    /// Remote (and local) file name.
    #[serde(rename = "fileName", alias = "FileName", alias = "filename")]
    pub file_name: String,
    /// Last known modification timestamp, 0 when unknown or first sync.
    #[serde(
        rename = "lastModified",
        alias = "LastModified",
        alias = "lastmodified",
        default
    )]
    pub last_modified: i64,
}

impl FileWorkItem {
    /// Creates a work item with no known modification time.
    #[must_use]
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            last_modified: 0,
        }
    }
}

/// Everything one file transfer needs besides the shared downloader.
#[derive(Clone)]
pub struct DownloadRequest {
    /// The file to fetch.
    pub item: FileWorkItem,
    /// Tenant name, recorded in the freshness record.
    pub tenant: String,
    /// Destination folder, `<cache_root>/<tenant>`.
    pub tenant_folder: PathBuf,
    /// Bearer token from authentication.
    pub token: String,
    /// File-query endpoint of the tenant.
    pub file_query_url: String,
    /// Per-task rate cap in bytes per second.
    pub rate: u64,
}

impl fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadRequest")
            .field("item", &self.item)
            .field("tenant", &self.tenant)
            .field("tenant_folder", &self.tenant_folder)
            .field("token", &"<redacted>")
            .field("file_query_url", &self.file_query_url)
            .field("rate", &self.rate)
            .finish()
    }
}

/// Progress of one file, owned by the task transferring it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgressState {
    /// `<tenant_folder>/<file_name>`.
    pub target: PathBuf,
    /// Partial bytes the current attempt builds on.
    pub existing_bytes: u64,
    /// Version tag of the latest response.
    pub version_tag: Option<String>,
    /// Server last-modified of the latest response.
    pub server_last_modified: Option<SystemTime>,
    /// Requests issued so far.
    pub attempts: u32,
    /// Body bytes written across all attempts.
    pub bytes_written: u64,
}

impl DownloadProgressState {
    fn new(target: PathBuf) -> Self {
        Self {
            target,
            existing_bytes: 0,
            version_tag: None,
            server_last_modified: None,
            attempts: 0,
            bytes_written: 0,
        }
    }
}

/// Why a file was not transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The local copy matches the remote version.
    UpToDate,
    /// Another process holds the local file.
    Locked,
    /// The server answered `304 Not Modified`.
    NotModified,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => f.write_str("up to date"),
            Self::Locked => f.write_str("locked"),
            Self::NotModified => f.write_str("not modified"),
        }
    }
}

/// Terminal result of one file transfer.
#[derive(Debug)]
pub enum DownloadOutcome {
    /// The file is complete on disk.
    Downloaded {
        /// Final path.
        path: PathBuf,
        /// Body bytes written during this call.
        bytes_written: u64,
        /// File size on disk.
        file_size: u64,
        /// Requests issued.
        attempts: u32,
        /// Whether any attempt appended to existing partial bytes.
        resumed: bool,
    },
    /// No body was read.
    Skipped(SkipReason),
    /// The file was abandoned for this cycle.
    Failed(DownloadError),
    /// The cancellation token fired; partial bytes stay on disk.
    Cancelled {
        /// Partial length left for the next run.
        bytes_on_disk: u64,
    },
}

impl DownloadOutcome {
    /// Short label for structured logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Downloaded { .. } => "downloaded",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Returns true for [`DownloadOutcome::Downloaded`].
    #[must_use]
    pub fn is_downloaded(&self) -> bool {
        matches!(self, Self::Downloaded { .. })
    }
}

/// What the store says about the local copy, refreshed as the transfer
/// progresses.
#[derive(Debug, Default)]
struct LocalState {
    record: Option<FreshnessRecord>,
    marker: Option<ResumeMarker>,
    discard_partial: bool,
}

impl LocalState {
    /// A record without a marker proves the on-disk file is complete.
    fn is_complete(&self) -> bool {
        self.record.is_some() && self.marker.is_none()
    }

    fn resume_tag(&self) -> Option<&str> {
        self.marker.as_ref().and_then(|m| m.version_tag.as_deref())
    }
}

/// How one request/response round ended.
enum AttemptEnd {
    Done(DownloadOutcome),
    Incomplete(DownloadError),
    Restart(&'static str),
}

/// Transfers files with resume, throttling, and freshness checks.
///
/// Designed to be wrapped in `Arc` and shared by all transfer tasks of a
/// process; each call owns its own [`DownloadProgressState`].
#[derive(Debug, Clone)]
pub struct ResumableDownloader {
    client: HttpClient,
    store: Arc<dyn FreshnessStore>,
    policy: ResumePolicy,
}

impl ResumableDownloader {
    /// Creates a downloader with the default resume policy.
    #[must_use]
    pub fn new(client: HttpClient, store: Arc<dyn FreshnessStore>) -> Self {
        Self::with_policy(client, store, ResumePolicy::default())
    }

    /// Creates a downloader with a custom resume policy.
    #[must_use]
    pub fn with_policy(
        client: HttpClient,
        store: Arc<dyn FreshnessStore>,
        policy: ResumePolicy,
    ) -> Self {
        Self {
            client,
            store,
            policy,
        }
    }

    /// Returns the freshness store this downloader records into.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn FreshnessStore> {
        &self.store
    }

    /// Transfers one file, resuming and retrying as needed.
    #[instrument(
        skip(self, request, cancel),
        fields(tenant = %request.tenant, file = %request.item.file_name)
    )]
    pub async fn download(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> DownloadOutcome {
        let file_name = &request.item.file_name;
        let url = match HttpClient::file_url(
            &request.file_query_url,
            file_name,
            request.item.last_modified,
        ) {
            Ok(url) => url,
            Err(error) => {
                warn!(error = %error, "cannot build file URL");
                return DownloadOutcome::Failed(error);
            }
        };

        let started = Instant::now();
        let mut state = DownloadProgressState::new(request.tenant_folder.join(file_name));
        let mut local = self.load_local_state(request).await;
        let mut resumed = false;

        loop {
            if cancel.is_cancelled() {
                return self.cancelled(request, &state, &local).await;
            }
            state.attempts += 1;

            match self
                .attempt(request, &url, &mut state, &mut local, &mut resumed, cancel)
                .await
            {
                AttemptEnd::Done(outcome) => {
                    if let DownloadOutcome::Downloaded { .. } = &outcome {
                        info!(
                            bytes = state.bytes_written,
                            elapsed_ms = started.elapsed().as_millis(),
                            attempt = state.attempts,
                            resumed,
                            "download complete"
                        );
                    }
                    return outcome;
                }
                AttemptEnd::Restart(reason) => {
                    info!(attempt = state.attempts, reason, "discarding partial bytes");
                    local.discard_partial = true;
                    if state.attempts >= self.policy.max_attempts() {
                        return self.exhausted(request, &state, &local).await;
                    }
                }
                AttemptEnd::Incomplete(error) => {
                    warn!(attempt = state.attempts, error = %error, "transfer incomplete");
                    self.save_marker(request, &state, &local).await;
                    match self.policy.after_incomplete(state.attempts) {
                        ResumeDecision::Retry { delay, .. } => {
                            tokio::select! {
                                biased;
                                () = cancel.cancelled() => {
                                    return self.cancelled(request, &state, &local).await;
                                }
                                () = tokio::time::sleep(delay) => {}
                            }
                        }
                        ResumeDecision::GiveUp { .. } => {
                            return self.exhausted(request, &state, &local).await;
                        }
                    }
                }
            }
        }
    }

    /// One request and, if accepted, one body transfer.
    async fn attempt(
        &self,
        request: &DownloadRequest,
        url: &Url,
        state: &mut DownloadProgressState,
        local: &mut LocalState,
        resumed: &mut bool,
        cancel: &CancellationToken,
    ) -> AttemptEnd {
        let on_disk = local_len(&state.target).await;
        state.existing_bytes = if local.is_complete() || local.discard_partial {
            0
        } else {
            on_disk.unwrap_or(0)
        };
        let existing = state.existing_bytes;

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return AttemptEnd::Done(self.cancelled(request, state, local).await);
            }
            response = self.client.fetch(url, &request.token, Some(existing)) => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %error, "request failed");
                return AttemptEnd::Done(DownloadOutcome::Failed(error));
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            // Only a complete local copy can be "not modified".
            if on_disk.is_some() && local.is_complete() && !local.discard_partial {
                debug!("server reports not modified");
                return AttemptEnd::Done(DownloadOutcome::Skipped(SkipReason::NotModified));
            }
            let error = DownloadError::http_status(url.as_str(), status.as_u16());
            warn!("server reports not modified but no complete local copy exists");
            return AttemptEnd::Done(DownloadOutcome::Failed(error));
        }
        if status == StatusCode::RANGE_NOT_SATISFIABLE && existing > 0 {
            return AttemptEnd::Restart("range not satisfiable");
        }
        if !status.is_success() {
            let error = DownloadError::http_status(url.as_str(), status.as_u16());
            warn!(status = status.as_u16(), "server returned error status");
            return AttemptEnd::Done(DownloadOutcome::Failed(error));
        }

        let meta = ResponseMeta::from_headers(response.headers());
        state.version_tag.clone_from(&meta.version_tag);
        state.server_last_modified = meta.last_modified;

        if on_disk.is_some()
            && let Some(reason) = freshness_skip(&state.target, local, &meta)
        {
            debug!(reason = %reason, "skipping transfer");
            return AttemptEnd::Done(DownloadOutcome::Skipped(reason));
        }

        let append = if existing > 0 {
            match (status, meta.content_range) {
                (StatusCode::PARTIAL_CONTENT, Some(range)) if range.start != existing => {
                    return AttemptEnd::Restart("content range does not match offset");
                }
                (StatusCode::PARTIAL_CONTENT, _) => {
                    if version_changed(local.resume_tag(), meta.version_tag.as_deref()) {
                        return AttemptEnd::Restart("remote version changed");
                    }
                    true
                }
                _ => {
                    debug!("server ignored range, rewriting from zero");
                    false
                }
            }
        } else {
            false
        };

        let mut body = Box::pin(response.bytes_stream());
        let first = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return AttemptEnd::Done(self.cancelled(request, state, local).await);
            }
            first = body.next() => first,
        };
        let first = match first {
            None => {
                warn!("empty response body");
                return AttemptEnd::Done(DownloadOutcome::Failed(DownloadError::empty_body(
                    url.as_str(),
                )));
            }
            Some(Err(e)) => return AttemptEnd::Incomplete(DownloadError::network(url.as_str(), e)),
            Some(Ok(chunk)) => chunk,
        };

        // The bytes on disk now belong to this response's version.
        if local.record.take().is_some()
            && let Err(e) = self
                .store
                .remove(&request.item.file_name, &request.tenant_folder)
                .await
        {
            warn!(error = %e, "failed to remove stale freshness record");
        }
        local.discard_partial = false;
        local.marker = Some(ResumeMarker::new(
            meta.version_tag.clone(),
            if append { existing } else { 0 },
        ));

        let opened = if append {
            OpenOptions::new().append(true).open(&state.target).await
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&state.target)
                .await
        };
        let mut file = match opened {
            Ok(file) => file,
            Err(e) => {
                return AttemptEnd::Done(DownloadOutcome::Failed(DownloadError::io(
                    &state.target,
                    e,
                )));
            }
        };
        self.save_marker(request, state, local).await;
        *resumed |= append;
        debug!(append, offset = existing, rate = request.rate, "writing body");

        let body = stream::iter([Ok(first)]).chain(body);
        let mut throttle = Throttle::new(request.rate);
        let report = write_throttled(&mut file, body, &mut throttle, cancel).await;
        drop(file);

        let report = match report {
            Ok(report) => report,
            Err(e) => {
                self.save_marker(request, state, local).await;
                return AttemptEnd::Done(DownloadOutcome::Failed(DownloadError::io(
                    &state.target,
                    e,
                )));
            }
        };
        state.bytes_written += report.bytes_written;

        match report.end {
            StreamEnd::Cancelled => {
                return AttemptEnd::Done(self.cancelled(request, state, local).await);
            }
            StreamEnd::Interrupted(e) => {
                return AttemptEnd::Incomplete(DownloadError::network(url.as_str(), e));
            }
            StreamEnd::Finished => {}
        }

        let file_size = local_len(&state.target).await.unwrap_or(0);
        match meta.expected_total(status, if append { existing } else { 0 }) {
            Some(total) if file_size < total => {
                AttemptEnd::Incomplete(DownloadError::incomplete(&state.target, total, file_size))
            }
            Some(total) if file_size > total => {
                AttemptEnd::Restart("file longer than declared length")
            }
            _ => AttemptEnd::Done(
                self.complete(request, state, &meta, file_size, *resumed)
                    .await,
            ),
        }
    }

    async fn load_local_state(&self, request: &DownloadRequest) -> LocalState {
        let name = &request.item.file_name;
        let folder = &request.tenant_folder;
        let record = self.store.read(name, folder).await.unwrap_or_else(|e| {
            warn!(error = %e, "cannot read freshness record, treating file as partial");
            None
        });
        let marker = self.store.read_resume(name, folder).await.unwrap_or_else(|e| {
            warn!(error = %e, "cannot read resume marker");
            None
        });
        LocalState {
            record,
            marker,
            discard_partial: false,
        }
    }

    async fn complete(
        &self,
        request: &DownloadRequest,
        state: &DownloadProgressState,
        meta: &ResponseMeta,
        file_size: u64,
        resumed: bool,
    ) -> DownloadOutcome {
        let name = &request.item.file_name;
        let folder = &request.tenant_folder;

        if let Some(modified) = meta.last_modified
            && let Err(e) = set_modified(&state.target, modified)
        {
            warn!(error = %e, "failed to set modification time");
        }

        let record = FreshnessRecord::new(
            name.as_str(),
            request.tenant.as_str(),
            meta.version_tag.clone(),
            meta.last_modified_raw,
        );
        if let Err(e) = self.store.write(folder, &record).await {
            warn!(error = %e, "failed to persist freshness record");
        }
        if let Err(e) = self.store.clear_resume(name, folder).await {
            warn!(error = %e, "failed to clear resume marker");
        }

        DownloadOutcome::Downloaded {
            path: state.target.clone(),
            bytes_written: state.bytes_written,
            file_size,
            attempts: state.attempts,
            resumed,
        }
    }

    async fn cancelled(
        &self,
        request: &DownloadRequest,
        state: &DownloadProgressState,
        local: &LocalState,
    ) -> DownloadOutcome {
        let bytes_on_disk = if local.is_complete() {
            0
        } else {
            local_len(&state.target).await.unwrap_or(0)
        };
        if bytes_on_disk > 0 {
            self.save_marker(request, state, local).await;
        }
        info!(bytes_on_disk, "transfer cancelled");
        DownloadOutcome::Cancelled { bytes_on_disk }
    }

    async fn exhausted(
        &self,
        request: &DownloadRequest,
        state: &DownloadProgressState,
        local: &LocalState,
    ) -> DownloadOutcome {
        let bytes_on_disk = local_len(&state.target).await.unwrap_or(0);
        if bytes_on_disk > 0 {
            self.save_marker(request, state, local).await;
        }
        let error = DownloadError::RetriesExhausted {
            file: request.item.file_name.clone(),
            attempts: state.attempts,
            bytes_on_disk,
        };
        warn!(error = %error, "giving up for this cycle");
        DownloadOutcome::Failed(error)
    }

    /// Records which version the partial bytes on disk belong to. A file
    /// proven complete keeps its record and gets no marker.
    async fn save_marker(
        &self,
        request: &DownloadRequest,
        state: &DownloadProgressState,
        local: &LocalState,
    ) {
        if local.is_complete() {
            return;
        }
        let bytes_on_disk = local_len(&state.target).await.unwrap_or(0);
        let marker = ResumeMarker::new(local.resume_tag().map(str::to_string), bytes_on_disk);
        if let Err(e) = self
            .store
            .write_resume(&request.item.file_name, &request.tenant_folder, &marker)
            .await
        {
            warn!(error = %e, "failed to persist resume marker");
        }
    }
}

/// Decides whether a response makes the transfer unnecessary.
fn freshness_skip(target: &Path, local: &LocalState, meta: &ResponseMeta) -> Option<SkipReason> {
    if is_file_locked(target) {
        return Some(SkipReason::Locked);
    }
    // A partial file's mtime is its last write, not a remote version.
    if !local.is_complete() {
        return None;
    }
    let tag_matches = matches!(
        (local.record.as_ref().and_then(|r| r.version_tag.as_deref()), meta.version_tag.as_deref()),
        (Some(ours), Some(theirs)) if ours == theirs
    );
    let mtime_current = meta
        .last_modified
        .is_some_and(|server| is_up_to_date(target, server));
    (tag_matches || mtime_current).then_some(SkipReason::UpToDate)
}

fn version_changed(expected: Option<&str>, actual: Option<&str>) -> bool {
    matches!((expected, actual), (Some(expected), Some(actual)) if expected != actual)
}

async fn local_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}
