//! HTTP client wrapper for file fetches and control-plane calls.
//!
//! One [`HttpClient`] is built per process and shared (it is cheap to clone),
//! taking advantage of connection pooling across tenants and files.

use std::time::Duration;

use reqwest::header::RANGE;
use reqwest::{Client, Response};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{
    CONNECT_TIMEOUT_SECS, FILE_NAME_PARAM, LAST_MODIFIED_PARAM, READ_TIMEOUT_SECS,
};
use super::error::DownloadError;
use crate::user_agent;

/// HTTP client for streaming file fetches.
///
/// # Example
///
/// ```no_run
/// use packsync_core::download::HttpClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let url = HttpClient::file_url("https://files.example.com/download", "water.mmpk", 0)?;
/// let response = client.fetch(&url, "token", Some(4096)).await?;
/// println!("status: {}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a transfer client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Read timeout: 5 minutes between body reads
    /// - No content decoding, so `Content-Length` and `Range` offsets are
    ///   byte offsets of the stored file
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a transfer client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = build_client(
            user_agent::default_transfer_user_agent(),
            connect_timeout_secs,
            read_timeout_secs,
        )
        .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Creates a client for authentication and discovery calls.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn control(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = build_client(
            user_agent::default_control_user_agent(),
            connect_timeout_secs,
            read_timeout_secs,
        )
        .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Returns the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Builds the fetch URL of one file:
    /// `<file_query_url>?lastModifiedTime=<n>&fileName=<name>`, the first
    /// parameter only when `last_modified > 0`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if `file_query_url` does not
    /// parse as an absolute URL.
    pub fn file_url(
        file_query_url: &str,
        file_name: &str,
        last_modified: i64,
    ) -> Result<Url, DownloadError> {
        let mut url =
            Url::parse(file_query_url).map_err(|_| DownloadError::invalid_url(file_query_url))?;
        {
            let mut query = url.query_pairs_mut();
            if last_modified > 0 {
                query.append_pair(LAST_MODIFIED_PARAM, &last_modified.to_string());
            }
            query.append_pair(FILE_NAME_PARAM, file_name);
        }
        Ok(url)
    }

    /// Issues the file GET with bearer auth, asking for the bytes from
    /// `range_start` onwards when it is set and non-zero.
    ///
    /// Any HTTP status is returned as a response; interpreting it is up to
    /// the caller.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Network`] or [`DownloadError::Timeout`] when
    /// no response headers arrive.
    #[instrument(level = "debug", skip(self, token), fields(url = %url))]
    pub async fn fetch(
        &self,
        url: &Url,
        token: &str,
        range_start: Option<u64>,
    ) -> Result<Response, DownloadError> {
        let mut request = self.client.get(url.clone()).bearer_auth(token);
        if let Some(start) = range_start.filter(|start| *start > 0) {
            debug!(start, "requesting byte range");
            request = request.header(RANGE, format!("bytes={start}-"));
        }
        request
            .send()
            .await
            .map_err(|e| DownloadError::network(url.as_str(), e))
    }
}

fn build_client(
    user_agent: String,
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .read_timeout(Duration::from_secs(read_timeout_secs))
        .user_agent(user_agent)
        .build()
}
