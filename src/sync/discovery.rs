//! File discovery: which files a tenant should have this cycle.

use std::collections::HashSet;
use std::fmt::Debug;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::SyncError;
use crate::config::TenantDescriptor;
use crate::download::{FileWorkItem, HttpClient};

/// Produces the work list of one tenant.
#[async_trait]
pub trait FileDiscovery: Send + Sync + Debug {
    /// Lists the files `tenant` should hold, authorized by `token`.
    async fn discover(
        &self,
        tenant: &TenantDescriptor,
        token: &str,
    ) -> Result<Vec<FileWorkItem>, SyncError>;
}

/// Uses the `files` array from the tenant's configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticFileList;

#[async_trait]
impl FileDiscovery for StaticFileList {
    async fn discover(
        &self,
        tenant: &TenantDescriptor,
        _token: &str,
    ) -> Result<Vec<FileWorkItem>, SyncError> {
        Ok(normalize(
            tenant.files.iter().map(FileWorkItem::new).collect(),
        ))
    }
}

/// Fetches `[{"fileName": ..., "lastModified": ...}]` from the tenant's
/// listing endpoint, falling back to the configured `files` when the tenant
/// has no endpoint.
#[derive(Debug, Clone)]
pub struct HttpFileDiscovery {
    client: HttpClient,
}

impl HttpFileDiscovery {
    /// Creates a discovery client.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FileDiscovery for HttpFileDiscovery {
    #[instrument(skip(self, tenant, token), fields(tenant = %tenant.name))]
    async fn discover(
        &self,
        tenant: &TenantDescriptor,
        token: &str,
    ) -> Result<Vec<FileWorkItem>, SyncError> {
        let Some(list_url) = tenant.new_file_list_url.as_deref() else {
            return StaticFileList.discover(tenant, token).await;
        };

        let response = self
            .client
            .inner()
            .get(list_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::discovery(&tenant.name, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::discovery(
                &tenant.name,
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let items: Vec<FileWorkItem> = response.json().await.map_err(|e| {
            SyncError::discovery(&tenant.name, format!("malformed file list: {e}"))
        })?;
        debug!(count = items.len(), "file list received");
        Ok(normalize(items))
    }
}

/// Drops names that are not plain file names and duplicates, keeping the
/// first occurrence, so each file maps to exactly one transfer.
fn normalize(items: Vec<FileWorkItem>) -> Vec<FileWorkItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            if !is_plain_file_name(&item.file_name) {
                warn!(file = %item.file_name, "ignoring file name that is not a plain name");
                return false;
            }
            seen.insert(item.file_name.clone())
        })
        .collect()
}

fn is_plain_file_name(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && !matches!(name, "." | "..") && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn tenant(list_url: Option<String>, files: &[&str]) -> TenantDescriptor {
        TenantDescriptor {
            name: "acme".into(),
            auth_url: "https://auth.example.com/login".into(),
            file_list_url: "https://files.example.com/download".into(),
            new_file_list_url: list_url,
            files: files.iter().map(|f| (*f).to_string()).collect(),
            username: "sync".into(),
            password: "secret".into(),
        }
    }

    #[tokio::test]
    async fn test_static_list_dedups_and_filters() {
        let items = StaticFileList
            .discover(
                &tenant(None, &["a.mmpk", "../b.mmpk", "a.mmpk", "c.vtpk"]),
                "tok",
            )
            .await
            .unwrap();
        assert_eq!(
            items,
            vec![FileWorkItem::new("a.mmpk"), FileWorkItem::new("c.vtpk")]
        );
    }

    #[tokio::test]
    async fn test_http_discovery_parses_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"fileName": "IllinoisWater.mmpk", "lastModified": 1_700_000_000},
                {"FileName": "Naperville.vtpk", "LastModified": 0}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let items = HttpFileDiscovery::new(HttpClient::control(5, 5))
            .discover(&tenant(Some(format!("{}/list", server.uri())), &[]), "tok")
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].last_modified, 1_700_000_000);
        assert_eq!(items[1], FileWorkItem::new("Naperville.vtpk"));
    }

    #[tokio::test]
    async fn test_http_discovery_without_endpoint_uses_config() {
        let items = HttpFileDiscovery::new(HttpClient::control(5, 5))
            .discover(&tenant(None, &["a.mmpk"]), "tok")
            .await
            .unwrap();
        assert_eq!(items, vec![FileWorkItem::new("a.mmpk")]);
    }

    #[tokio::test]
    async fn test_http_discovery_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = HttpFileDiscovery::new(HttpClient::control(5, 5))
            .discover(&tenant(Some(server.uri()), &[]), "tok")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Discovery { .. }));
    }
}
