//! Tenant authentication: basic credentials in, bearer token out.

use std::fmt::Debug;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use async_trait::async_trait;
use serde::Deserialize;
use sysinfo::System;
use tracing::{debug, instrument, warn};
use url::Url;

use super::SyncError;
use crate::config::TenantDescriptor;
use crate::download::HttpClient;

/// Device type code sent with every login.
const DEVICE_TYPE: &str = "5";

/// Login channel sent with every login.
const LOGIN_FROM: &str = "Web3.0";

/// Obtains a bearer token for a tenant.
#[async_trait]
pub trait Authenticator: Send + Sync + Debug {
    /// Authenticates `tenant` and returns its access token.
    async fn authenticate(&self, tenant: &TenantDescriptor) -> Result<String, SyncError>;
}

/// Host facts reported to the authentication endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Host name.
    pub device_model: String,
    /// Worker version.
    pub app_version: String,
    /// Local UTC offset, e.g. `+02:00`.
    pub time_zone: String,
    /// Operating system description.
    pub os_version: String,
    /// Primary local IP address.
    pub ip_address: String,
}

impl DeviceInfo {
    /// Collects the facts of the running host.
    #[must_use]
    pub fn detect() -> Self {
        Self {
            device_model: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            time_zone: chrono::Local::now().offset().to_string(),
            os_version: System::long_os_version().unwrap_or_else(|| "unknown".to_string()),
            ip_address: local_ip_address().to_string(),
        }
    }
}

/// Address of the interface that would route to the public internet.
/// Connecting a UDP socket sends nothing.
fn local_ip_address() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
            socket.local_addr()
        })
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |addr| addr.ip())
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: Option<String>,
}

/// Authenticates with `POST <auth_url>?...&orgName=<tenant>` and HTTP basic
/// credentials.
#[derive(Debug, Clone)]
pub struct HttpAuthenticator {
    client: HttpClient,
    device: DeviceInfo,
}

impl HttpAuthenticator {
    /// Creates an authenticator reporting `device`.
    #[must_use]
    pub fn new(client: HttpClient, device: DeviceInfo) -> Self {
        Self { client, device }
    }

    /// Builds the login URL of `tenant`, keeping any query already present
    /// on the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Authentication`] if the endpoint is not a URL.
    pub fn login_url(&self, tenant: &TenantDescriptor) -> Result<Url, SyncError> {
        let mut url = Url::parse(&tenant.auth_url)
            .map_err(|e| SyncError::authentication(&tenant.name, format!("invalid auth URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("deviceModel", &self.device.device_model)
            .append_pair("appVersion", &self.device.app_version)
            .append_pair("timeZone", &self.device.time_zone)
            .append_pair("osVersion", &self.device.os_version)
            .append_pair("deviceType", DEVICE_TYPE)
            .append_pair("ipAddress", &self.device.ip_address)
            .append_pair("loginFrom", LOGIN_FROM)
            .append_pair("orgName", &tenant.name)
            .append_pair("isCompressedToken", "Y");
        Ok(url)
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    #[instrument(skip(self, tenant), fields(tenant = %tenant.name))]
    async fn authenticate(&self, tenant: &TenantDescriptor) -> Result<String, SyncError> {
        let url = self.login_url(tenant)?;
        let response = self
            .client
            .inner()
            .post(url)
            .basic_auth(&tenant.username, Some(&tenant.password))
            .send()
            .await
            .map_err(|e| SyncError::authentication(&tenant.name, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "authentication refused");
            return Err(SyncError::authentication(
                &tenant.name,
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let body: AuthResponse = response.json().await.map_err(|e| {
            SyncError::authentication(&tenant.name, format!("malformed response: {e}"))
        })?;
        match body.access_token {
            Some(token) if !token.trim().is_empty() => {
                debug!(token_len = token.len(), "authenticated");
                Ok(token)
            }
            _ => Err(SyncError::authentication(&tenant.name, "token missing")),
        }
    }
}
