//! Worker configuration: cycle interval, cache root, metadata backend,
//! throttle policy and the tenant list.
//!
//! Loaded from TOML. The default location is
//! `$XDG_CONFIG_HOME/packsync/config.toml`, then
//! `$HOME/.config/packsync/config.toml`.

use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use url::Url;

use crate::capacity::DEFAULT_SAMPLE_WINDOW;
use crate::download::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::planner::PlannerPolicy;

/// Default minutes between sync cycles (once a day).
pub const DEFAULT_INTERVAL_MINUTES: u64 = 1440;

/// Where freshness records and resume markers are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    /// JSON file next to each data file.
    #[default]
    Sidecar,
    /// One `freshness.db` in the cache root.
    Sqlite,
}

impl MetadataBackend {
    /// Returns the stable string label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sidecar => "sidecar",
            Self::Sqlite => "sqlite",
        }
    }
}

/// One tenant to keep in sync.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantDescriptor {
    /// Organization name; also the cache sub-folder name.
    pub name: String,
    /// Authentication endpoint.
    pub auth_url: String,
    /// File-query endpoint (`?fileName=...`).
    pub file_list_url: String,
    /// Endpoint listing the tenant's files, if the server provides one.
    #[serde(default)]
    pub new_file_list_url: Option<String>,
    /// Fixed file list, used when no listing endpoint is configured.
    #[serde(default)]
    pub files: Vec<String>,
    /// Basic-auth user.
    pub username: String,
    /// Basic-auth password.
    pub password: String,
}

impl fmt::Debug for TenantDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantDescriptor")
            .field("name", &self.name)
            .field("auth_url", &self.auth_url)
            .field("file_list_url", &self.file_list_url)
            .field("new_file_list_url", &self.new_file_list_url)
            .field("files", &self.files)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Full worker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Minutes between cycle starts.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Root of the local cache; each tenant gets `<cache_root>/<name>`.
    pub cache_root: PathBuf,
    /// Freshness metadata storage.
    #[serde(default)]
    pub metadata_backend: MetadataBackend,
    /// Capacity sampling window in milliseconds.
    #[serde(default = "default_sample_window_ms")]
    pub sample_window_ms: u64,
    /// HTTP connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// HTTP per-read timeout in seconds.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Pinned link capacity in Mbps; when set, interface sampling is skipped.
    #[serde(default)]
    pub fixed_capacity_mbps: Option<f64>,
    /// Throttle planning knobs.
    #[serde(default)]
    pub policy: PlannerPolicy,
    /// Tenants, synced in order.
    #[serde(default)]
    pub tenants: Vec<TenantDescriptor>,
}

fn default_interval_minutes() -> u64 {
    DEFAULT_INTERVAL_MINUTES
}

#[allow(clippy::cast_possible_truncation)]
fn default_sample_window_ms() -> u64 {
    DEFAULT_SAMPLE_WINDOW.as_millis() as u64
}

fn default_connect_timeout_secs() -> u64 {
    CONNECT_TIMEOUT_SECS
}

fn default_read_timeout_secs() -> u64 {
    READ_TIMEOUT_SECS
}

impl SyncConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending field when parsing or
    /// validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("Invalid config syntax")?;
        config.validate()?;
        Ok(config)
    }

    /// Interval between cycle starts.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    /// Capacity sampling window.
    #[must_use]
    pub fn sample_window(&self) -> Duration {
        Duration::from_millis(self.sample_window_ms)
    }

    /// Cache folder of one tenant.
    #[must_use]
    pub fn tenant_folder(&self, tenant: &TenantDescriptor) -> PathBuf {
        self.cache_root.join(&tenant.name)
    }

    /// Validates config values against runtime constraints.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.interval_minutes == 0 {
            bail!("Invalid config value for `interval_minutes`: 0. Expected at least 1");
        }
        if self.cache_root.as_os_str().is_empty() {
            bail!("Invalid config value for `cache_root`: must not be empty");
        }
        if !(10..=60_000).contains(&self.sample_window_ms) {
            bail!(
                "Invalid config value for `sample_window_ms`: {}. Expected range: 10..=60000",
                self.sample_window_ms
            );
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        if let Some(mbps) = self.fixed_capacity_mbps
            && !(mbps.is_finite() && mbps >= 0.0)
        {
            bail!(
                "Invalid config value for `fixed_capacity_mbps`: {mbps}. Expected a non-negative number"
            );
        }
        validate_policy(&self.policy)?;

        if self.tenants.is_empty() {
            bail!("Invalid config: at least one `[[tenants]]` entry is required");
        }
        let mut seen = HashSet::new();
        for tenant in &self.tenants {
            validate_tenant(tenant)?;
            if !seen.insert(tenant.name.as_str()) {
                bail!(
                    "Invalid config value for `tenants.name`: '{}' appears more than once",
                    tenant.name
                );
            }
        }
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: u64) -> Result<()> {
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

fn validate_policy(policy: &PlannerPolicy) -> Result<()> {
    if !(policy.headroom > 0.0 && policy.headroom <= 1.0) {
        bail!(
            "Invalid config value for `policy.headroom`: {}. Expected range: (0, 1]",
            policy.headroom
        );
    }
    if !(1..=16).contains(&policy.max_parallel) {
        bail!(
            "Invalid config value for `policy.max_parallel`: {}. Expected range: 1..=16",
            policy.max_parallel
        );
    }
    if !policy.min_parallel_mbps.is_finite() || policy.min_parallel_mbps < 0.0 {
        bail!(
            "Invalid config value for `policy.min_parallel_mbps`: {}. Expected a non-negative number",
            policy.min_parallel_mbps
        );
    }
    Ok(())
}

fn validate_tenant(tenant: &TenantDescriptor) -> Result<()> {
    let name = tenant.name.trim();
    if name.is_empty() {
        bail!("Invalid config value for `tenants.name`: must not be empty");
    }
    if name != tenant.name || matches!(name, "." | "..") || name.contains(['/', '\\']) {
        bail!(
            "Invalid config value for `tenants.name`: '{}'. Must be a plain folder name",
            tenant.name
        );
    }
    validate_url(&tenant.name, "auth_url", &tenant.auth_url)?;
    validate_url(&tenant.name, "file_list_url", &tenant.file_list_url)?;
    if let Some(list_url) = &tenant.new_file_list_url {
        validate_url(&tenant.name, "new_file_list_url", list_url)?;
    }
    if let Some(bad) = tenant
        .files
        .iter()
        .find(|f| f.trim().is_empty() || f.contains(['/', '\\']) || f.as_str() == "..")
    {
        bail!(
            "Invalid config value for `tenants.files` of '{}': '{bad}' is not a plain file name",
            tenant.name
        );
    }
    Ok(())
}

fn validate_url(tenant: &str, field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .with_context(|| format!("Invalid config value for `tenants.{field}` of '{tenant}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!(
            "Invalid config value for `tenants.{field}` of '{tenant}': scheme '{}' is not http(s)",
            url.scheme()
        );
    }
    Ok(())
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/packsync/config.toml`
/// 2. `$HOME/.config/packsync/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("packsync")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("packsync")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads and validates the config at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or validated.
pub fn load_config(path: &Path) -> Result<SyncConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    SyncConfig::from_toml_str(&raw)
        .with_context(|| format!("Failed to load config file '{}'", path.display()))
}
