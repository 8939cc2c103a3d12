//! The periodic loop: every tenant, then sleep, until cancelled.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use super::coordinator::TenantSyncCoordinator;
use super::report::TenantSyncReport;
use super::SyncError;
use crate::config::{SyncConfig, TenantDescriptor};

/// Cross-cycle bookkeeping of one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantSyncState {
    /// Start of the most recent cycle.
    pub last_attempt: Option<DateTime<Utc>>,
    /// End of the most recent cycle that reached the transfer stage.
    pub last_success: Option<DateTime<Utc>>,
    /// Cycles in a row that aborted before transferring.
    pub consecutive_failures: u32,
    /// Message of the latest aborting error.
    pub last_error: Option<String>,
    /// Files downloaded in the latest successful cycle.
    pub last_downloaded: usize,
    /// Files that failed in the latest successful cycle.
    pub last_failed: usize,
}

impl TenantSyncState {
    fn record(&mut self, started: DateTime<Utc>, result: &Result<TenantSyncReport, SyncError>) {
        self.last_attempt = Some(started);
        match result {
            Ok(report) => {
                self.last_success = Some(Utc::now());
                self.consecutive_failures = 0;
                self.last_error = None;
                self.last_downloaded = report.downloaded();
                self.last_failed = report.failed();
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.last_error = Some(e.to_string());
            }
        }
    }
}

/// Runs all tenants once per interval.
#[derive(Debug)]
pub struct SyncScheduleLoop {
    coordinator: TenantSyncCoordinator,
    tenants: Vec<TenantDescriptor>,
    cache_root: PathBuf,
    interval: Duration,
    states: HashMap<String, TenantSyncState>,
}

impl SyncScheduleLoop {
    /// Creates a loop over `tenants`, each synced into `<cache_root>/<name>`.
    #[must_use]
    pub fn new(
        coordinator: TenantSyncCoordinator,
        tenants: Vec<TenantDescriptor>,
        cache_root: PathBuf,
        interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            tenants,
            cache_root,
            interval,
            states: HashMap::new(),
        }
    }

    /// Creates a loop from a validated configuration.
    #[must_use]
    pub fn from_config(coordinator: TenantSyncCoordinator, config: &SyncConfig) -> Self {
        Self::new(
            coordinator,
            config.tenants.clone(),
            config.cache_root.clone(),
            config.interval(),
        )
    }

    /// State of `tenant`, once it has been through a cycle.
    #[must_use]
    pub fn state(&self, tenant: &str) -> Option<&TenantSyncState> {
        self.states.get(tenant)
    }

    /// One pass over every tenant, in configuration order.
    ///
    /// A tenant's error is logged and recorded; it never stops the next
    /// tenant. Tenants not yet started when `cancel` fires are skipped.
    #[instrument(skip(self, cancel), fields(tenants = self.tenants.len()))]
    pub async fn run_cycle(
        &mut self,
        cancel: &CancellationToken,
    ) -> Vec<(String, Result<TenantSyncReport, SyncError>)> {
        let mut results = Vec::with_capacity(self.tenants.len());
        for tenant in &self.tenants {
            if cancel.is_cancelled() {
                info!(tenant = %tenant.name, "cancelled, skipping remaining tenants");
                break;
            }
            let started = Utc::now();
            let folder = self.cache_root.join(&tenant.name);
            let result = self.coordinator.sync_tenant(tenant, &folder, cancel).await;
            if let Err(e) = &result {
                error!(tenant = %tenant.name, error = %e, "tenant cycle failed");
            }
            self.states
                .entry(tenant.name.clone())
                .or_default()
                .record(started, &result);
            results.push((tenant.name.clone(), result));
        }
        results
    }

    /// Repeats [`Self::run_cycle`] every interval until `cancel` fires.
    pub async fn run(&mut self, cancel: &CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            tenants = self.tenants.len(),
            "sync loop started"
        );
        loop {
            self.run_cycle(cancel).await;
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("sync loop stopped");
    }
}
