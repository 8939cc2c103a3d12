//! One tenant's cycle: authenticate, discover, plan, transfer.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::auth::Authenticator;
use super::discovery::FileDiscovery;
use super::report::{FileReport, TenantSyncReport, TransferStats};
use super::SyncError;
use crate::capacity::CapacityProbe;
use crate::config::TenantDescriptor;
use crate::download::{
    DownloadError, DownloadOutcome, DownloadRequest, FileWorkItem, ResumableDownloader,
};
use crate::planner::{PlannerPolicy, ThrottlePlan};

/// Drives one tenant through a sync cycle.
///
/// Designed to be created once and reused across tenants and cycles; all
/// per-cycle state lives in the returned [`TenantSyncReport`].
#[derive(Debug, Clone)]
pub struct TenantSyncCoordinator {
    authenticator: Arc<dyn Authenticator>,
    discovery: Arc<dyn FileDiscovery>,
    probe: Arc<dyn CapacityProbe>,
    downloader: Arc<ResumableDownloader>,
    policy: PlannerPolicy,
    cpu_cores: usize,
}

impl TenantSyncCoordinator {
    /// Creates a coordinator using the host's logical core count.
    #[must_use]
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        discovery: Arc<dyn FileDiscovery>,
        probe: Arc<dyn CapacityProbe>,
        downloader: Arc<ResumableDownloader>,
        policy: PlannerPolicy,
    ) -> Self {
        let cpu_cores = std::thread::available_parallelism().map_or(1, std::num::NonZero::get);
        Self {
            authenticator,
            discovery,
            probe,
            downloader,
            policy,
            cpu_cores,
        }
    }

    /// Overrides the core count fed to the planner.
    #[must_use]
    pub fn with_cpu_cores(mut self, cpu_cores: usize) -> Self {
        self.cpu_cores = cpu_cores.max(1);
        self
    }

    /// Runs one cycle for `tenant` into `tenant_folder`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when authentication, discovery, or folder
    /// preparation fails. Per-file failures are reported in the
    /// [`TenantSyncReport`] instead.
    #[instrument(skip(self, tenant, cancel), fields(tenant = %tenant.name))]
    pub async fn sync_tenant(
        &self,
        tenant: &TenantDescriptor,
        tenant_folder: &Path,
        cancel: &CancellationToken,
    ) -> Result<TenantSyncReport, SyncError> {
        let started = Instant::now();
        info!("starting tenant cycle");

        let token = self.authenticator.authenticate(tenant).await?;
        let items = self.discovery.discover(tenant, &token).await?;

        tokio::fs::create_dir_all(tenant_folder)
            .await
            .map_err(|e| SyncError::cache_folder(tenant_folder, e))?;

        let estimated_mbps = self.probe.estimate_mbps().await;
        let plan = self.policy.plan(items.len(), self.cpu_cores, estimated_mbps);
        info!(
            files = items.len(),
            estimated_mbps,
            parallel = plan.max_parallel_downloads,
            per_task_rate = plan.per_task_rate,
            "throttle plan"
        );

        let requests: Vec<DownloadRequest> = items
            .into_iter()
            .map(|item| DownloadRequest {
                item,
                tenant: tenant.name.clone(),
                tenant_folder: tenant_folder.to_path_buf(),
                token: token.clone(),
                file_query_url: tenant.file_list_url.clone(),
                rate: plan.per_task_rate,
            })
            .collect();

        let stats = Arc::new(TransferStats::new());
        let files = if plan.is_parallel() {
            self.run_parallel(requests, plan, &stats, cancel).await?
        } else {
            self.run_sequential(requests, &stats, cancel).await
        };

        let report = TenantSyncReport {
            tenant: tenant.name.clone(),
            estimated_mbps,
            plan,
            files,
            peak_concurrency: stats.peak_active(),
            elapsed: started.elapsed(),
        };
        info!(
            downloaded = report.downloaded(),
            bytes = report.bytes_transferred(),
            skipped = report.skipped(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            elapsed_ms = report.elapsed.as_millis(),
            "tenant cycle complete"
        );
        Ok(report)
    }

    async fn run_sequential(
        &self,
        requests: Vec<DownloadRequest>,
        stats: &TransferStats,
        cancel: &CancellationToken,
    ) -> Vec<FileReport> {
        let mut files = Vec::with_capacity(requests.len());
        for request in requests {
            if cancel.is_cancelled() {
                debug!(file = %request.item.file_name, "cancelled before start");
                files.push(not_started(request.item));
                continue;
            }
            let outcome = {
                let _active = stats.start();
                self.downloader.download(&request, cancel).await
            };
            log_outcome(&request.item.file_name, &outcome);
            files.push(FileReport {
                file_name: request.item.file_name,
                outcome,
            });
        }
        files
    }

    async fn run_parallel(
        &self,
        requests: Vec<DownloadRequest>,
        plan: ThrottlePlan,
        stats: &Arc<TransferStats>,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileReport>, SyncError> {
        let semaphore = Arc::new(Semaphore::new(plan.max_parallel_downloads));
        let mut handles = Vec::with_capacity(requests.len());

        for request in requests {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    Some(permit.map_err(|_| SyncError::SemaphoreClosed)?)
                }
            };
            let Some(permit) = permit else {
                debug!(file = %request.item.file_name, "cancelled before start");
                let file_name = request.item.file_name.clone();
                handles.push((file_name, None));
                continue;
            };

            let downloader = Arc::clone(&self.downloader);
            let stats = Arc::clone(stats);
            let cancel = cancel.clone();
            let file_name = request.item.file_name.clone();

            let handle = tokio::spawn(async move {
                // Permit is dropped when this block exits (RAII)
                let _permit = permit;
                let _active = stats.start();
                downloader.download(&request, &cancel).await
            });
            handles.push((file_name, Some(handle)));
        }

        debug!(task_count = handles.len(), "waiting for transfers to finish");
        Ok(collect_outcomes(handles).await)
    }
}

/// Awaits spawned transfers in work-list order. Every file gets a report,
/// including ones whose task never ran or died.
async fn collect_outcomes(
    handles: Vec<(String, Option<JoinHandle<DownloadOutcome>>)>,
) -> Vec<FileReport> {
    let mut files = Vec::with_capacity(handles.len());
    for (file_name, handle) in handles {
        let outcome = match handle {
            None => DownloadOutcome::Cancelled { bytes_on_disk: 0 },
            Some(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Task panics are logged but don't fail the tenant
                    warn!(file = %file_name, error = %e, "transfer task panicked");
                    DownloadOutcome::Failed(DownloadError::task_failed(&file_name, e))
                }
            },
        };
        log_outcome(&file_name, &outcome);
        files.push(FileReport { file_name, outcome });
    }
    files
}

fn not_started(item: FileWorkItem) -> FileReport {
    FileReport {
        file_name: item.file_name,
        outcome: DownloadOutcome::Cancelled { bytes_on_disk: 0 },
    }
}

fn log_outcome(file_name: &str, outcome: &DownloadOutcome) {
    match outcome {
        DownloadOutcome::Downloaded {
            bytes_written,
            file_size,
            ..
        } => debug!(
            file = file_name,
            outcome = outcome.label(),
            bytes = bytes_written,
            file_size,
            "file done"
        ),
        DownloadOutcome::Skipped(reason) => debug!(
            file = file_name,
            outcome = outcome.label(),
            reason = %reason,
            "file done"
        ),
        DownloadOutcome::Failed(error) => warn!(
            file = file_name,
            outcome = outcome.label(),
            error = %error,
            "file failed"
        ),
        DownloadOutcome::Cancelled { bytes_on_disk } => debug!(
            file = file_name,
            outcome = outcome.label(),
            bytes_on_disk,
            "file cancelled"
        ),
    }
}
