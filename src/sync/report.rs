//! Per-tenant cycle results.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::download::DownloadOutcome;
use crate::planner::ThrottlePlan;

/// Live transfer counters shared by the tasks of one tenant cycle.
#[derive(Debug, Default)]
pub struct TransferStats {
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl TransferStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transfers currently running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous transfers seen.
    #[must_use]
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    /// Marks a transfer as started; the guard marks it finished on drop.
    pub fn start(&self) -> ActiveTransfer<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
        ActiveTransfer { stats: self }
    }
}

/// RAII marker of one running transfer.
#[derive(Debug)]
pub struct ActiveTransfer<'a> {
    stats: &'a TransferStats,
}

impl Drop for ActiveTransfer<'_> {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Outcome of one file in a tenant cycle.
#[derive(Debug)]
pub struct FileReport {
    /// File name.
    pub file_name: String,
    /// What happened to it.
    pub outcome: DownloadOutcome,
}

/// Summary of one tenant cycle.
#[derive(Debug)]
pub struct TenantSyncReport {
    /// Tenant name.
    pub tenant: String,
    /// Capacity estimate the plan was derived from.
    pub estimated_mbps: f64,
    /// Plan used for this cycle.
    pub plan: ThrottlePlan,
    /// Per-file outcomes, in discovery order.
    pub files: Vec<FileReport>,
    /// Highest number of simultaneous transfers.
    pub peak_concurrency: usize,
    /// Wall time of the cycle.
    pub elapsed: Duration,
}

impl TenantSyncReport {
    fn count(&self, pred: impl Fn(&DownloadOutcome) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.outcome)).count()
    }

    /// Files transferred to completion.
    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.count(DownloadOutcome::is_downloaded)
    }

    /// Files skipped as current, locked, or not modified.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Skipped(_)))
    }

    /// Files abandoned for this cycle.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Failed(_)))
    }

    /// Files interrupted by cancellation.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, DownloadOutcome::Cancelled { .. }))
    }

    /// Body bytes written by completed transfers.
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.files
            .iter()
            .map(|f| match f.outcome {
                DownloadOutcome::Downloaded { bytes_written, .. } => bytes_written,
                _ => 0,
            })
            .sum()
    }

    /// Outcome for `file_name`, if it was part of the cycle.
    #[must_use]
    pub fn outcome(&self, file_name: &str) -> Option<&DownloadOutcome> {
        self.files
            .iter()
            .find(|f| f.file_name == file_name)
            .map(|f| &f.outcome)
    }
}
