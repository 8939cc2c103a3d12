//! Concurrency and per-task byte-rate planning.
//!
//! One [`ThrottlePlan`] is computed per tenant cycle from the CPU core count
//! and the estimated link capacity, then shared read-only by every transfer
//! task of that cycle.
//!
//! Policy:
//! - parallel mode only when there is more than one core and the link is at
//!   least [`PlannerPolicy::min_parallel_mbps`] fast
//! - at most [`PlannerPolicy::max_parallel`] concurrent transfers, whatever
//!   the core count, to keep load on the remote service bounded
//! - [`PlannerPolicy::headroom`] of the capacity is shared evenly between the
//!   tasks; the rest is left for other traffic on the host

use serde::Deserialize;
use tracing::{debug, instrument};

/// Default fraction of the estimated capacity handed to transfers.
pub const DEFAULT_HEADROOM: f64 = 0.7;

/// Default hard cap on concurrent transfers per tenant.
pub const DEFAULT_MAX_PARALLEL: usize = 3;

/// Default minimum link speed for parallel mode.
pub const DEFAULT_MIN_PARALLEL_MBPS: f64 = 10.0;

/// Default per-task rate floor (64 KiB/s).
pub const DEFAULT_MIN_TASK_RATE: u64 = 64 * 1024;

/// Tunable planning constants.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlannerPolicy {
    /// Fraction of the capacity shared between transfers, in `(0, 1]`.
    pub headroom: f64,
    /// Upper bound on concurrent transfers.
    pub max_parallel: usize,
    /// Minimum estimated Mbps for parallel mode.
    pub min_parallel_mbps: f64,
    /// Lower bound on the per-task rate in bytes/sec, applied when the
    /// estimate is near zero so transfers still make progress.
    pub min_task_rate: u64,
}

impl Default for PlannerPolicy {
    fn default() -> Self {
        Self {
            headroom: DEFAULT_HEADROOM,
            max_parallel: DEFAULT_MAX_PARALLEL,
            min_parallel_mbps: DEFAULT_MIN_PARALLEL_MBPS,
            min_task_rate: DEFAULT_MIN_TASK_RATE,
        }
    }
}

/// Per-cycle concurrency level and per-task byte-rate cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePlan {
    /// Number of simultaneous transfers, always at least 1.
    pub max_parallel_downloads: usize,
    /// Sustained write-rate cap for each transfer, in bytes per second.
    pub per_task_rate: u64,
}

impl ThrottlePlan {
    /// Whether transfers should run concurrently.
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.max_parallel_downloads > 1
    }
}

/// Converts megabits per second to bytes per second (decimal megabits).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn mbps_to_bytes_per_sec(mbps: f64) -> u64 {
    if !mbps.is_finite() || mbps <= 0.0 {
        return 0;
    }
    (mbps * 1_000_000.0 / 8.0).round() as u64
}

/// Computes the throttle plan for one tenant cycle using the default policy.
#[must_use]
pub fn plan(file_count: usize, cpu_cores: usize, estimated_mbps: f64) -> ThrottlePlan {
    PlannerPolicy::default().plan(file_count, cpu_cores, estimated_mbps)
}

impl PlannerPolicy {
    /// Computes the throttle plan for one tenant cycle.
    #[must_use]
    #[instrument(level = "debug", skip(self))]
    pub fn plan(&self, file_count: usize, cpu_cores: usize, estimated_mbps: f64) -> ThrottlePlan {
        let parallel_allowed = cpu_cores > 1 && estimated_mbps >= self.min_parallel_mbps;
        let max_parallel_downloads = if parallel_allowed {
            file_count.min(self.max_parallel.max(1)).max(1)
        } else {
            1
        };

        #[allow(clippy::cast_precision_loss)]
        let task_mbps = estimated_mbps.max(0.0) * self.headroom / max_parallel_downloads as f64;
        let per_task_rate = mbps_to_bytes_per_sec(task_mbps).max(self.min_task_rate);

        debug!(
            parallel_allowed,
            max_parallel_downloads,
            per_task_rate,
            "planned transfers"
        );

        ThrottlePlan {
            max_parallel_downloads,
            per_task_rate,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_scenario_fast_link_many_files() {
        let plan = plan(5, 4, 20.0);
        assert_eq!(plan.max_parallel_downloads, 3);
        // 20 * 0.7 / 3 = 4.67 Mbps = 583_333 B/s
        assert_eq!(plan.per_task_rate, 583_333);
        assert!(plan.is_parallel());
    }

    #[test]
    fn test_plan_scenario_slow_link_is_sequential() {
        let plan = plan(5, 4, 5.0);
        assert_eq!(plan.max_parallel_downloads, 1);
        // 5 * 0.7 = 3.5 Mbps = 437_500 B/s
        assert_eq!(plan.per_task_rate, 437_500);
        assert!(!plan.is_parallel());
    }

    #[test]
    fn test_plan_single_core_is_sequential() {
        let plan = plan(5, 1, 100.0);
        assert_eq!(plan.max_parallel_downloads, 1);
        assert_eq!(plan.per_task_rate, mbps_to_bytes_per_sec(70.0));
    }

    #[test]
    fn test_plan_parallel_bounded_by_file_count() {
        assert_eq!(plan(2, 8, 50.0).max_parallel_downloads, 2);
        assert_eq!(plan(1, 8, 50.0).max_parallel_downloads, 1);
    }

    #[test]
    fn test_plan_zero_files_still_plans_one_slot() {
        assert_eq!(plan(0, 8, 50.0).max_parallel_downloads, 1);
    }

    #[test]
    fn test_plan_cap_independent_of_core_count() {
        assert_eq!(plan(100, 64, 1_000.0).max_parallel_downloads, 3);
    }

    #[test]
    fn test_plan_exactly_threshold_allows_parallel() {
        assert_eq!(plan(3, 2, 10.0).max_parallel_downloads, 3);
        assert_eq!(plan(3, 2, 9.99).max_parallel_downloads, 1);
    }

    #[test]
    fn test_plan_zero_estimate_uses_rate_floor() {
        let plan = plan(3, 4, 0.0);
        assert_eq!(plan.max_parallel_downloads, 1);
        assert_eq!(plan.per_task_rate, DEFAULT_MIN_TASK_RATE);
    }

    #[test]
    fn test_plan_total_rate_within_headroom() {
        for (files, mbps) in [(5, 20.0), (2, 12.0), (3, 300.0), (7, 10.0)] {
            let plan = plan(files, 4, mbps);
            let total = plan.per_task_rate * plan.max_parallel_downloads as u64;
            // one byte of rounding per task
            assert!(
                total <= mbps_to_bytes_per_sec(mbps * 0.7) + plan.max_parallel_downloads as u64,
                "files={files} mbps={mbps} total={total}"
            );
        }
    }

    #[test]
    fn test_custom_policy_overrides_constants() {
        let policy = PlannerPolicy {
            headroom: 0.5,
            max_parallel: 2,
            min_parallel_mbps: 1.0,
            min_task_rate: 0,
        };
        let plan = policy.plan(5, 2, 4.0);
        assert_eq!(plan.max_parallel_downloads, 2);
        assert_eq!(plan.per_task_rate, mbps_to_bytes_per_sec(1.0));
    }

    #[test]
    fn test_mbps_to_bytes_per_sec() {
        assert_eq!(mbps_to_bytes_per_sec(8.0), 1_000_000);
        assert_eq!(mbps_to_bytes_per_sec(0.0), 0);
        assert_eq!(mbps_to_bytes_per_sec(-1.0), 0);
        assert_eq!(mbps_to_bytes_per_sec(f64::NAN), 0);
    }
}
