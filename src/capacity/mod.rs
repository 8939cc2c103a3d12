//! Network capacity estimation from host interface counters.
//!
//! The estimate is deliberately simple: read the cumulative received-byte
//! counters of the active interfaces, wait a fixed window, read them again,
//! and divide the delta by the elapsed time. It approximates the traffic the
//! link is currently carrying, which is what the planner splits between
//! concurrent transfers.
//!
//! The estimator fails closed: with no active interface it reports 0 Mbps,
//! which the planner turns into sequential mode.

use std::fmt::Debug;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sysinfo::Networks;
use tracing::{debug, instrument, warn};

/// Default sampling window between the two counter reads.
pub const DEFAULT_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Source of cumulative received-byte counters.
///
/// Returns `None` when no active interface exists.
pub trait CounterSource: Send {
    /// Reads the current cumulative number of received bytes.
    fn received_bytes(&mut self) -> Option<u64>;
}

/// Counter source backed by the operating system's interface statistics.
///
/// Loopback and interfaces that never carried traffic are ignored.
pub struct SystemCounters {
    networks: Networks,
}

impl Default for SystemCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCounters {
    /// Creates a counter source with a freshly enumerated interface list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
        }
    }
}

impl CounterSource for SystemCounters {
    fn received_bytes(&mut self) -> Option<u64> {
        self.networks.refresh();

        let mut active = false;
        let mut total: u64 = 0;
        for (name, data) in &self.networks {
            if is_loopback(name) {
                continue;
            }
            if data.total_received() == 0 && data.total_transmitted() == 0 {
                continue;
            }
            active = true;
            total = total.saturating_add(data.total_received());
        }

        active.then_some(total)
    }
}

fn is_loopback(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "lo" || lower.starts_with("lo0") || lower.contains("loopback")
}

/// Blocking throughput estimator over a [`CounterSource`].
pub struct CapacityEstimator<S> {
    source: S,
    window: Duration,
}

impl<S: CounterSource> CapacityEstimator<S> {
    /// Creates an estimator sampling `source` over `window`.
    pub fn new(source: S, window: Duration) -> Self {
        Self { source, window }
    }

    /// Measures the approximate current throughput in megabits per second.
    ///
    /// Blocks the calling thread for the sampling window. Returns 0.0 when no
    /// active interface is found or the counters went backwards (interface
    /// reset between reads).
    pub fn measure(&mut self) -> f64 {
        let Some(start) = self.source.received_bytes() else {
            debug!("no active network interface, estimating 0 Mbps");
            return 0.0;
        };
        let started = Instant::now();
        std::thread::sleep(self.window);
        let Some(end) = self.source.received_bytes() else {
            debug!("network interface disappeared during sampling");
            return 0.0;
        };

        let elapsed = started.elapsed().as_secs_f64();
        if elapsed <= 0.0 || end < start {
            return 0.0;
        }

        #[allow(clippy::cast_precision_loss)]
        let bits = (end - start) as f64 * 8.0;
        round_mbps(bits / elapsed / 1_000_000.0)
    }
}

fn round_mbps(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Async seam used by the tenant coordinator to obtain one estimate per cycle.
#[async_trait]
pub trait CapacityProbe: Send + Sync + Debug {
    /// Returns the estimated capacity in megabits per second.
    async fn estimate_mbps(&self) -> f64;
}

/// Production probe: samples [`SystemCounters`] on the blocking pool.
#[derive(Debug, Clone, Copy)]
pub struct SamplingProbe {
    window: Duration,
}

impl Default for SamplingProbe {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_WINDOW)
    }
}

impl SamplingProbe {
    /// Creates a probe with the given sampling window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window }
    }
}

#[async_trait]
impl CapacityProbe for SamplingProbe {
    #[instrument(skip(self), fields(window_ms = self.window.as_millis()))]
    async fn estimate_mbps(&self) -> f64 {
        let window = self.window;
        match tokio::task::spawn_blocking(move || {
            CapacityEstimator::new(SystemCounters::new(), window).measure()
        })
        .await
        {
            Ok(mbps) => mbps,
            Err(e) => {
                warn!(error = %e, "capacity sampling task failed, estimating 0 Mbps");
                0.0
            }
        }
    }
}

/// Probe that always reports the same capacity.
///
/// Used when the operator pins the link speed in configuration, and in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedCapacity(pub f64);

#[async_trait]
impl CapacityProbe for FixedCapacity {
    async fn estimate_mbps(&self) -> f64 {
        self.0.max(0.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct ScriptedCounters {
        readings: Vec<Option<u64>>,
    }

    impl CounterSource for ScriptedCounters {
        fn received_bytes(&mut self) -> Option<u64> {
            if self.readings.is_empty() {
                None
            } else {
                self.readings.remove(0)
            }
        }
    }

    fn estimator(readings: Vec<Option<u64>>, window_ms: u64) -> CapacityEstimator<ScriptedCounters> {
        CapacityEstimator::new(
            ScriptedCounters { readings },
            Duration::from_millis(window_ms),
        )
    }

    #[test]
    fn test_measure_no_interface_fails_closed() {
        assert!(estimator(vec![None], 1).measure().abs() < f64::EPSILON);
    }

    #[test]
    fn test_measure_interface_lost_during_window() {
        assert!(estimator(vec![Some(1_000), None], 1).measure().abs() < f64::EPSILON);
    }

    #[test]
    fn test_measure_counter_reset_reports_zero() {
        assert!(
            estimator(vec![Some(5_000_000), Some(10)], 1)
                .measure()
                .abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn test_measure_upper_bounded_by_window() {
        // 2.5 MB over >= 200ms is at most 100 Mbps.
        let mbps = estimator(vec![Some(0), Some(2_500_000)], 200).measure();
        assert!(mbps > 0.0);
        assert!(mbps <= 100.0, "got {mbps}");
    }

    #[test]
    fn test_is_loopback() {
        assert!(is_loopback("lo"));
        assert!(is_loopback("lo0"));
        assert!(is_loopback("Loopback Pseudo-Interface 1"));
        assert!(!is_loopback("eth0"));
        assert!(!is_loopback("wlan0"));
    }

    #[test]
    fn test_round_mbps_two_decimals() {
        assert!((round_mbps(4.666_666) - 4.67).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fixed_capacity_clamps_negative() {
        assert!(FixedCapacity(-3.0).estimate_mbps().await.abs() < f64::EPSILON);
        assert!((FixedCapacity(20.0).estimate_mbps().await - 20.0).abs() < f64::EPSILON);
    }
}
