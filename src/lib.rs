//! Packsync Core Library
//!
//! This library periodically pulls per-tenant geospatial data packages
//! (`.mmpk`, `.vtpk`, ...) from a remote file endpoint into a local cache,
//! over links of unpredictable quality.
//!
//! # Architecture
//!
//! The library is organized into the following modules, leaves first:
//! - [`capacity`] - Network throughput estimation from interface counters
//! - [`planner`] - Parallel/sequential decision and per-task byte-rate caps
//! - [`freshness`] - Persisted per-file version records (sidecar or SQLite)
//! - [`download`] - Resumable, throttled, bounded-retry file transfer
//! - [`sync`] - Per-tenant coordination and the outer schedule loop
//! - [`config`] - TOML configuration surface

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod capacity;
pub mod config;
pub mod download;
pub mod freshness;
pub mod planner;
pub mod sync;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use capacity::{
    CapacityEstimator, CapacityProbe, CounterSource, FixedCapacity, SamplingProbe, SystemCounters,
};
pub use config::{MetadataBackend, SyncConfig, TenantDescriptor, load_config};
pub use download::{
    DownloadError, DownloadOutcome, DownloadProgressState, DownloadRequest, FileWorkItem,
    HttpClient, ResumePolicy, ResumableDownloader, SkipReason,
};
pub use freshness::{
    FreshnessError, FreshnessRecord, FreshnessStore, ResumeMarker, SidecarStore, SqliteStore,
    is_up_to_date,
};
pub use planner::{PlannerPolicy, ThrottlePlan, plan};
pub use sync::{
    Authenticator, DeviceInfo, FileDiscovery, FileReport, HttpAuthenticator, HttpFileDiscovery,
    StaticFileList, SyncError, SyncScheduleLoop, TenantSyncCoordinator, TenantSyncReport,
    TenantSyncState,
};
