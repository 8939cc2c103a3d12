//! Tenant orchestration: authentication, file discovery, the per-tenant
//! cycle, and the periodic loop around it.
//!
//! ```text
//! SyncScheduleLoop ──▶ TenantSyncCoordinator ──▶ Authenticator
//!                                            ├─▶ FileDiscovery
//!                                            ├─▶ CapacityProbe ─▶ planner
//!                                            └─▶ ResumableDownloader (× plan)
//! ```

mod auth;
mod coordinator;
mod discovery;
mod error;
mod report;
mod schedule;

pub use auth::{Authenticator, DeviceInfo, HttpAuthenticator};
pub use coordinator::TenantSyncCoordinator;
pub use discovery::{FileDiscovery, HttpFileDiscovery, StaticFileList};
pub use error::SyncError;
pub use report::{ActiveTransfer, FileReport, TenantSyncReport, TransferStats};
pub use schedule::{SyncScheduleLoop, TenantSyncState};
