//! Constants for the download module (timeouts, chunking, retry bounds).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default per-read HTTP timeout (5 minutes).
///
/// Applied between body reads rather than to the whole request, since a
/// throttled multi-gigabyte package legitimately takes hours.
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Write granularity of the throttled writer (8 KiB).
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Maximum transfer attempts per file per cycle.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Base of the linear backoff between incomplete attempts.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Raw timestamps above this value are milliseconds since epoch, at or
/// below it seconds since epoch.
pub const MILLIS_THRESHOLD: i64 = 9_999_999_999;

/// Custom response header carrying the server last-modified timestamp.
pub const LAST_MODIFIED_TIME_HEADER: &str = "lastmodifiedtime";

/// Query parameter carrying the file name.
pub const FILE_NAME_PARAM: &str = "fileName";

/// Query parameter carrying the modified-since filter.
pub const LAST_MODIFIED_PARAM: &str = "lastModifiedTime";
