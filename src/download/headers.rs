//! Response header interpretation: version tag, server timestamp and the
//! expected total length of a (possibly ranged) transfer.

use std::time::{Duration, SystemTime};

use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, ETAG, HeaderMap, LAST_MODIFIED};

use super::constants::{LAST_MODIFIED_TIME_HEADER, MILLIS_THRESHOLD};

/// What the downloader needs from one response's headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    /// Normalized `ETag`.
    pub version_tag: Option<String>,
    /// Raw server timestamp as persisted in the freshness record.
    pub last_modified_raw: Option<i64>,
    /// Server timestamp as a wall-clock time.
    pub last_modified: Option<SystemTime>,
    /// Parsed `Content-Range`, for 206 replies.
    pub content_range: Option<ContentRange>,
    /// `Content-Length` of this response body.
    pub content_length: Option<u64>,
}

impl ResponseMeta {
    /// Reads the relevant headers of a response.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let (last_modified_raw, last_modified) = parse_server_timestamp(headers).unzip();
        Self {
            version_tag: parse_version_tag(headers),
            last_modified_raw,
            last_modified,
            content_range: headers
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(ContentRange::parse),
            content_length: headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok()),
        }
    }

    /// Full size of the remote file once this response is written on top of
    /// `existing` bytes, or `None` when the server declared nothing.
    #[must_use]
    pub fn expected_total(&self, status: StatusCode, existing: u64) -> Option<u64> {
        if let Some(total) = self.content_range.and_then(|r| r.total) {
            return Some(total);
        }
        let length = self.content_length?;
        if status == StatusCode::PARTIAL_CONTENT {
            Some(existing.saturating_add(length))
        } else {
            Some(length)
        }
    }
}

/// A parsed `Content-Range: bytes <start>-<end>/<total|*>` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte offset of this body.
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
    /// Full resource length, when known.
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parses a `bytes` content range; unsatisfied (`*/N`) ranges yield `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (range, total) = rest.split_once('/')?;
        let (start, end) = range.split_once('-')?;
        let total = match total.trim() {
            "*" => None,
            n => Some(n.parse().ok()?),
        };
        Some(Self {
            start: start.trim().parse().ok()?,
            end: end.trim().parse().ok()?,
            total,
        })
    }
}

/// Normalizes the `ETag` header: weak prefix and quotes removed.
#[must_use]
pub fn parse_version_tag(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(ETAG)?.to_str().ok()?.trim();
    let raw = raw.strip_prefix("W/").unwrap_or(raw);
    let tag = raw.trim_matches('"');
    (!tag.is_empty()).then(|| tag.to_string())
}

/// Converts a raw epoch value into a wall-clock time.
///
/// Values above 9,999,999,999 are milliseconds, otherwise seconds. Zero or
/// negative values mean unknown.
#[must_use]
pub fn timestamp_to_system_time(raw: i64) -> Option<SystemTime> {
    let raw = u64::try_from(raw).ok().filter(|v| *v > 0)?;
    let offset = if raw > MILLIS_THRESHOLD.unsigned_abs() {
        Duration::from_millis(raw)
    } else {
        Duration::from_secs(raw)
    };
    SystemTime::UNIX_EPOCH.checked_add(offset)
}

/// Server last-modified from the custom `lastModifiedTime` header, falling
/// back to the standard `Last-Modified` HTTP date.
fn parse_server_timestamp(headers: &HeaderMap) -> Option<(i64, SystemTime)> {
    let custom = headers
        .get(LAST_MODIFIED_TIME_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|raw| timestamp_to_system_time(raw).map(|t| (raw, t)));
    if custom.is_some() {
        return custom;
    }

    let date = headers.get(LAST_MODIFIED)?.to_str().ok()?;
    let time = httpdate::parse_http_date(date).ok()?;
    let secs = time.duration_since(SystemTime::UNIX_EPOCH).ok()?.as_secs();
    Some((i64::try_from(secs).ok()?, time))
}
