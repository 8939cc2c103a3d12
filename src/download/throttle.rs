//! Per-task byte-rate throttling of body writes.
//!
//! The body is written in [`CHUNK_SIZE`] pieces. After each piece the
//! cumulative budget `bytes_written / rate` is compared with the time since
//! the transfer started and the shortfall is slept off, so the average
//! throughput never exceeds the configured rate. Cancellation is observed
//! before each piece and during each sleep; a piece is never written
//! half-way.
//!
//! Timing uses [`tokio::time::Instant`], so tests can drive it with paused
//! time.

use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::constants::CHUNK_SIZE;

/// Cumulative write budget for one transfer.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    rate: u64,
    started: Instant,
    budgeted: u64,
}

impl Throttle {
    /// Starts a budget of `bytes_per_sec`. Zero disables throttling.
    #[must_use]
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            rate: bytes_per_sec,
            started: Instant::now(),
            budgeted: 0,
        }
    }

    /// Returns the configured rate in bytes per second.
    #[must_use]
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Accounts for `bytes` more written and returns how long to sleep to
    /// stay within budget.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, bytes: u64) -> Option<Duration> {
        self.budgeted = self.budgeted.saturating_add(bytes);
        if self.rate == 0 {
            return None;
        }
        let budget = Duration::from_secs_f64(self.budgeted as f64 / self.rate as f64);
        budget
            .checked_sub(self.started.elapsed())
            .filter(|d| !d.is_zero())
    }
}

/// How a body stream ended.
#[derive(Debug)]
pub enum StreamEnd<E> {
    /// The server closed the body normally.
    Finished,
    /// The body broke off with an error after `bytes_written` bytes.
    Interrupted(E),
    /// The cancellation token fired.
    Cancelled,
}

/// Result of [`write_throttled`].
#[derive(Debug)]
pub struct WriteReport<E> {
    /// Body bytes written by this call.
    pub bytes_written: u64,
    /// Why writing stopped.
    pub end: StreamEnd<E>,
}

/// Streams `body` into `writer` under `throttle`.
///
/// Body errors and cancellation are reported in [`WriteReport::end`]; only
/// local write failures are returned as `Err`.
///
/// # Errors
///
/// Returns the IO error of a failed write or flush.
pub async fn write_throttled<W, S, B, E>(
    writer: &mut W,
    mut body: S,
    throttle: &mut Throttle,
    cancel: &CancellationToken,
) -> std::io::Result<WriteReport<E>>
where
    W: AsyncWrite + Unpin,
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut bytes_written: u64 = 0;

    let end = 'body: loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break 'body StreamEnd::Cancelled,
            next = body.next() => next,
        };
        let chunk = match next {
            None => break StreamEnd::Finished,
            Some(Err(e)) => break StreamEnd::Interrupted(e),
            Some(Ok(chunk)) => chunk,
        };

        for piece in chunk.as_ref().chunks(CHUNK_SIZE) {
            if cancel.is_cancelled() {
                break 'body StreamEnd::Cancelled;
            }
            writer.write_all(piece).await?;
            bytes_written += piece.len() as u64;

            if let Some(delay) = throttle.record(piece.len() as u64) {
                trace!(delay_ms = delay.as_millis(), "throttle sleep");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break 'body StreamEnd::Cancelled,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    };

    writer.flush().await?;
    Ok(WriteReport { bytes_written, end })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_precision_loss)]
mod tests {
    use futures_util::stream;

    use super::*;

    fn body(chunks: Vec<Vec<u8>>) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Unpin {
        stream::iter(chunks.into_iter().map(Ok))
    }

    // ==================== Throttle Budget Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_record_returns_shortfall() {
        let mut throttle = Throttle::new(1000);
        let delay = throttle.record(500).unwrap();
        assert_eq!(delay, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_no_sleep_when_behind_budget() {
        let mut throttle = Throttle::new(1000);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(throttle.record(1000), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_is_unthrottled() {
        let mut throttle = Throttle::new(0);
        assert_eq!(throttle.record(u64::from(u32::MAX)), None);
    }

    // ==================== Writer Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_write_throttled_respects_rate() {
        let rate = 64 * 1024;
        let payload = vec![7u8; 256 * 1024];
        let mut out = Vec::new();
        let mut throttle = Throttle::new(rate);
        let started = Instant::now();

        let report = write_throttled(
            &mut out,
            body(vec![payload.clone()]),
            &mut throttle,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let elapsed = started.elapsed().as_secs_f64();
        assert!(matches!(report.end, StreamEnd::Finished));
        assert_eq!(report.bytes_written, payload.len() as u64);
        assert_eq!(out, payload);
        let throughput = report.bytes_written as f64 / elapsed;
        assert!(
            throughput <= rate as f64 * 1.1,
            "throughput {throughput} exceeds rate {rate}"
        );
    }

    #[tokio::test]
    async fn test_write_rechunks_large_pieces() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(CHUNK_SIZE * 3 + 17).collect();
        let mut out = Vec::new();
        let report = write_throttled(
            &mut out,
            body(vec![payload.clone()]),
            &mut Throttle::new(0),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(report.bytes_written, payload.len() as u64);
        assert_eq!(out, payload);
    }

    #[tokio::test]
    async fn test_body_error_reports_interrupted() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(vec![1u8; 100]),
            Err(std::io::Error::other("connection reset")),
            Ok(vec![2u8; 100]),
        ];
        let mut out = Vec::new();
        let report = write_throttled(
            &mut out,
            stream::iter(chunks),
            &mut Throttle::new(0),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(matches!(report.end, StreamEnd::Interrupted(_)));
        assert_eq!(report.bytes_written, 100);
        assert_eq!(out.len(), 100);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_chunk_writes_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut out = Vec::new();
        let report = write_throttled(
            &mut out,
            body(vec![vec![1u8; 10]]),
            &mut Throttle::new(0),
            &cancel,
        )
        .await
        .unwrap();
        assert!(matches!(report.end, StreamEnd::Cancelled));
        assert_eq!(report.bytes_written, 0);
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_throttle_sleep_keeps_whole_pieces() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        // 1 KiB/s: each 8 KiB piece earns an 8 s sleep.
        let mut out = Vec::new();
        let report = write_throttled(
            &mut out,
            body(vec![vec![3u8; CHUNK_SIZE * 4]]),
            &mut Throttle::new(1024),
            &cancel,
        )
        .await
        .unwrap();

        assert!(matches!(report.end, StreamEnd::Cancelled));
        assert_eq!(report.bytes_written, CHUNK_SIZE as u64);
        assert_eq!(out.len(), CHUNK_SIZE);
    }
}
