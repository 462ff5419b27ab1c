//! Segment source streamed over HTTP with resumable ranged requests.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use sp_core::{ByteRange, Error, Result, Segment};
use tokio::time::timeout;

use super::SourceSettings;
use crate::progress::TransferStats;
use crate::retry::RetryPolicy;

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Streams a segment over HTTP.
///
/// Every request carries a `Range` header. After a transient failure the
/// source asks its [`RetryPolicy`] and, if allowed, re-requests from the
/// first byte it has not delivered yet. A server that ignores the range and
/// answers `200` gets its leading bytes dropped.
pub struct RemoteSource {
    client: Client,
    url: String,
    segment: String,
    settings: SourceSettings,
    retry: Arc<dyn RetryPolicy>,
    range: ByteRange,
    /// Hard limit from a bounded range.
    cap: Option<u64>,
    /// Used to detect truncated bodies.
    expected: Option<u64>,
    /// Bytes accepted from the server so far.
    received: u64,
    body: Option<BodyStream>,
    skip: u64,
    pending: Bytes,
    retries: u32,
    stats: TransferStats,
    finished: bool,
}

impl fmt::Debug for RemoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSource")
            .field("url", &self.url)
            .field("segment", &self.segment)
            .field("received", &self.received)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl RemoteSource {
    /// Issue the initial request. Connection failures go through the retry
    /// policy; a non-success status fails immediately.
    pub async fn open(
        segment: &Segment,
        url: &str,
        client: Client,
        settings: SourceSettings,
        retry: Arc<dyn RetryPolicy>,
    ) -> Result<Self> {
        let range = segment.range.unwrap_or_default();
        if range.is_inverted() {
            return Err(Error::source_read(
                &segment.file_name,
                format!("range {} ends before it starts", range.to_header_value()),
            ));
        }
        let expected = segment.expected_len();
        let stats = TransferStats::new(expected, settings.progress_interval);

        let mut source = Self {
            client,
            url: url.to_string(),
            segment: segment.file_name.clone(),
            settings,
            retry,
            range,
            cap: range.len(),
            expected,
            received: 0,
            body: None,
            skip: 0,
            pending: Bytes::new(),
            retries: 0,
            stats,
            finished: false,
        };

        while let Err(e) = source.connect().await {
            source.handle_failure(e).await?;
        }
        Ok(source)
    }

    /// Total retries performed so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(self.settings.block_size.max(1));
                return Ok(Some(self.pending.split_to(n)));
            }
            if self.finished {
                return Ok(None);
            }
            if self.cap.is_some_and(|cap| self.received >= cap) {
                self.finish();
                return Ok(None);
            }

            let Some(body) = self.body.as_mut() else {
                if let Err(e) = self.connect().await {
                    self.handle_failure(e).await?;
                }
                continue;
            };

            let next = timeout(self.settings.stall_timeout, body.next()).await;
            match next {
                Ok(Some(Ok(frame))) => self.accept(frame),
                Ok(Some(Err(e))) => {
                    let err = Error::network(&self.segment, e);
                    self.handle_failure(err).await?;
                }
                Ok(None) => {
                    if let Some(expected) = self.expected {
                        if self.received < expected {
                            let err = Error::network(
                                &self.segment,
                                format!("body ended after {} of {expected} bytes", self.received),
                            );
                            self.handle_failure(err).await?;
                            continue;
                        }
                    }
                    self.finish();
                    return Ok(None);
                }
                Err(_) => {
                    tracing::warn!(
                        segment = %self.segment,
                        waited = ?self.settings.stall_timeout,
                        progress = %self.stats.snapshot(),
                        "Download stalled"
                    );
                    let err = Error::Stalled {
                        segment: self.segment.clone(),
                        waited: self.settings.stall_timeout,
                    };
                    self.handle_failure(err).await?;
                }
            }
        }
    }

    /// Request everything from the first undelivered byte onwards.
    async fn connect(&mut self) -> Result<()> {
        let range = self.range.advanced(self.received);
        let request = self
            .client
            .get(&self.url)
            .headers(self.settings.headers.clone())
            .header(RANGE, range.to_header_value());

        let response = match timeout(self.settings.stall_timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(Error::network(&self.segment, e)),
            Err(_) => {
                return Err(Error::Stalled {
                    segment: self.segment.clone(),
                    waited: self.settings.stall_timeout,
                })
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        self.skip = if status == StatusCode::PARTIAL_CONTENT {
            0
        } else {
            range.start
        };
        if self.skip > 0 {
            tracing::debug!(segment = %self.segment, skip = self.skip, "Server ignored Range; skipping leading bytes");
        }

        tracing::debug!(
            segment = %self.segment,
            url = %self.url,
            status = status.as_u16(),
            range = %range.to_header_value(),
            "Remote segment connected"
        );
        self.body = Some(Box::pin(response.bytes_stream()));
        Ok(())
    }

    fn accept(&mut self, mut frame: Bytes) {
        if self.skip > 0 {
            let n = (self.skip.min(frame.len() as u64)) as usize;
            let _ = frame.split_to(n);
            self.skip -= n as u64;
        }
        if let Some(cap) = self.cap {
            let room = cap.saturating_sub(self.received);
            if (frame.len() as u64) > room {
                frame.truncate(room as usize);
            }
        }
        if frame.is_empty() {
            return;
        }

        self.received += frame.len() as u64;
        self.stats.record(frame.len());
        if let Some(report) = self.stats.take_report() {
            tracing::info!(segment = %self.segment, "Downloading: {report}");
        }
        self.pending = frame;
    }

    /// Drop the broken connection and either back off or give up.
    async fn handle_failure(&mut self, error: Error) -> Result<()> {
        self.body = None;
        if !self.retry.should_retry(&error, self.retries) {
            tracing::warn!(
                segment = %self.segment,
                retries = self.retries,
                error = %error,
                "Remote segment failed"
            );
            return Err(error);
        }

        let delay = self.retry.delay_for_attempt(self.retries);
        self.retries += 1;
        tracing::warn!(
            segment = %self.segment,
            attempt = self.retries,
            offset = self.received,
            delay = ?delay,
            error = %error,
            "Retrying remote segment"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
        self.body = None;
        tracing::info!(
            segment = %self.segment,
            bytes = self.received,
            elapsed = ?self.stats.elapsed(),
            avg = %format!("{}/s", crate::progress::human_bytes(self.stats.average_speed())),
            "Remote segment downloaded"
        );
    }
}
