//! Per-segment byte sources.
//!
//! A source is created fresh for every segment (and every playback attempt)
//! and yields a finite, non-restartable sequence of chunks.

mod local;
mod remote;

pub use local::LocalSource;
pub use remote::RemoteSource;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sp_core::config::Config;
use sp_core::{Error, Locator, Result, Segment};

use crate::retry::{ExponentialBackoff, RetryPolicy};

/// A lazy, finite sequence of byte chunks.
#[async_trait]
pub trait ChunkSource: Send {
    /// The next chunk, or `None` once the segment is exhausted.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

/// Creates a fresh source for a segment.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, segment: &Segment) -> Result<Box<dyn ChunkSource>>;
}

/// The two built-in sources.
#[derive(Debug)]
pub enum SegmentSource {
    Local(LocalSource),
    Remote(RemoteSource),
}

#[async_trait]
impl ChunkSource for SegmentSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self {
            SegmentSource::Local(source) => source.next_chunk().await,
            SegmentSource::Remote(source) => source.next_chunk().await,
        }
    }
}

/// Tuning shared by all sources.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Maximum chunk size.
    pub block_size: usize,
    /// Remote reads without data for this long count as stalled.
    pub stall_timeout: Duration,
    pub progress_interval: Duration,
    /// Sent with every remote request.
    pub headers: HeaderMap,
}

impl SourceSettings {
    /// Build from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for header names or values HTTP cannot
    /// carry.
    pub fn from_config(config: &sp_core::config::SourceConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Validation(format!("source.headers: invalid name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Validation(format!("source.headers: invalid value for '{name}': {e}")))?;
            headers.insert(name, value);
        }

        Ok(Self {
            block_size: config.block_pages.max(1) * sp_av::page_size(),
            stall_timeout: config.stall_timeout(),
            progress_interval: config.progress_interval(),
            headers,
        })
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            block_size: 32 * sp_av::page_size(),
            stall_timeout: Duration::from_secs(10),
            progress_interval: Duration::from_secs(5),
            headers: HeaderMap::new(),
        }
    }
}

/// Default opener: local paths are read from disk, URLs fetched over HTTP.
#[derive(Debug, Clone)]
pub struct SegmentOpener {
    client: reqwest::Client,
    settings: SourceSettings,
    retry: Arc<dyn RetryPolicy>,
}

impl SegmentOpener {
    pub fn new(client: reqwest::Client, settings: SourceSettings, retry: Arc<dyn RetryPolicy>) -> Self {
        Self {
            client,
            settings,
            retry,
        }
    }

    /// Build from configuration with a fresh HTTP client.
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = SourceSettings::from_config(&config.source)?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        let retry = Arc::new(ExponentialBackoff::from_config(&config.retry));
        Ok(Self::new(client, settings, retry))
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    /// Open the concrete source for `segment`.
    pub async fn open_source(&self, segment: &Segment) -> Result<SegmentSource> {
        match &segment.locator {
            Locator::Path(path) => LocalSource::open(segment, path, self.settings.block_size)
                .await
                .map(SegmentSource::Local),
            Locator::Url(url) => RemoteSource::open(
                segment,
                url,
                self.client.clone(),
                self.settings.clone(),
                Arc::clone(&self.retry),
            )
            .await
            .map(SegmentSource::Remote),
        }
    }
}

#[async_trait]
impl SourceOpener for SegmentOpener {
    async fn open(&self, segment: &Segment) -> Result<Box<dyn ChunkSource>> {
        let source = self.open_source(segment).await?;
        Ok(Box::new(source))
    }
}
