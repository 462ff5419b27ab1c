//! Configuration types.
//!
//! The top-level [`Config`] carries every knob the streaming core uses and is
//! handed to constructors explicitly. Every section defaults sensibly so a
//! completely empty document is valid.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub decoder: DecoderConfig,
    pub pipe: PipeConfig,
    pub source: SourceConfig,
    pub retry: RetryConfig,
    pub mirror: MirrorConfig,
    pub store: StoreConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.decoder.program.as_os_str().is_empty() {
            warnings.push("decoder.program is empty".into());
        }
        if !self.decoder.args.iter().any(|a| a == "pipe:0" || a == "-") {
            warnings.push(
                "decoder.args does not mention pipe:0; the decoder may not read stdin".into(),
            );
        }
        if self.pipe.buffer_pages == 0 {
            warnings.push("pipe.buffer_pages is 0; the platform default will be used".into());
        }
        if self.pipe.queue_chunks == 0 {
            warnings.push("pipe.queue_chunks is 0; at least one chunk must be queued".into());
        }
        if self.source.block_pages == 0 {
            warnings.push("source.block_pages is 0".into());
        }
        if self.source.stall_timeout_secs == 0 {
            warnings.push("source.stall_timeout_secs is 0; every read will stall".into());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            warnings.push("retry.base_delay_ms is larger than retry.max_delay_ms".into());
        }
        if self.store.dir.is_some() && self.mirror.dir.is_none() {
            warnings.push(
                "store.dir is set without mirror.dir; recorded items will have no local files"
                    .into(),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// External decoder process settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Program name (looked up in `PATH`) or absolute path.
    pub program: PathBuf,
    /// Arguments; the decoder reads segment bytes from stdin.
    pub args: Vec<String>,
    /// File receiving the decoder's stdout. Discarded when unset.
    pub output: Option<PathBuf>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            args: ["-hide_banner", "-loglevel", "error", "-i", "pipe:0", "-f", "null", "-"]
                .into_iter()
                .map(String::from)
                .collect(),
            output: None,
        }
    }
}

/// Pipe between feeder and decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Requested kernel buffer size, in pages.
    pub buffer_pages: usize,
    /// Chunks queued between the pump and the pipe writer.
    pub queue_chunks: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            buffer_pages: 256,
            queue_chunks: 8,
        }
    }
}

/// Segment source settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Streaming block size, in pages.
    pub block_pages: usize,
    /// Seconds without data before a remote read counts as stalled.
    pub stall_timeout_secs: u64,
    /// Seconds between download progress log lines.
    pub progress_interval_secs: u64,
    /// Extra headers sent with every remote request (User-Agent, Referer, ...).
    pub headers: BTreeMap<String, String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            block_pages: 32,
            stall_timeout_secs: 10,
            progress_interval_secs: 5,
            headers: BTreeMap::new(),
        }
    }
}

impl SourceConfig {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

/// Retry/backoff for transient network failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Disk mirror of streamed bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Directory receiving one file per segment. Mirroring is off when unset.
    pub dir: Option<PathBuf>,
}

/// Persistence of finished items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Item directory holding `segments.json` / `info.json`.
    pub dir: Option<PathBuf>,
}

/// Optional overrides for external tool paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffplay_path: Option<PathBuf>,
}
