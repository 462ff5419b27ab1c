//! Recording finished items for later "already downloaded" detection.
//!
//! An item directory holds the mirrored segment files plus two JSON
//! documents: `info.json` (metadata) and `segments.json` (the segment list).
//! `segments.json` is written last, so its presence marks a complete record.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sp_core::{Error, Result, Segment, VideoInfo};

pub const SEGMENTS_FILE: &str = "segments.json";
pub const INFO_FILE: &str = "info.json";

/// A fully played item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    pub info: VideoInfo,
    pub segments: Vec<Segment>,
    pub recorded_at: DateTime<Utc>,
}

impl StoredItem {
    pub fn new(info: VideoInfo, segments: Vec<Segment>) -> Self {
        Self {
            info,
            segments,
            recorded_at: Utc::now(),
        }
    }
}

/// Persistence collaborator, called once after every segment succeeded.
#[async_trait]
pub trait SegmentStore: Send + Sync {
    async fn record(&self, item: &StoredItem) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct InfoDocument {
    #[serde(flatten)]
    info: VideoInfo,
    recorded_at: DateTime<Utc>,
}

/// Stores an item as JSON next to its mirrored files.
#[derive(Debug, Clone)]
pub struct JsonSegmentStore {
    dir: PathBuf,
}

impl JsonSegmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_recorded(&self) -> bool {
        self.dir.join(SEGMENTS_FILE).is_file()
    }

    /// Read the recorded item.
    pub async fn load(&self) -> Result<StoredItem> {
        let raw = tokio::fs::read(self.dir.join(SEGMENTS_FILE))
            .await
            .map_err(|e| Error::store(format!("reading {SEGMENTS_FILE}: {e}")))?;
        let segments: Vec<Segment> = serde_json::from_slice(&raw)
            .map_err(|e| Error::store(format!("parsing {SEGMENTS_FILE}: {e}")))?;

        let info_path = self.dir.join(INFO_FILE);
        let document = match tokio::fs::read(&info_path).await {
            Ok(raw) => serde_json::from_slice::<InfoDocument>(&raw)
                .map_err(|e| Error::store(format!("parsing {INFO_FILE}: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => InfoDocument {
                info: VideoInfo::default(),
                recorded_at: Utc::now(),
            },
            Err(e) => return Err(Error::store(format!("reading {INFO_FILE}: {e}"))),
        };

        Ok(StoredItem {
            info: document.info,
            segments,
            recorded_at: document.recorded_at,
        })
    }

    /// The recorded segments re-pointed at their files in this directory.
    ///
    /// `None` when nothing is recorded or any file has gone missing.
    pub async fn local_segments(&self) -> Result<Option<(VideoInfo, Vec<Segment>)>> {
        if !self.is_recorded() {
            return Ok(None);
        }
        let item = self.load().await?;
        let segments: Vec<Segment> = item
            .segments
            .iter()
            .map(|s| s.relocated_to(&self.dir))
            .collect();

        for segment in &segments {
            let path = self.dir.join(&segment.file_name);
            if !path.is_file() {
                tracing::info!(
                    path = %path.display(),
                    "Recorded segment file is missing; item must be fetched again"
                );
                return Ok(None);
            }
        }
        Ok(Some((item.info, segments)))
    }

    async fn write_atomic(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        let target = self.dir.join(name);
        let temp = self.dir.join(format!(".{name}.tmp"));
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| Error::store(format!("writing {}: {e}", temp.display())))?;
        tokio::fs::rename(&temp, &target)
            .await
            .map_err(|e| Error::store(format!("renaming to {}: {e}", target.display())))
    }
}

#[async_trait]
impl SegmentStore for JsonSegmentStore {
    async fn record(&self, item: &StoredItem) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::store(format!("creating {}: {e}", self.dir.display())))?;

        let info = serde_json::to_vec_pretty(&InfoDocument {
            info: item.info.clone(),
            recorded_at: item.recorded_at,
        })
        .map_err(|e| Error::store(format!("serializing {INFO_FILE}: {e}")))?;
        let segments = serde_json::to_vec_pretty(&item.segments)
            .map_err(|e| Error::store(format!("serializing {SEGMENTS_FILE}: {e}")))?;

        self.write_atomic(INFO_FILE, info).await?;
        self.write_atomic(SEGMENTS_FILE, segments).await?;

        tracing::info!(
            dir = %self.dir.display(),
            segments = item.segments.len(),
            "Item recorded"
        );
        Ok(())
    }
}
