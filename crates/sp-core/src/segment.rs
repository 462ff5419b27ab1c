//! Segment descriptors and the manifest format exchanged with the
//! collaborator that resolves playable locations.
//!
//! A [`Segment`] is immutable once built. Its position in a segment list is
//! its playback order. Descriptor fields this crate does not understand
//! (format, duration, backup URLs, ...) are kept in [`Segment::extra`] and
//! written back unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::media::VideoInfo;

/// Where a segment's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// A file on local disk.
    Path(PathBuf),
    /// A remote HTTP(S) resource.
    Url(String),
}

impl Locator {
    /// Whether the bytes are fetched over the network.
    pub fn is_remote(&self) -> bool {
        matches!(self, Locator::Url(_))
    }
}

/// Inclusive byte range of a resource, rendered as an HTTP `Range` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// Open-ended range starting at `start`.
    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Number of bytes covered, when the end is known.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.start) + 1)
    }

    /// Whether the end lies before the start.
    pub fn is_inverted(&self) -> bool {
        self.end.is_some_and(|end| end < self.start)
    }

    /// The same range with its start moved forward by `consumed` bytes.
    pub fn advanced(&self, consumed: u64) -> Self {
        Self {
            start: self.start + consumed,
            end: self.end,
        }
    }

    /// `Range` header value, e.g. `bytes=0-` or `bytes=100-199`.
    pub fn to_header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// One independently fetchable piece of a media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SegmentRecord", into = "SegmentRecord")]
pub struct Segment {
    pub id: u32,
    pub locator: Locator,
    /// Total size in bytes, when the collaborator knows it.
    pub size: Option<u64>,
    pub range: Option<ByteRange>,
    /// Bare file name used for mirrors and recorded items.
    pub file_name: String,
    /// Opaque descriptor fields passed through untouched.
    pub extra: Map<String, Value>,
}

impl Segment {
    /// A segment read from a local file.
    pub fn local(id: u32, path: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            id,
            locator: Locator::Path(path.into()),
            size: None,
            range: None,
            file_name: file_name.into(),
            extra: Map::new(),
        }
    }

    /// A segment fetched from a URL.
    pub fn remote(id: u32, url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            id,
            locator: Locator::Url(url.into()),
            size: None,
            range: None,
            file_name: file_name.into(),
            extra: Map::new(),
        }
    }

    /// Builder: set the known total size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Builder: restrict the segment to a byte range.
    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Number of bytes this segment is expected to deliver, if known.
    ///
    /// A bounded range wins over the advertised size; an open-ended range
    /// delivers the size minus its start offset.
    pub fn expected_len(&self) -> Option<u64> {
        match self.range {
            Some(range) => range
                .len()
                .or_else(|| self.size.map(|size| size.saturating_sub(range.start))),
            None => self.size,
        }
    }

    /// The same segment re-pointed at `dir/file_name` on local disk.
    pub fn relocated_to(&self, dir: &Path) -> Self {
        Self {
            locator: Locator::Path(dir.join(&self.file_name)),
            range: None,
            ..self.clone()
        }
    }
}

/// Wire form of [`Segment`]: exactly one of `url` / `path`.
#[derive(Serialize, Deserialize)]
struct SegmentRecord {
    #[serde(default)]
    id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    range: Option<ByteRange>,
    file_name: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<SegmentRecord> for Segment {
    type Error = String;

    fn try_from(record: SegmentRecord) -> std::result::Result<Self, Self::Error> {
        let locator = match (record.url, record.path) {
            (Some(url), None) => Locator::Url(url),
            (None, Some(path)) => Locator::Path(path),
            (Some(_), Some(_)) => {
                return Err(format!(
                    "segment '{}' has both url and path",
                    record.file_name
                ))
            }
            (None, None) => {
                return Err(format!(
                    "segment '{}' has neither url nor path",
                    record.file_name
                ))
            }
        };

        Ok(Self {
            id: record.id,
            locator,
            size: record.size,
            range: record.range,
            file_name: record.file_name,
            extra: record.extra,
        })
    }
}

impl From<Segment> for SegmentRecord {
    fn from(segment: Segment) -> Self {
        let (url, path) = match segment.locator {
            Locator::Url(url) => (Some(url), None),
            Locator::Path(path) => (None, Some(path)),
        };
        Self {
            id: segment.id,
            url,
            path,
            size: segment.size,
            range: segment.range,
            file_name: segment.file_name,
            extra: segment.extra,
        }
    }
}

/// A resolved media item: optional metadata plus segments in playback order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<VideoInfo>,
    pub segments: Vec<Segment>,
}

impl Manifest {
    /// Deserialize and validate a manifest from JSON.
    pub fn from_json(json_str: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("manifest parse error: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reject manifests that cannot be played or mirrored safely.
    pub fn validate(&self) -> Result<()> {
        if self.segments.is_empty() {
            return Err(Error::Validation("manifest has no segments".into()));
        }

        let mut seen = HashSet::new();
        for (i, segment) in self.segments.iter().enumerate() {
            let name = segment.file_name.as_str();
            if name.is_empty() {
                return Err(Error::Validation(format!("segments[{i}].file_name is empty")));
            }
            if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
                return Err(Error::Validation(format!(
                    "segments[{i}].file_name '{name}' must be a bare file name"
                )));
            }
            if let Some(range) = segment.range.filter(ByteRange::is_inverted) {
                return Err(Error::Validation(format!(
                    "segments[{i}].range {} ends before it starts",
                    range.to_header_value()
                )));
            }
            if !seen.insert(name) {
                return Err(Error::Validation(format!(
                    "segments[{i}].file_name '{name}' is duplicated"
                )));
            }
        }

        Ok(())
    }
}
