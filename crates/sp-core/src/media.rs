//! Media metadata carried alongside a segment list.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Descriptive metadata for the media item a segment list belongs to.
///
/// Produced by the scraping collaborator and passed through untouched;
/// sessions only project it (title, duration, uploader).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoInfo {
    /// Page URL the item was resolved from.
    pub url: String,
    pub title: String,
    /// Total duration in whole seconds.
    pub duration_secs: u64,
    pub uploader: String,
    pub description: String,
}

impl VideoInfo {
    /// Create metadata with the fields sessions project.
    pub fn new(title: impl Into<String>, duration: Duration, uploader: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            duration_secs: duration.as_secs(),
            uploader: uploader.into(),
            ..Self::default()
        }
    }

    /// Total duration.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}
