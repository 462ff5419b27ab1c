//! Turn a manifest plus configuration into a ready-to-run session.

use anyhow::{Context, Result};
use sp_av::{ProcessDecoder, ToolRegistry};
use sp_core::Manifest;
use sp_stream::{JsonSegmentStore, PlaybackSession, SegmentOpener};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;

/// Where a plan's segments come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    /// The segments listed in the manifest.
    Manifest,
    /// A copy recorded earlier in the item directory.
    Recorded,
}

impl fmt::Display for PlanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanSource::Manifest => write!(f, "manifest"),
            PlanSource::Recorded => write!(f, "recorded item"),
        }
    }
}

/// A session that has been built but not started.
#[derive(Debug)]
pub struct PlaybackPlan {
    pub session: PlaybackSession,
    pub source: PlanSource,
}

/// Read and validate a manifest file.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {:?}", path))?;
    Manifest::from_json(&content).with_context(|| format!("Invalid manifest: {:?}", path))
}

/// Build the session for `manifest`.
///
/// With an item directory (the argument, else `store.dir`), a complete copy
/// recorded there is played instead of the manifest's segments. Otherwise the
/// manifest is streamed, mirrored into the directory and recorded once every
/// segment has played. `mirror.dir` alone mirrors without recording.
pub async fn prepare(
    config: &Config,
    manifest: Manifest,
    item_dir: Option<&Path>,
) -> Result<PlaybackPlan> {
    let tools = ToolRegistry::discover(&config.tools);
    let decoder = Arc::new(
        ProcessDecoder::from_config(&config.decoder, &tools)
            .context("Failed to set up the decoder")?,
    );
    let opener = Arc::new(SegmentOpener::from_config(config).context("Invalid source settings")?);
    let item_dir: Option<PathBuf> = item_dir.map(Path::to_path_buf).or_else(|| config.store.dir.clone());

    if let Some(dir) = &item_dir {
        let store = JsonSegmentStore::new(dir);
        if let Some((recorded_info, segments)) = store
            .local_segments()
            .await
            .with_context(|| format!("Failed to read recorded item in {:?}", dir))?
        {
            tracing::info!(dir = %dir.display(), segments = segments.len(), "Playing recorded item");
            let info = manifest.info.unwrap_or(recorded_info);
            let session = PlaybackSession::builder(segments, decoder, opener)
                .with_metadata(info)
                .with_pipe(config.pipe.clone())
                .build();
            return Ok(PlaybackPlan {
                session,
                source: PlanSource::Recorded,
            });
        }
    }

    let mut builder = PlaybackSession::builder(manifest.segments, decoder, opener)
        .with_pipe(config.pipe.clone());
    if let Some(info) = manifest.info {
        builder = builder.with_metadata(info);
    }
    match (&item_dir, &config.mirror.dir) {
        (Some(dir), _) => {
            builder = builder
                .with_mirror_dir(dir)
                .with_store(Arc::new(JsonSegmentStore::new(dir)));
        }
        (None, Some(dir)) => builder = builder.with_mirror_dir(dir),
        (None, None) => {}
    }

    Ok(PlaybackPlan {
        session: builder.build(),
        source: PlanSource::Manifest,
    })
}
