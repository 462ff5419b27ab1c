//! Caller-facing playback handle.
//!
//! A [`PlaybackSession`] owns a segment list and runs the feeder as one
//! background task. However the task ends (all segments played, stopped, or
//! failed) the after-callback fires exactly once, after the final state has
//! been recorded.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sp_av::Decoder;
use sp_core::config::PipeConfig;
use sp_core::events::{EventBus, EventPayload, SessionOutcome};
use sp_core::{Error, Result, Segment, SessionId, VideoInfo};
use tokio::sync::watch;

use crate::callback::AfterCallback;
use crate::feeder::{FeedOutcome, SegmentFeeder, SegmentPhase};
use crate::source::SourceOpener;
use crate::store::{SegmentStore, StoredItem};

/// Lifecycle of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

impl SessionState {
    /// Whether the session has settled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed(_)
        )
    }
}

struct Inner {
    id: SessionId,
    segments: Vec<Segment>,
    metadata: Option<VideoInfo>,
    feeder: SegmentFeeder,
    store: Option<Arc<dyn SegmentStore>>,
    after: Mutex<Option<AfterCallback>>,
    events: Option<Arc<EventBus>>,
    started: AtomicBool,
    state: Mutex<SessionState>,
    settled: watch::Sender<bool>,
}

/// Cheaply clonable handle to one playback of a segment list.
#[derive(Clone)]
pub struct PlaybackSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("id", &self.inner.id)
            .field("segments", &self.inner.segments.len())
            .field("state", &self.state())
            .field("feeder", &self.inner.feeder)
            .finish_non_exhaustive()
    }
}

/// Builder for [`PlaybackSession`].
pub struct SessionBuilder {
    segments: Vec<Segment>,
    decoder: Arc<dyn Decoder>,
    opener: Arc<dyn SourceOpener>,
    pipe: PipeConfig,
    metadata: Option<VideoInfo>,
    mirror_dir: Option<PathBuf>,
    store: Option<Arc<dyn SegmentStore>>,
    after: Option<AfterCallback>,
    events: Option<Arc<EventBus>>,
}

impl SessionBuilder {
    pub fn with_metadata(mut self, info: VideoInfo) -> Self {
        self.metadata = Some(info);
        self
    }

    /// Mirror each segment into `dir/<file_name>`.
    pub fn with_mirror_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mirror_dir = Some(dir.into());
        self
    }

    /// Record the item once every segment has played.
    pub fn with_store(mut self, store: Arc<dyn SegmentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_after(mut self, after: AfterCallback) -> Self {
        self.after = Some(after);
        self
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn with_pipe(mut self, pipe: PipeConfig) -> Self {
        self.pipe = pipe;
        self
    }

    /// Chunks buffered between the source and the pipe writer.
    pub fn with_queue_depth(mut self, chunks: usize) -> Self {
        self.pipe.queue_chunks = chunks;
        self
    }

    pub fn build(self) -> PlaybackSession {
        let id = SessionId::new();
        let mut feeder = SegmentFeeder::new(self.decoder, self.opener, self.pipe);
        if let Some(dir) = self.mirror_dir {
            feeder = feeder.with_mirror_dir(dir);
        }
        if let Some(bus) = &self.events {
            feeder = feeder.with_events(Arc::clone(bus), id);
        }
        let (settled, _) = watch::channel(false);

        PlaybackSession {
            inner: Arc::new(Inner {
                id,
                segments: self.segments,
                metadata: self.metadata,
                feeder,
                store: self.store,
                after: Mutex::new(self.after),
                events: self.events,
                started: AtomicBool::new(false),
                state: Mutex::new(SessionState::Idle),
                settled,
            }),
        }
    }
}

impl PlaybackSession {
    pub fn builder(
        segments: Vec<Segment>,
        decoder: Arc<dyn Decoder>,
        opener: Arc<dyn SourceOpener>,
    ) -> SessionBuilder {
        SessionBuilder {
            segments,
            decoder,
            opener,
            pipe: PipeConfig::default(),
            metadata: None,
            mirror_dir: None,
            store: None,
            after: None,
            events: None,
        }
    }

    /// Start playback on the current tokio runtime and return immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::Internal`] when called outside a tokio runtime.
    /// - [`Error::AlreadyRunning`] when the session was already started.
    pub fn run(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("run() requires a tokio runtime: {e}")))?;
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }

        *self.inner.state.lock() = SessionState::Running;
        tracing::info!(
            session = %self.inner.id,
            segments = self.inner.segments.len(),
            title = %self.title(),
            "Playback started"
        );

        let session = self.clone();
        runtime.spawn(async move { session.drive().await });
        Ok(())
    }

    /// Cancel playback. Idempotent; a no-op once the session has settled.
    ///
    /// Calling this before `run()` makes the run settle as cancelled without
    /// opening a pipe.
    pub fn stop(&self) {
        if self.state().is_terminal() {
            return;
        }
        tracing::debug!(session = %self.inner.id, "Stop requested");
        self.inner.feeder.cancel();
    }

    /// Whether the active decoder reports completion.
    pub fn is_done(&self) -> bool {
        self.inner.feeder.is_done()
    }

    /// Wait until the session has settled and the after-callback returned.
    pub async fn wait(&self) {
        let mut rx = self.inner.settled.subscribe();
        let _ = rx.wait_for(|settled| *settled).await;
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.lock().clone()
    }

    /// Index of the segment being (or last) played.
    pub fn cursor(&self) -> usize {
        self.inner.feeder.cursor()
    }

    pub fn phase(&self) -> SegmentPhase {
        self.inner.feeder.phase()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.inner.segments
    }

    pub fn metadata(&self) -> Option<&VideoInfo> {
        self.inner.metadata.as_ref()
    }

    pub fn title(&self) -> &str {
        self.inner.metadata.as_ref().map_or("", |m| m.title.as_str())
    }

    pub fn duration(&self) -> Duration {
        self.inner
            .metadata
            .as_ref()
            .map_or(Duration::ZERO, VideoInfo::duration)
    }

    pub fn uploader(&self) -> &str {
        self.inner
            .metadata
            .as_ref()
            .map_or("", |m| m.uploader.as_str())
    }

    async fn drive(&self) {
        let id = self.inner.id;
        self.emit(EventPayload::SessionStarted {
            segments: self.inner.segments.len(),
        });

        let outcome = match self.inner.feeder.run(&self.inner.segments).await {
            Ok(FeedOutcome::Completed) => {
                self.record().await;
                SessionOutcome::Completed
            }
            Ok(FeedOutcome::Cancelled) => SessionOutcome::Cancelled,
            Err(e) => SessionOutcome::Failed(e.to_string()),
        };

        let state = match &outcome {
            SessionOutcome::Completed => SessionState::Completed,
            SessionOutcome::Cancelled => SessionState::Cancelled,
            SessionOutcome::Failed(message) => SessionState::Failed(message.clone()),
        };
        *self.inner.state.lock() = state;

        match &outcome {
            SessionOutcome::Failed(error) => {
                tracing::error!(session = %id, %error, "Playback failed")
            }
            other => tracing::info!(session = %id, outcome = ?other, "Playback settled"),
        }
        self.emit(EventPayload::SessionSettled { outcome });

        let after = self.inner.after.lock().take();
        if let Some(after) = after {
            if let Err(e) = after.invoke(self) {
                tracing::warn!(session = %id, error = %e, "After-callback failed");
            }
        }

        self.inner.settled.send_replace(true);
    }

    async fn record(&self) {
        let Some(store) = &self.inner.store else {
            return;
        };
        let item = StoredItem::new(
            self.inner.metadata.clone().unwrap_or_default(),
            self.inner.segments.clone(),
        );
        if let Err(e) = store.record(&item).await {
            tracing::warn!(session = %self.inner.id, error = %e, "Recording item failed");
        }
    }

    fn emit(&self, payload: EventPayload) {
        if let Some(bus) = &self.inner.events {
            bus.broadcast(self.inner.id, payload);
        }
    }
}
