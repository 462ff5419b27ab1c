//! The per-segment pipeline.
//!
//! For each segment the feeder opens a fresh pipe, starts a decoder on its
//! read end, pumps the segment's bytes into the write end (and the mirror),
//! closes the write end and waits for the decoder to signal completion.
//! Only then does the next segment start.
//!
//! ```text
//! Idle -> PipeOpen -> Streaming -> PipeClosed -> AwaitingDecoder -> Done
//!   \________\___________\____________\______________\-> Error | Cancelled
//! ```

use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sp_av::{DecodeJob, Decoder, DecoderHandle, FinishGate, PipeBridge, PipeWriteEnd};
use sp_core::config::PipeConfig;
use sp_core::events::{EventBus, EventPayload};
use sp_core::{Error, Result, Segment, SessionId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::mirror::MirrorWriter;
use crate::source::SourceOpener;

/// Where the active segment is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentPhase {
    Idle,
    PipeOpen,
    Streaming,
    PipeClosed,
    AwaitingDecoder,
    Done,
    Error,
    Cancelled,
}

/// How a feed run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    Completed,
    Cancelled,
}

/// State readable by the session while the feeder runs.
struct Shared {
    cursor: AtomicUsize,
    phase: Mutex<SegmentPhase>,
    decoder: Mutex<Option<Box<dyn DecoderHandle>>>,
}

/// Drives segments through pipe and decoder one at a time.
#[derive(Clone)]
pub struct SegmentFeeder {
    decoder: Arc<dyn Decoder>,
    opener: Arc<dyn SourceOpener>,
    pipe: PipeConfig,
    mirror_dir: Option<PathBuf>,
    gate: FinishGate,
    cancel: CancellationToken,
    shared: Arc<Shared>,
    events: Option<(Arc<EventBus>, SessionId)>,
}

impl std::fmt::Debug for SegmentFeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFeeder")
            .field("decoder", &self.decoder.name())
            .field("pipe", &self.pipe)
            .field("mirror_dir", &self.mirror_dir)
            .field("cursor", &self.cursor())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// Result of the blocking pipe writer.
struct PipeOutcome {
    written: u64,
    error: Option<Error>,
}

impl SegmentFeeder {
    pub fn new(decoder: Arc<dyn Decoder>, opener: Arc<dyn SourceOpener>, pipe: PipeConfig) -> Self {
        Self {
            decoder,
            opener,
            pipe,
            mirror_dir: None,
            gate: FinishGate::new(),
            cancel: CancellationToken::new(),
            shared: Arc::new(Shared {
                cursor: AtomicUsize::new(0),
                phase: Mutex::new(SegmentPhase::Idle),
                decoder: Mutex::new(None),
            }),
            events: None,
        }
    }

    /// Mirror every segment into `dir/<file_name>`.
    pub fn with_mirror_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mirror_dir = Some(dir.into());
        self
    }

    pub fn with_events(mut self, bus: Arc<EventBus>, session: SessionId) -> Self {
        self.events = Some((bus, session));
        self
    }

    /// Index of the segment being (or last) processed.
    pub fn cursor(&self) -> usize {
        self.shared.cursor.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> SegmentPhase {
        *self.shared.phase.lock()
    }

    /// Whether the current decoder reports completion. `false` while no
    /// decoder is running.
    pub fn is_done(&self) -> bool {
        self.shared
            .decoder
            .lock()
            .as_ref()
            .is_some_and(|handle| handle.is_done())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the run and stop the active decoder. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.shared.decoder.lock().as_ref() {
            handle.stop();
        }
    }

    /// Feed every segment in order.
    ///
    /// Stops at the first failed segment; remaining segments are not
    /// attempted.
    pub async fn run(&self, segments: &[Segment]) -> Result<FeedOutcome> {
        for (index, segment) in segments.iter().enumerate() {
            self.shared.cursor.store(index, Ordering::Release);

            match self.feed(index, segment).await {
                Ok(FeedOutcome::Completed) => {}
                Ok(FeedOutcome::Cancelled) => {
                    tracing::info!(index, segment = %segment.file_name, "Playback cancelled");
                    return Ok(FeedOutcome::Cancelled);
                }
                Err(e) => {
                    self.set_phase(SegmentPhase::Error);
                    tracing::error!(index, segment = %segment.file_name, error = %e, "Segment failed");
                    self.emit(EventPayload::SegmentFailed {
                        index,
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
        Ok(FeedOutcome::Completed)
    }

    /// Play a single segment through a fresh pipe and decoder.
    pub async fn feed(&self, index: usize, segment: &Segment) -> Result<FeedOutcome> {
        self.set_phase(SegmentPhase::Idle);
        self.gate.reset();
        self.shared.decoder.lock().take();

        if self.cancel.is_cancelled() {
            self.set_phase(SegmentPhase::Cancelled);
            return Ok(FeedOutcome::Cancelled);
        }

        tracing::info!(index, segment = %segment.file_name, "Segment started");
        self.emit(EventPayload::SegmentStarted {
            index,
            file_name: segment.file_name.clone(),
        });

        // 1. Fresh pipe, decoder on the read end.
        let (write, read) = PipeBridge::open(self.pipe.buffer_pages)?.split();
        self.set_phase(SegmentPhase::PipeOpen);

        let handle = self.decoder.start(DecodeJob {
            index,
            segment: segment.clone(),
            input: read,
            finished: self.gate.notifier(index),
        })?;
        {
            let mut slot = self.shared.decoder.lock();
            *slot = Some(handle);
            // stop() may have run before the handle was visible.
            if self.cancel.is_cancelled() {
                if let Some(handle) = slot.as_ref() {
                    handle.stop();
                }
            }
        }

        // 2. Pump source -> pipe writer (+ mirror).
        let mirror = self
            .mirror_dir
            .as_ref()
            .map(|dir| MirrorWriter::create(dir.join(&segment.file_name)));
        let (tx, rx) = mpsc::channel::<Bytes>(self.pipe.queue_chunks.max(1));
        let cancel = self.cancel.clone();
        let writer = tokio::task::spawn_blocking(move || pipe_writer(write, rx, cancel));
        self.set_phase(SegmentPhase::Streaming);

        let pumped = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = pump(self.opener.as_ref(), segment, &tx, mirror.as_ref()) => Some(result),
        };

        // 3. Close the write end on every path.
        drop(tx);
        if pumped.is_none() {
            self.stop_decoder();
        }
        let piped = writer
            .await
            .map_err(|e| Error::Internal(format!("pipe writer task failed: {e}")))?;
        self.set_phase(SegmentPhase::PipeClosed);
        if let Some(mirror) = mirror {
            mirror.finish().await;
        }

        let Some(pumped) = pumped else {
            self.set_phase(SegmentPhase::Cancelled);
            return Ok(FeedOutcome::Cancelled);
        };
        if let Err(e) = pumped.and(piped.error.map_or(Ok(()), Err)) {
            self.stop_decoder();
            return Err(e);
        }

        // 4. Wait for the decoder before the next pipe may open.
        self.set_phase(SegmentPhase::AwaitingDecoder);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.stop_decoder();
                self.set_phase(SegmentPhase::Cancelled);
                return Ok(FeedOutcome::Cancelled);
            }
            _ = self.gate.wait(index) => {}
        }

        self.set_phase(SegmentPhase::Done);
        tracing::info!(index, segment = %segment.file_name, bytes = piped.written, "Segment finished");
        self.emit(EventPayload::SegmentCompleted {
            index,
            bytes: piped.written,
        });
        Ok(FeedOutcome::Completed)
    }

    fn stop_decoder(&self) {
        if let Some(handle) = self.shared.decoder.lock().as_ref() {
            handle.stop();
        }
    }

    fn set_phase(&self, phase: SegmentPhase) {
        *self.shared.phase.lock() = phase;
    }

    fn emit(&self, payload: EventPayload) {
        if let Some((bus, session)) = &self.events {
            bus.broadcast(*session, payload);
        }
    }
}

/// Drain the source. Every chunk goes to the mirror; chunks go to the pipe
/// until its writer stops accepting them. Without a mirror the pump stops
/// as soon as the pipe does.
async fn pump(
    opener: &dyn SourceOpener,
    segment: &Segment,
    tx: &mpsc::Sender<Bytes>,
    mirror: Option<&MirrorWriter>,
) -> Result<u64> {
    let mut source = opener.open(segment).await?;
    let mut total = 0u64;
    let mut pipe_open = true;

    while let Some(chunk) = source.next_chunk().await? {
        if chunk.is_empty() {
            continue;
        }
        total += chunk.len() as u64;
        if let Some(mirror) = mirror {
            mirror.write(chunk.clone());
        }
        if pipe_open && tx.send(chunk).await.is_err() {
            pipe_open = false;
            if mirror.is_none() {
                break;
            }
            tracing::debug!(segment = %segment.file_name, "Pipe closed early; continuing to mirror");
        }
    }
    Ok(total)
}

/// Blocking pipe writer. Returning drops the write end, which is the
/// decoder's EOF.
fn pipe_writer(
    mut write: PipeWriteEnd,
    mut rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) -> PipeOutcome {
    let mut written = 0u64;
    while let Some(chunk) = rx.blocking_recv() {
        if cancel.is_cancelled() {
            break;
        }
        match write.write_all(&chunk) {
            Ok(()) => written += chunk.len() as u64,
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                tracing::debug!(written, "Decoder closed its input");
                break;
            }
            Err(e) => {
                return PipeOutcome {
                    written,
                    error: Some(Error::pipe_write(e)),
                }
            }
        }
    }
    PipeOutcome {
        written,
        error: None,
    }
}
