//! Best-effort disk copy of a segment's bytes.
//!
//! Writes happen on a blocking worker fed through an unbounded channel, so a
//! slow disk never holds up the pipe and a stalled pipe never holds up the
//! disk. Failures are logged once and the remaining bytes are discarded.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use sp_core::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What the mirror worker managed to persist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorSummary {
    pub bytes: u64,
    pub failed: bool,
}

/// Duplicates streamed chunks into a file.
///
/// The file is closed on every exit path: [`MirrorWriter::finish`] waits for
/// it, and dropping the writer lets the worker drain and close on its own.
#[derive(Debug)]
pub struct MirrorWriter {
    path: PathBuf,
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    worker: Option<JoinHandle<MirrorSummary>>,
}

impl MirrorWriter {
    /// Start mirroring into `path`, creating parent directories as needed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker_path = path.clone();
        let worker = tokio::task::spawn_blocking(move || mirror_worker(&worker_path, rx));

        Self {
            path,
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue a chunk. Never blocks.
    pub fn write(&self, chunk: Bytes) {
        if let Some(tx) = &self.tx {
            // A closed channel means the worker already gave up.
            let _ = tx.send(chunk);
        }
    }

    /// Flush and close the file.
    pub async fn finish(mut self) -> MirrorSummary {
        self.tx.take();
        let Some(worker) = self.worker.take() else {
            return MirrorSummary::default();
        };
        match worker.await {
            Ok(summary) => {
                tracing::debug!(
                    path = %self.path.display(),
                    bytes = summary.bytes,
                    failed = summary.failed,
                    "Mirror closed"
                );
                summary
            }
            Err(e) => {
                tracing::warn!(error = %Error::mirror_write(&self.path, e), "Mirror worker aborted");
                MirrorSummary {
                    bytes: 0,
                    failed: true,
                }
            }
        }
    }
}

fn mirror_worker(path: &Path, mut rx: mpsc::UnboundedReceiver<Bytes>) -> MirrorSummary {
    let mut summary = MirrorSummary::default();
    let mut out = match open(path) {
        Ok(file) => Some(BufWriter::new(file)),
        Err(e) => {
            tracing::warn!(error = %Error::mirror_write(path, e), "Mirroring disabled for segment");
            summary.failed = true;
            None
        }
    };

    while let Some(chunk) = rx.blocking_recv() {
        let Some(writer) = out.as_mut() else {
            continue;
        };
        match writer.write_all(&chunk) {
            Ok(()) => summary.bytes += chunk.len() as u64,
            Err(e) => {
                tracing::warn!(error = %Error::mirror_write(path, e), "Mirroring stopped");
                summary.failed = true;
                out = None;
            }
        }
    }

    if let Some(mut writer) = out {
        if let Err(e) = writer.flush() {
            tracing::warn!(error = %Error::mirror_write(path, e), "Mirror flush failed");
            summary.failed = true;
        }
    }
    summary
}

fn open(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    File::create(path)
}
