//! The decoder contract.
//!
//! A decoder consumes one segment's bytes from a pipe read end and reports
//! when it has finished with them. The streaming core only ever talks to the
//! traits in this module, so tests and embedders can plug in in-process
//! decoders next to [`crate::ProcessDecoder`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sp_core::{Result, Segment};
use tokio::sync::watch;

use crate::pipe::PipeReadEnd;

/// Everything a decoder receives when asked to play one segment.
#[derive(Debug)]
pub struct DecodeJob {
    /// Position of the segment in the session's list.
    pub index: usize,
    pub segment: Segment,
    /// Read end of the pipe carrying the segment's bytes. EOF marks the end
    /// of the segment.
    pub input: PipeReadEnd,
    /// Fired once the decoder is done with this segment, whether it finished
    /// normally, failed, or was stopped.
    pub finished: FinishNotifier,
}

/// Factory for per-segment decoder instances.
pub trait Decoder: Send + Sync {
    /// Short name used in logs and [`sp_core::Error::DecoderStart`].
    fn name(&self) -> &str;

    /// Create and start a decoder for `job`.
    ///
    /// Must return without waiting for playback to end. Implementations
    /// must fire `job.finished` exactly once at some point after a
    /// successful start, including when stopped.
    ///
    /// # Errors
    ///
    /// Returns [`sp_core::Error::DecoderStart`] when the decoder cannot be
    /// created or started. `job.finished` need not fire in that case.
    fn start(&self, job: DecodeJob) -> Result<Box<dyn DecoderHandle>>;
}

/// Control over a running decoder.
pub trait DecoderHandle: Send + Sync {
    /// Ask the decoder to stop early. Must be idempotent.
    fn stop(&self);

    /// Whether the decoder has finished with its segment.
    fn is_done(&self) -> bool;
}

/// Per-session completion signal for the active segment.
///
/// The gate is reset before each segment starts; waiting completes only once
/// the notifier for that exact segment index fires, so a late signal from a
/// previous segment cannot release the next one.
#[derive(Debug, Clone)]
pub struct FinishGate {
    tx: Arc<watch::Sender<Option<usize>>>,
}

impl FinishGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Clear the gate before a new segment starts.
    pub fn reset(&self) {
        self.tx.send_replace(None);
    }

    /// Notifier handed to the decoder playing segment `index`.
    pub fn notifier(&self, index: usize) -> FinishNotifier {
        FinishNotifier {
            tx: Arc::clone(&self.tx),
            index,
            fired: AtomicBool::new(false),
        }
    }

    /// Whether the decoder for segment `index` has signalled.
    pub fn is_finished(&self, index: usize) -> bool {
        *self.tx.borrow() == Some(index)
    }

    /// Wait until the decoder for segment `index` signals.
    pub async fn wait(&self, index: usize) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|current| *current == Some(index)).await;
    }
}

impl Default for FinishGate {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot completion signal for a single segment.
#[derive(Debug)]
pub struct FinishNotifier {
    tx: Arc<watch::Sender<Option<usize>>>,
    index: usize,
    fired: AtomicBool,
}

impl FinishNotifier {
    /// Segment index this notifier belongs to.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Signal completion. Only the first call has an effect.
    pub fn notify(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.tx.send_replace(Some(self.index));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_after_matching_notify() {
        let gate = FinishGate::new();
        gate.reset();
        let notifier = gate.notifier(0);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait(0).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        notifier.notify();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(gate.is_finished(0));
    }

    #[tokio::test]
    async fn stale_notifier_does_not_release_next_segment() {
        let gate = FinishGate::new();
        let first = gate.notifier(0);
        gate.reset();
        let second = gate.notifier(1);

        first.notify();
        let early = tokio::time::timeout(Duration::from_millis(50), gate.wait(1)).await;
        assert!(early.is_err());

        second.notify();
        tokio::time::timeout(Duration::from_secs(1), gate.wait(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn notify_is_idempotent() {
        let gate = FinishGate::new();
        let notifier = gate.notifier(4);
        notifier.notify();
        gate.reset();
        notifier.notify();
        assert!(!gate.is_finished(4));
    }

    #[tokio::test]
    async fn already_fired_gate_does_not_block() {
        let gate = FinishGate::new();
        gate.notifier(2).notify();
        tokio::time::timeout(Duration::from_millis(100), gate.wait(2))
            .await
            .unwrap();
    }
}
