//! Decoder backed by an external program (ffmpeg, ffplay, ...).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sp_core::config::DecoderConfig;
use sp_core::{Error, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio_util::sync::CancellationToken;

use crate::command::DecoderCommand;
use crate::decoder::{DecodeJob, Decoder, DecoderHandle, FinishNotifier};
use crate::tools::ToolRegistry;

/// Spawns one process per segment with the pipe's read end as stdin.
///
/// The segment is finished when the process exits. A non-zero exit is logged
/// but still counts as finished.
#[derive(Debug, Clone)]
pub struct ProcessDecoder {
    command: DecoderCommand,
    name: String,
}

impl ProcessDecoder {
    pub fn new(program: PathBuf, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut command = DecoderCommand::new(program);
        command.args(args);
        let name = command.program_name();
        Self { command, name }
    }

    /// Build from configuration, resolving the program through `tools`.
    pub fn from_config(config: &DecoderConfig, tools: &ToolRegistry) -> Result<Self> {
        let program = tools.resolve(&config.program)?;
        let mut decoder = Self::new(program, config.args.iter().cloned());
        if let Some(output) = &config.output {
            decoder.command.output(output);
        }
        Ok(decoder)
    }

    pub fn command(&self) -> &DecoderCommand {
        &self.command
    }
}

impl Decoder for ProcessDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, job: DecodeJob) -> Result<Box<dyn DecoderHandle>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::decoder_start(&self.name, format!("no async runtime: {e}")))?;

        let DecodeJob {
            index,
            segment,
            input,
            finished,
        } = job;

        let mut child = self.command.spawn(input)?;
        tracing::debug!(
            decoder = %self.name,
            index,
            segment = %segment.file_name,
            pid = child.id(),
            "Decoder process started"
        );

        if let Some(stderr) = child.stderr.take() {
            runtime.spawn(forward_stderr(self.name.clone(), stderr));
        }

        let handle = ProcessHandle {
            stop: CancellationToken::new(),
            done: Arc::new(AtomicBool::new(false)),
        };
        runtime.spawn(supervise(
            child,
            self.name.clone(),
            index,
            handle.stop.clone(),
            Arc::clone(&handle.done),
            finished,
        ));

        Ok(Box::new(handle))
    }
}

/// Control over one decoder process.
#[derive(Debug)]
struct ProcessHandle {
    stop: CancellationToken,
    done: Arc<AtomicBool>,
}

impl DecoderHandle for ProcessHandle {
    fn stop(&self) {
        self.stop.cancel();
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Wait for the process to exit (or kill it on stop), then signal completion.
async fn supervise(
    mut child: Child,
    name: String,
    index: usize,
    stop: CancellationToken,
    done: Arc<AtomicBool>,
    finished: FinishNotifier,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = stop.cancelled() => {
            tracing::debug!(decoder = %name, index, "Stopping decoder process");
            if let Err(e) = child.start_kill() {
                tracing::warn!(decoder = %name, index, error = %e, "Failed to kill decoder process");
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) if status.success() => {
            tracing::debug!(decoder = %name, index, "Decoder process exited");
        }
        Ok(status) if stop.is_cancelled() => {
            tracing::debug!(decoder = %name, index, %status, "Decoder process stopped");
        }
        Ok(status) => {
            tracing::warn!(decoder = %name, index, %status, "Decoder process exited unsuccessfully");
        }
        Err(e) => {
            tracing::warn!(decoder = %name, index, error = %e, "Waiting for decoder process failed");
        }
    }

    done.store(true, Ordering::Release);
    finished.notify();
}

async fn forward_stderr(name: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            tracing::info!(decoder = %name, "{line}");
        }
    }
}
