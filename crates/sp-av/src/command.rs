//! Builder for decoder process invocations fed from a pipe.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use sp_core::{Error, Result};
use tokio::process::{Child, Command};

use crate::pipe::PipeReadEnd;

/// A builder for spawning an external decoder whose stdin is a pipe.
///
/// # Example
///
/// ```no_run
/// use sp_av::{DecoderCommand, PipeBridge};
/// use std::path::PathBuf;
///
/// # async fn example() -> sp_core::Result<()> {
/// let (_write, read) = PipeBridge::open(256)?.split();
/// let mut child = DecoderCommand::new(PathBuf::from("ffplay"))
///     .args(["-nodisp", "-autoexit", "-i", "pipe:0"])
///     .spawn(read)?;
/// child.wait().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DecoderCommand {
    program: PathBuf,
    args: Vec<String>,
    output: Option<PathBuf>,
}

impl DecoderCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            output: None,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Append the process's stdout to `path` instead of discarding it.
    pub fn output(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.output = Some(path.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Program file name, used in logs and errors.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Spawn the process reading from `input`.
    ///
    /// stderr is piped so the caller can forward it to the log. The child is
    /// killed if its handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecoderStart`] if the output file cannot be opened or
    /// the process cannot be spawned.
    pub fn spawn(&self, input: PipeReadEnd) -> Result<Child> {
        let program_name = self.program_name();

        let stdout = match &self.output {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| {
                        Error::decoder_start(
                            &program_name,
                            format!("cannot open output {}: {e}", path.display()),
                        )
                    })?;
                Stdio::from(file)
            }
            None => Stdio::null(),
        };

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::from(input))
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn()
            .map_err(|e| Error::decoder_start(program_name, format!("failed to spawn: {e}")))
    }
}
