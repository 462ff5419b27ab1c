//! # sp-av
//!
//! External-process plumbing for segpipe.
//!
//! This crate provides:
//!
//! - **Pipes** ([`PipeBridge`]) -- close-on-exec OS pipe pairs with a
//!   best-effort enlarged kernel buffer.
//! - **Decoder contract** ([`Decoder`], [`DecoderHandle`], [`DecodeJob`],
//!   [`FinishGate`]) -- what the streaming core needs from whatever consumes
//!   the pipe.
//! - **Process decoder** ([`ProcessDecoder`]) -- runs ffmpeg/ffplay (or any
//!   program reading stdin) against the pipe's read end.
//! - **Command building** ([`DecoderCommand`]) and **tool discovery**
//!   ([`ToolRegistry`]).

pub mod command;
pub mod decoder;
pub mod pipe;
pub mod process;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::DecoderCommand;
pub use decoder::{DecodeJob, Decoder, DecoderHandle, FinishGate, FinishNotifier};
pub use pipe::{page_size, PipeBridge, PipeReadEnd, PipeWriteEnd};
pub use process::ProcessDecoder;
pub use tools::{ToolInfo, ToolRegistry};
