//! Unified error type for segpipe.
//!
//! All crates funnel their failures into [`Error`]. The variants follow the
//! playback failure taxonomy: some abort a segment (and with it the session),
//! others are only ever logged. [`Error::is_fatal`] and
//! [`Error::is_transient`] let callers decide without matching on variants.

use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Unified error type covering all failure modes in segpipe.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The OS pipe between feeder and decoder could not be created.
    #[error("Pipe creation failed: {message}")]
    PipeCreation {
        /// Human-readable error description.
        message: String,
    },

    /// Reading a segment's bytes from disk or network failed.
    #[error("Source read failed [{segment}]: {message}")]
    SourceRead {
        /// File name of the segment being read.
        segment: String,
        /// Human-readable error description.
        message: String,
        /// Whether a retry could plausibly succeed (network hiccups).
        transient: bool,
    },

    /// A remote source answered with a non-success status.
    #[error("HTTP {status} for URL: {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Status code returned by the server.
        status: u16,
    },

    /// No bytes arrived from a remote source within the stall window.
    #[error("Source stalled [{segment}]: no data for {waited:?}")]
    Stalled {
        /// File name of the segment being read.
        segment: String,
        /// How long the source waited without receiving data.
        waited: Duration,
    },

    /// The external decoder could not be created or started.
    #[error("Decoder start failed [{decoder}]: {message}")]
    DecoderStart {
        /// Name of the decoder (program name for process decoders).
        decoder: String,
        /// Human-readable error description.
        message: String,
    },

    /// Writing to the pipe failed for a reason other than the decoder
    /// closing its end.
    #[error("Pipe write failed: {message}")]
    PipeWrite {
        /// Human-readable error description.
        message: String,
    },

    /// Mirroring bytes to disk failed. Never aborts playback.
    #[error("Mirror write failed [{path}]: {message}")]
    MirrorWrite {
        /// Destination file.
        path: String,
        /// Human-readable error description.
        message: String,
    },

    /// The caller's after-callback failed. Never aborts playback.
    #[error("After-callback failed: {0}")]
    Callback(String),

    /// Recording a finished item failed.
    #[error("Store error: {message}")]
    Store {
        /// Human-readable error description.
        message: String,
    },

    /// `run()` was called on a session that is already running.
    #[error("Session is already running")]
    AlreadyRunning,

    /// Input data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error aborts the segment (and therefore the session).
    ///
    /// Mirror and callback failures are reported but never interrupt the
    /// data flow.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::MirrorWrite { .. } | Error::Callback(_))
    }

    /// Whether a retry policy may retry the operation that produced this
    /// error.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::SourceRead { transient, .. } => *transient,
            Error::Stalled { .. } => true,
            _ => false,
        }
    }

    /// Convenience constructor for [`Error::PipeCreation`].
    pub fn pipe_creation(message: impl fmt::Display) -> Self {
        Error::PipeCreation {
            message: message.to_string(),
        }
    }

    /// Convenience constructor for a non-retryable [`Error::SourceRead`].
    pub fn source_read(segment: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::SourceRead {
            segment: segment.into(),
            message: message.to_string(),
            transient: false,
        }
    }

    /// Convenience constructor for a retryable [`Error::SourceRead`].
    pub fn network(segment: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::SourceRead {
            segment: segment.into(),
            message: message.to_string(),
            transient: true,
        }
    }

    /// Convenience constructor for [`Error::DecoderStart`].
    pub fn decoder_start(decoder: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::DecoderStart {
            decoder: decoder.into(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`Error::PipeWrite`].
    pub fn pipe_write(message: impl fmt::Display) -> Self {
        Error::PipeWrite {
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`Error::MirrorWrite`].
    pub fn mirror_write(path: &Path, message: impl fmt::Display) -> Self {
        Error::MirrorWrite {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Store`].
    pub fn store(message: impl fmt::Display) -> Self {
        Error::Store {
            message: message.to_string(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
