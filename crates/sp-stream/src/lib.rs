//! # sp-stream
//!
//! The streaming core of segpipe: plays an ordered list of segments through
//! an external decoder, one pipe per segment, optionally mirroring the bytes
//! to disk.
//!
//! - [`source`] -- per-segment byte sources (`Local` file, `Remote` HTTP) and
//!   the [`SourceOpener`] seam.
//! - [`retry`] -- injectable retry/backoff for transient network failures.
//! - [`mirror`] -- best-effort disk copy of the streamed bytes.
//! - [`feeder`] -- the per-segment pipeline and its state machine.
//! - [`session`] -- the caller-facing [`PlaybackSession`].
//! - [`store`] -- recording finished items for "already downloaded" lookups.

pub mod callback;
pub mod feeder;
pub mod mirror;
pub mod progress;
pub mod retry;
pub mod session;
pub mod source;
pub mod store;

pub use callback::AfterCallback;
pub use feeder::{FeedOutcome, SegmentFeeder, SegmentPhase};
pub use mirror::{MirrorSummary, MirrorWriter};
pub use progress::TransferStats;
pub use retry::{ExponentialBackoff, NoRetry, RetryPolicy};
pub use session::{PlaybackSession, SessionBuilder, SessionState};
pub use source::{ChunkSource, SegmentOpener, SegmentSource, SourceOpener, SourceSettings};
pub use store::{JsonSegmentStore, SegmentStore, StoredItem};
