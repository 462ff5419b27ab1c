//! sp-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for the other sp-* crates,
//! providing the segment data model, media metadata, a unified error type,
//! explicit configuration, and a broadcast event bus for session lifecycle.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod media;
pub mod segment;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use media::VideoInfo;
pub use segment::{ByteRange, Locator, Manifest, Segment};
