//! segpipe: play resolved media segment lists through an external decoder.
//!
//! The heavy lifting lives in the `sp-*` crates; this crate adds the config
//! file loader and the wiring that turns a manifest into a playback session.

pub mod config;
pub mod player;
