//! # Reel Core
//!
//! Core types shared by every stage of the reel video pipeline.
//!
//! This crate provides the building blocks the codec, container and pipeline
//! crates agree on:
//! - Error handling types
//! - Track kinds and the per-track map
//! - Media formats as reported by extractors and codecs
//! - Encoded sample buffers and their flags
//! - RGBA images handed to filters and listeners
//! - Frame/timestamp conversions

pub mod buffer;
pub mod error;
pub mod format;
pub mod image;
pub mod timing;
pub mod track;

pub use buffer::{BufferFlags, BufferInfo, Sample};
pub use error::{CoreError, Result};
pub use format::{ColorFormat, MediaFormat};
pub use image::Image;
pub use track::{Track, TrackMap};
