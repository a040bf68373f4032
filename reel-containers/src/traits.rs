//! Container writer trait.

use crate::error::Result;
use reel_core::{BufferInfo, MediaFormat};

/// A container format writer.
///
/// Tracks are added, then [`start`](ContainerWriter::start) writes the header,
/// samples are appended, and [`finish`](ContainerWriter::finish) writes the
/// index.
pub trait ContainerWriter: Send {
    /// Short format name, e.g. "mp4".
    fn format_name(&self) -> &str;

    /// Add a track, returning its index.
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize>;

    fn start(&mut self) -> Result<()>;

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<()>;

    fn finish(&mut self) -> Result<()>;
}
