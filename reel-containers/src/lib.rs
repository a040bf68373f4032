//! Container input and output for the reel video pipeline.
//!
//! - [`Multiplexer`]: gathers encoded tracks and writes them once every
//!   registered track has reported its format
//! - [`Mp4Writer`]: ISO base media file writer
//! - [`Mp4Reader`]: sample index and payload access for existing MP4 files
//! - [`ContainerWriter`]: the seam between the two

pub mod error;
pub mod mp4;
pub mod multiplexer;
pub mod traits;

pub use error::{ContainerError, Result};
pub use mp4::{Mp4Reader, Mp4Track, Mp4Writer, SampleRef};
pub use multiplexer::Multiplexer;
pub use traits::ContainerWriter;
