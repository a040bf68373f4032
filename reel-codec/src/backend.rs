//! Traits over the platform media services.
//!
//! A [`MediaBackend`] hands out container extractors, codecs and render
//! surfaces. Codecs follow the platform's asynchronous buffer-queue model,
//! exposed here as a poll: each call to [`Codec::next_event`] yields at most
//! one input-available, output-available or format-changed event.

use crate::error::Result;
use reel_core::{BufferFlags, BufferInfo, MediaFormat};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Where an extractor lands relative to the requested time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Last sync sample at or before the time.
    PreviousSync,
    /// First sync sample at or after the time.
    NextSync,
    /// Sync sample nearest to the time.
    ClosestSync,
}

/// Index of the sync sample `mode` selects for `timestamp_us`.
///
/// `keys` yields `(index, timestamp)` of sync samples in presentation order.
pub(crate) fn sync_sample(
    keys: impl Iterator<Item = (usize, i64)> + Clone,
    timestamp_us: i64,
    mode: SeekMode,
) -> Option<usize> {
    let previous = keys.clone().filter(|&(_, time)| time <= timestamp_us).last();
    let next = keys.clone().find(|&(_, time)| time >= timestamp_us);

    let target = match mode {
        SeekMode::PreviousSync => previous.or(next),
        SeekMode::NextSync => next,
        SeekMode::ClosestSync => match (previous, next) {
            (Some(p), Some(n)) => {
                if timestamp_us - p.1 <= n.1 - timestamp_us {
                    Some(p)
                } else {
                    Some(n)
                }
            }
            (p, n) => p.or(n),
        },
    };
    target.map(|(index, _)| index)
}

/// Whether a codec consumes compressed data or produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecMode {
    Decode,
    Encode,
}

/// A codec advertised by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInfo {
    pub name: String,
    pub mime: String,
    pub mode: CodecMode,
    pub hardware: bool,
}

/// One notification from a running codec.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecEvent {
    /// Input buffer `index` may be filled and queued.
    InputAvailable(usize),
    /// Output buffer `index` holds data described by the info.
    OutputAvailable(usize, BufferInfo),
    /// The codec's output format is now known (or changed).
    OutputFormatChanged(MediaFormat),
}

/// Entry point to the platform's media services.
pub trait MediaBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Open a container file for demuxing.
    fn open_extractor(&self, path: &Path) -> Result<Box<dyn MediaExtractor>>;

    /// Create a decoder able to handle `format`.
    fn create_decoder(&self, format: &MediaFormat) -> Result<Box<dyn Codec>>;

    /// Find an encoder producing `mime`.
    fn find_encoder(&self, mime: &str) -> Option<CodecInfo>;

    /// Instantiate a previously found encoder.
    fn create_encoder(&self, info: &CodecInfo) -> Result<Box<dyn Codec>>;

    /// Create an offscreen surface decoders can render `width`x`height` frames into.
    fn create_surface(&self, width: u32, height: u32) -> Result<Box<dyn RenderSurface>>;
}

/// Sequential reader over the samples of a container file.
pub trait MediaExtractor: Send {
    /// Number of tracks in the container.
    fn track_count(&self) -> usize;

    /// Format of track `index`.
    fn track_format(&self, index: usize) -> Result<MediaFormat>;

    /// Restrict reading to one track.
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// Presentation time of the current sample, or `None` once exhausted.
    fn sample_time(&self) -> Option<i64>;

    /// Flags of the current sample; empty once exhausted.
    fn sample_flags(&self) -> BufferFlags;

    /// Copy the current sample into `buf`, returning its size.
    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<usize>;

    /// Move to the next sample. Returns `false` when none is left.
    fn advance(&mut self) -> bool;

    /// Move to the sync sample `mode` picks for `timestamp_us`, or past the
    /// end when there is none.
    fn seek_to(&mut self, timestamp_us: i64, mode: SeekMode);
}

/// A platform codec driven through buffer indices.
pub trait Codec: Send {
    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<SurfaceHandle>,
        mode: CodecMode,
    ) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Wait up to `timeout` for the next event.
    ///
    /// An error is the codec's asynchronous failure callback.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<CodecEvent>>;

    /// Fill input buffer `index` with `data` and hand it to the codec.
    fn queue_input(
        &mut self,
        index: usize,
        data: &[u8],
        timestamp_us: i64,
        flags: BufferFlags,
    ) -> Result<()>;

    fn output_buffer(&mut self, index: usize) -> Result<&[u8]>;

    /// Return output buffer `index`, rendering it to the configured surface
    /// when `render` is set.
    fn release_output(&mut self, index: usize, render: bool) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

/// Receives frames a decoder renders to its output surface.
pub trait FrameProducer: Send + Sync {
    fn queue_frame(&self, rgba: &[u8], timestamp_us: i64) -> Result<()>;
}

/// The input side of a render surface, given to a decoder at configure time.
#[derive(Clone)]
pub struct SurfaceHandle(Arc<dyn FrameProducer>);

impl SurfaceHandle {
    /// Wrap the surface side that receives rendered frames.
    pub fn new(producer: Arc<dyn FrameProducer>) -> Self {
        Self(producer)
    }

    /// Hand one rendered RGBA frame to the surface.
    pub fn queue_frame(&self, rgba: &[u8], timestamp_us: i64) -> Result<()> {
        self.0.queue_frame(rgba, timestamp_us)
    }
}

impl fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SurfaceHandle")
    }
}

/// An offscreen GL-style surface.
///
/// Drawing and read-back are only valid while the surface's context is
/// current on the calling thread.
pub trait RenderSurface: Send {
    /// Handle the decoder renders into.
    fn input(&self) -> SurfaceHandle;

    fn make_current(&mut self) -> Result<()>;

    fn release_current(&mut self) -> Result<()>;

    /// Block until the decoder has rendered a new frame.
    fn await_new_image(&mut self, timeout: Duration) -> Result<()>;

    /// Draw the latest frame into the framebuffer.
    fn draw_image(&mut self) -> Result<()>;

    /// Read the framebuffer as RGBA, bottom row first.
    fn read_pixels(&mut self, out: &mut [u8]) -> Result<()>;
}
