use super::{DecodeSink, Decoded, EngineHandle, EngineState, EngineTimeouts, Flow};
use crate::backend::{Codec, CodecEvent, CodecMode, MediaBackend, MediaExtractor};
use crate::error::{CodecError, Result};
use crate::surface::OutputSurface;
use reel_core::{BufferFlags, BufferInfo, MediaFormat, Track};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Which decoded frames are handed on.
///
/// Video frame `count` (zero-based, counted from where decoding started) is
/// valid when it lies in `[start_frame, (num_frames + start_frame) * frame_interval)`
/// and is a multiple of `frame_interval`. Audio is only valid when decoding
/// starts at frame zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeWindow {
    pub frame_interval: u64,
    pub num_frames: u64,
    pub start_frame: u64,
}

impl DecodeWindow {
    /// Window starting at `start_frame`, taking every `frame_interval`th frame.
    pub fn new(frame_interval: u64, num_frames: u64, start_frame: u64) -> Self {
        Self {
            frame_interval: frame_interval.max(1),
            num_frames,
            start_frame,
        }
    }

    /// Whether the `count`th decoded video frame is delivered.
    pub fn admits_video(&self, count: u64) -> bool {
        let end = self
            .num_frames
            .saturating_add(self.start_frame)
            .saturating_mul(self.frame_interval);
        count >= self.start_frame && count < end && count % self.frame_interval == 0
    }

    /// Whether audio is decoded for this window.
    pub fn admits_audio(&self) -> bool {
        self.start_frame == 0
    }
}

impl Default for DecodeWindow {
    fn default() -> Self {
        Self::new(1, u64::MAX, 0)
    }
}

/// Drives one decoder from an extractor to a [`DecodeSink`].
pub struct DecodeEngine {
    track: Track,
    codec: Box<dyn Codec>,
    extractor: Box<dyn MediaExtractor>,
    surface: Option<OutputSurface>,
    sink: Arc<dyn DecodeSink>,
    window: DecodeWindow,
    timeouts: EngineTimeouts,
    state: EngineState,
    decoded: u64,
    input: Vec<u8>,
    started: bool,
    released: bool,
}

impl DecodeEngine {
    /// Build a video decoder rendering into a fresh output surface.
    ///
    /// `extractor` must already have the video track selected.
    pub fn video(
        backend: &dyn MediaBackend,
        extractor: Box<dyn MediaExtractor>,
        format: &MediaFormat,
        window: DecodeWindow,
        sink: Arc<dyn DecodeSink>,
        timeouts: EngineTimeouts,
    ) -> Result<Self> {
        let (width, height) = format.display_size()?;
        let surface = OutputSurface::new(backend.create_surface(width, height)?, width, height);
        let mut codec = backend.create_decoder(format)?;
        codec.configure(format, Some(surface.input()), CodecMode::Decode)?;
        debug!(width, height, mime = %format.mime, "Configured video decoder");
        Ok(Self::with_parts(
            Track::Video,
            codec,
            extractor,
            Some(surface),
            window,
            sink,
            timeouts,
        ))
    }

    /// Build an audio decoder.
    ///
    /// `extractor` must already have the audio track selected.
    pub fn audio(
        backend: &dyn MediaBackend,
        extractor: Box<dyn MediaExtractor>,
        format: &MediaFormat,
        window: DecodeWindow,
        sink: Arc<dyn DecodeSink>,
        timeouts: EngineTimeouts,
    ) -> Result<Self> {
        let mut codec = backend.create_decoder(format)?;
        codec.configure(format, None, CodecMode::Decode)?;
        debug!(mime = %format.mime, "Configured audio decoder");
        Ok(Self::with_parts(
            Track::Audio,
            codec,
            extractor,
            None,
            window,
            sink,
            timeouts,
        ))
    }

    fn with_parts(
        track: Track,
        codec: Box<dyn Codec>,
        extractor: Box<dyn MediaExtractor>,
        surface: Option<OutputSurface>,
        window: DecodeWindow,
        sink: Arc<dyn DecodeSink>,
        timeouts: EngineTimeouts,
    ) -> Self {
        Self {
            track,
            codec,
            extractor,
            surface,
            sink,
            window,
            timeouts,
            state: EngineState::AwaitingInput,
            decoded: 0,
            input: Vec::new(),
            started: false,
            released: false,
        }
    }

    /// Track this engine decodes.
    pub fn track(&self) -> Track {
        self.track
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Number of media outputs the codec has produced so far.
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Start the codec.
    pub fn start(&mut self) -> Result<()> {
        self.codec.start()?;
        self.started = true;
        self.state = EngineState::AwaitingInput;
        Ok(())
    }

    /// Handle at most one codec event.
    pub fn step(&mut self) -> Result<EngineState> {
        match self.codec.next_event(self.timeouts.poll)? {
            None => {}
            Some(CodecEvent::InputAvailable(index)) => self.fill_input(index)?,
            Some(CodecEvent::OutputAvailable(index, info)) => self.drain_output(index, info)?,
            Some(CodecEvent::OutputFormatChanged(format)) => {
                debug!(track = %self.track, mime = %format.mime, "Decoder output format changed");
            }
        }
        Ok(self.state)
    }

    /// Run the engine on its own thread.
    pub fn spawn(self, name: impl Into<String>) -> Result<EngineHandle> {
        EngineHandle::spawn(name.into(), move |stop| self.run(stop))
    }

    fn run(mut self, stop: &AtomicBool) {
        if let Err(err) = self.drive(stop) {
            if stop.load(Ordering::Acquire) {
                debug!(track = %self.track, "Decoder error after stop: {}", err);
            } else {
                error!(track = %self.track, "Decoder failed: {}", err);
                self.sink.decoder_failed(self.track, err);
            }
        }
        self.release();
    }

    fn drive(&mut self, stop: &AtomicBool) -> Result<()> {
        self.start()?;
        while !stop.load(Ordering::Acquire) {
            if self.step()? == EngineState::Done {
                break;
            }
        }
        Ok(())
    }

    fn fill_input(&mut self, index: usize) -> Result<()> {
        if self.state != EngineState::AwaitingInput {
            return Ok(());
        }
        match self.extractor.sample_time() {
            Some(timestamp_us) => {
                let size = self.extractor.read_sample(&mut self.input)?;
                let flags = self.extractor.sample_flags() & BufferFlags::KEY_FRAME;
                self.codec
                    .queue_input(index, &self.input[..size], timestamp_us, flags)?;
                self.extractor.advance();
            }
            None => {
                trace!(track = %self.track, "Extractor exhausted, queueing end of stream");
                self.codec
                    .queue_input(index, &[], 0, BufferFlags::END_OF_STREAM)?;
                self.state = EngineState::AwaitingOutput;
            }
        }
        Ok(())
    }

    fn drain_output(&mut self, index: usize, info: BufferInfo) -> Result<()> {
        if info.is_codec_config() {
            return self.codec.release_output(index, false);
        }

        if info.is_empty() {
            self.codec.release_output(index, false)?;
        } else {
            let valid = match self.track {
                Track::Video => self.window.admits_video(self.decoded),
                Track::Audio => self.window.admits_audio(),
            };
            self.decoded += 1;

            if !valid {
                self.codec.release_output(index, false)?;
            } else if self.deliver(index, &info)? == Flow::Stop {
                self.state = EngineState::Done;
                return Ok(());
            }
        }

        if info.is_end_of_stream() {
            debug!(track = %self.track, decoded = self.decoded, "Decoder reached end of stream");
            self.state = EngineState::Done;
            self.sink.decoder_finished(self.track);
        }
        Ok(())
    }

    fn deliver(&mut self, index: usize, info: &BufferInfo) -> Result<Flow> {
        let resume = self.state;
        self.state = EngineState::Draining;

        let data = match self.track {
            Track::Video => {
                self.codec.release_output(index, true)?;
                let surface = self.surface.as_mut().ok_or_else(|| {
                    CodecError::surface("video decoder has no output surface")
                })?;
                let mut attached = surface.attach()?;
                attached.draw_frame(self.timeouts.frame)?;
                Decoded::Image(attached.read_image()?)
            }
            Track::Audio => {
                let pcm = self.codec.output_buffer(index)?.to_vec();
                self.codec.release_output(index, false)?;
                Decoded::Pcm(pcm)
            }
        };

        let flow = self
            .sink
            .transfer(self.track, data, info.presentation_time_us);
        self.state = resume;
        Ok(flow)
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if self.started {
            if let Err(err) = self.codec.stop() {
                debug!(track = %self.track, "Failed to stop decoder: {}", err);
            }
        }
    }
}

impl Drop for DecodeEngine {
    fn drop(&mut self) {
        self.release();
    }
}
