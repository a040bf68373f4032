use super::progress::Report;
use super::{send_control, Control, ExportProgress, Mediator};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::filter::FilterChain;
use crate::listener::ProgressListener;
use crate::options::ExportOptions;
use flume::{SendTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use reel_codec::{
    format_factory, CodecError, DecodeSink, Decoded, EncodeEngine, EncodeSink, EngineHandle, Flow,
    MediaBackend,
};
use reel_containers::Multiplexer;
use reel_core::{BufferInfo, CoreError, Image, MediaFormat, Sample, Track, TrackMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Everything an export needs besides its control channel.
pub(crate) struct ExportSetup {
    pub backend: Arc<dyn MediaBackend>,
    /// Source format of each exported track.
    pub sources: TrackMap<MediaFormat>,
    pub filters: FilterChain,
    pub options: ExportOptions,
    pub config: PipelineConfig,
    pub listener: Arc<dyn ProgressListener<f32>>,
    /// Output with every exported track registered.
    pub muxer: Multiplexer,
    pub progress: ExportProgress,
}

/// Per-track state of the decoder-to-encoder hand-off.
enum Lane {
    /// Encoder running; `frame_size` is what the video encoder was configured for.
    Open {
        queue: Sender<Sample>,
        frame_size: Option<(u32, u32)>,
    },
    /// The decoder is done or the export is shutting down.
    Closed,
}

/// Filters decoded frames, re-encodes them and writes the result.
///
/// Encoders are created lazily on the first decoded sample of their track so
/// the video encoder can be sized to the filtered frames.
pub(crate) struct ExportMediator {
    this: Weak<ExportMediator>,
    backend: Arc<dyn MediaBackend>,
    sources: TrackMap<MediaFormat>,
    filters: FilterChain,
    options: ExportOptions,
    config: PipelineConfig,
    listener: Arc<dyn ProgressListener<f32>>,
    control: Sender<Control>,
    lanes: Mutex<TrackMap<Lane>>,
    encoders: Mutex<TrackMap<EngineHandle>>,
    muxer: Mutex<Multiplexer>,
    /// Signalled when the muxer starts writing.
    output_started: Condvar,
    /// Set when some track ended without ever starting an encoder.
    starved: AtomicBool,
    progress: Mutex<ExportProgress>,
    closed: AtomicBool,
}

impl ExportMediator {
    /// Build the mediator. Each track's encoder starts with its first sample.
    pub fn new(setup: ExportSetup, control: Sender<Control>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            backend: setup.backend,
            sources: setup.sources,
            filters: setup.filters,
            options: setup.options,
            config: setup.config,
            listener: setup.listener,
            control,
            lanes: Mutex::new(TrackMap::new()),
            encoders: Mutex::new(TrackMap::new()),
            muxer: Mutex::new(setup.muxer),
            output_started: Condvar::new(),
            starved: AtomicBool::new(false),
            progress: Mutex::new(setup.progress),
            closed: AtomicBool::new(false),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn fail(&self, err: PipelineError) {
        if self.is_closed() {
            debug!("Ignoring error during shutdown: {}", err);
            return;
        }
        warn!("Export failed: {}", err);
        send_control(&self.control, Control::Failed(err));
    }

    fn scaled_timestamp(&self, timestamp_us: i64) -> i64 {
        (timestamp_us as f64 / self.options.frame_rate_scale) as i64
    }

    fn transfer_image(&self, image: Image, timestamp_us: i64) -> Result<Flow> {
        let image = self.filters.apply(image)?;
        let size = image.dimensions();
        let Some((queue, expected)) = self.lane(Track::Video, Some(size))? else {
            return Ok(Flow::Stop);
        };
        if let Some(expected) = expected {
            if expected != size {
                return Err(PipelineError::FrameSizeChanged {
                    expected,
                    actual: size,
                });
            }
        }
        let sample = Sample::new(image.to_nv12(), self.scaled_timestamp(timestamp_us));
        Ok(self.enqueue(Track::Video, &queue, sample))
    }

    fn transfer_pcm(&self, pcm: Vec<u8>, timestamp_us: i64) -> Result<Flow> {
        let Some((queue, _)) = self.lane(Track::Audio, None)? else {
            return Ok(Flow::Stop);
        };
        let sample = Sample::new(pcm, self.scaled_timestamp(timestamp_us));
        Ok(self.enqueue(Track::Audio, &queue, sample))
    }

    /// The queue feeding `track`'s encoder, starting the encoder on first use.
    ///
    /// `None` once the lane is closed.
    fn lane(
        &self,
        track: Track,
        frame_size: Option<(u32, u32)>,
    ) -> Result<Option<(Sender<Sample>, Option<(u32, u32)>)>> {
        let mut lanes = self.lanes.lock();
        match lanes.get(track) {
            Some(Lane::Open { queue, frame_size }) => return Ok(Some((queue.clone(), *frame_size))),
            Some(Lane::Closed) => return Ok(None),
            None => {}
        }

        let format = self.encoder_format(track, frame_size)?;
        let info = format_factory::find_encoder(self.backend.as_ref(), &format)?;
        let (queue, samples) = flume::bounded(self.config.queue_capacity);
        let sink: Arc<dyn EncodeSink> = self
            .this
            .upgrade()
            .ok_or_else(|| PipelineError::Aborted("export mediator dropped".into()))?;
        let engine = EncodeEngine::new(
            self.backend.as_ref(),
            &info,
            &format,
            samples,
            sink,
            self.config.engine_timeouts(),
        )?;
        let handle = engine.spawn(self.config.thread(&format!("encode-{}", track)))?;

        {
            let mut encoders = self.encoders.lock();
            if self.is_closed() {
                drop(encoders);
                handle.join();
                lanes.insert(track, Lane::Closed);
                return Ok(None);
            }
            encoders.insert(track, handle);
        }
        info!(track = %track, codec = %info.name, "Started encoder");

        lanes.insert(
            track,
            Lane::Open {
                queue: queue.clone(),
                frame_size,
            },
        );
        Ok(Some((queue, frame_size)))
    }

    fn encoder_format(&self, track: Track, frame_size: Option<(u32, u32)>) -> Result<MediaFormat> {
        let source = self
            .sources
            .get(track)
            .ok_or(CoreError::TrackNotFound(track))?;
        let format = match track {
            Track::Video => {
                let (width, height) = match frame_size {
                    Some(size) => size,
                    None => source.display_size()?,
                };
                format_factory::video_format(width, height, source, &self.options.video_encoding())?
            }
            Track::Audio => format_factory::audio_format(source)?,
        };
        Ok(format)
    }

    /// Hand `sample` to the encoder, waiting while its queue is full.
    fn enqueue(&self, track: Track, queue: &Sender<Sample>, mut sample: Sample) -> Flow {
        loop {
            match queue.send_timeout(sample, self.config.poll_timeout) {
                Ok(()) => return Flow::Continue,
                Err(SendTimeoutError::Timeout(pending)) => {
                    if self.is_closed() {
                        return Flow::Stop;
                    }
                    sample = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    debug!(track = %track, "Encoder stopped taking samples");
                    return Flow::Stop;
                }
            }
        }
    }

    /// Block until every track's format reached the muxer.
    ///
    /// Gives up when shutting down or when a track can never become ready,
    /// in which case writes are dropped by the muxer.
    fn await_output(&self) {
        let mut muxer = self.muxer.lock();
        while !muxer.is_started() && !self.is_closed() && !self.starved.load(Ordering::Acquire) {
            self.output_started
                .wait_for(&mut muxer, self.config.poll_timeout);
        }
    }

    /// Forward `report` to the listener; on completion notify the supervisor.
    ///
    /// Called with the progress lock held so listeners see values in order.
    fn publish(&self, report: Report) {
        self.listener.on_progress(report.value);
        if report.completed {
            info!("Export complete");
            send_control(&self.control, Control::Completed);
        }
    }

    fn finish_track(&self, track: Track) {
        let mut progress = self.progress.lock();
        progress.finish(track);
        let report = progress.report();
        if report.completed {
            self.publish(report);
        }
    }
}

impl DecodeSink for ExportMediator {
    fn transfer(&self, track: Track, data: Decoded, timestamp_us: i64) -> Flow {
        if self.is_closed() {
            return Flow::Stop;
        }
        let result = match (track, data) {
            (Track::Video, Decoded::Image(image)) => self.transfer_image(image, timestamp_us),
            (Track::Audio, Decoded::Pcm(pcm)) => self.transfer_pcm(pcm, timestamp_us),
            (track, _) => Err(PipelineError::Aborted(format!(
                "unexpected data on the {} track",
                track
            ))),
        };
        result.unwrap_or_else(|err| {
            self.fail(err);
            Flow::Stop
        })
    }

    fn decoder_finished(&self, track: Track) {
        let previous = self.lanes.lock().insert(track, Lane::Closed);
        debug!(track = %track, "Decoder finished, closing sample queue");
        if previous.is_none() {
            // No sample ever reached an encoder, so nothing else will finish the track.
            self.starved.store(true, Ordering::Release);
            self.finish_track(track);
        }
    }

    fn decoder_failed(&self, _track: Track, error: CodecError) {
        self.fail(error.into());
    }
}

impl EncodeSink for ExportMediator {
    fn output_format_changed(&self, track: Track, format: MediaFormat) -> Flow {
        if self.is_closed() {
            return Flow::Stop;
        }
        match self.muxer.lock().add_track(track, &format) {
            Ok(started) => {
                if started {
                    debug!("All tracks ready, writing output");
                    self.output_started.notify_all();
                }
                Flow::Continue
            }
            Err(err) => {
                self.fail(err.into());
                Flow::Stop
            }
        }
    }

    fn submit(&self, track: Track, data: &[u8], info: &BufferInfo, encoded: u64) -> Flow {
        self.await_output();
        if self.is_closed() {
            return Flow::Stop;
        }
        let mut progress = self.progress.lock();
        if progress.is_completed() {
            return Flow::Stop;
        }
        let admitted = match track {
            Track::Video => progress.admit_video(encoded),
            Track::Audio => progress.admit_audio(info.presentation_time_us),
        };
        if !admitted {
            trace!(track = %track, encoded, "Dropping sample past the export target");
            return Flow::Continue;
        }

        if let Err(err) = self.muxer.lock().write_sample(track, data, info) {
            drop(progress);
            self.fail(err.into());
            return Flow::Stop;
        }

        let report = progress.report();
        self.publish(report);
        if report.completed {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    fn encoder_finished(&self, track: Track) {
        debug!(track = %track, "Encoder finished");
        self.finish_track(track);
    }

    fn encoder_failed(&self, _track: Track, error: CodecError) {
        self.fail(error.into());
    }
}

impl Mediator for ExportMediator {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn release(&self, success: bool) -> Result<()> {
        self.close();
        for lane in self.lanes.lock().values_mut() {
            *lane = Lane::Closed;
        }

        let mut encoders = std::mem::take(&mut *self.encoders.lock());
        for (track, handle) in encoders.drain() {
            debug!(track = %track, "Stopping encoder");
            handle.join();
        }

        let mut muxer = self.muxer.lock();
        if success {
            // A failed finalize deletes the output itself.
            muxer.finalize()?;
        } else {
            muxer.discard();
        }
        Ok(())
    }

    fn notify_complete(&self) {
        self.listener.on_complete();
    }
}
