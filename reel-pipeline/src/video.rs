//! Public entry point: one video file plus its filters.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::filter::{FilterChain, ImageFilter};
use crate::listener::ProgressListener;
use crate::mediator::{ExportMediator, ExportProgress, ExportSetup, ExtractionMediator, Mediator};
use crate::options::{ExportOptions, FrameWindow};
use crate::source::DataSource;
use crate::supervisor::{PipelineHandle, Supervisor};
use reel_codec::{DecodeEngine, DecodeSink, DecodeWindow, MediaBackend, MediaExtractor};
use reel_containers::Multiplexer;
use reel_core::{Image, MediaFormat, Track, TrackMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// A video file and the filters applied to each of its frames.
///
/// Metadata queries open the file on demand. [`get_frames`](Self::get_frames)
/// and [`export`](Self::export) validate their options up front and then run
/// in the background.
#[derive(Debug)]
pub struct Video {
    source: DataSource,
    filters: FilterChain,
    config: PipelineConfig,
}

impl Video {
    /// A video with no filters.
    pub fn new(backend: Arc<dyn MediaBackend>, path: impl Into<PathBuf>) -> Self {
        Self::with_filters(backend, path, std::iter::empty())
    }

    /// A video with a single filter.
    pub fn with_filter(
        backend: Arc<dyn MediaBackend>,
        path: impl Into<PathBuf>,
        filter: Arc<dyn ImageFilter>,
    ) -> Self {
        Self::with_filters(backend, path, [filter])
    }

    /// A video whose frames pass through `filters` in order.
    pub fn with_filters(
        backend: Arc<dyn MediaBackend>,
        path: impl Into<PathBuf>,
        filters: impl IntoIterator<Item = Arc<dyn ImageFilter>>,
    ) -> Self {
        Self {
            source: DataSource::new(backend, path),
            filters: FilterChain::from_filters(filters),
            config: PipelineConfig::default(),
        }
    }

    /// Replace the pipeline configuration.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Path of the video file.
    pub fn path(&self) -> &Path {
        self.source.path()
    }

    /// Filters applied to each frame.
    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Duration in microseconds.
    pub fn duration_us(&mut self) -> Result<i64> {
        self.source.ensure_prepared(Track::Video)?;
        self.source.duration_us()
    }

    /// Number of video frames.
    pub fn total_frame_count(&mut self) -> Result<u64> {
        self.source.ensure_prepared(Track::Video)?;
        self.source.total_frame_count()
    }

    /// Audio samples per channel over the whole file.
    pub fn total_audio_sample_count(&mut self) -> Result<u64> {
        self.source.ensure_prepared(Track::Audio)?;
        self.source.total_audio_sample_count()
    }

    /// Video frames per second.
    pub fn frame_rate(&mut self) -> Result<u32> {
        self.source.ensure_prepared(Track::Video)?;
        self.source.frame_rate()
    }

    /// Decode the frames selected by `window`, filter them and hand each to
    /// `listener`.
    ///
    /// Fails immediately on invalid options; runtime failures surface through
    /// [`PipelineHandle::wait`].
    pub fn get_frames(
        &mut self,
        window: FrameWindow,
        listener: Arc<dyn ProgressListener<Image>>,
    ) -> Result<PipelineHandle> {
        window.validate()?;
        let (interval, start) = (window.interval(), window.offset());
        self.check_bounds(interval + start)?;

        let adjusted = window.frames().min(self.source.total_frame_count()?);
        let target = self.source.frames_to_process(interval, adjusted, start)?;
        info!(path = %self.path().display(), interval, start, target, "Extracting frames");

        let (control, outcome) = flume::unbounded();
        let mediator = Arc::new(ExtractionMediator::new(
            target,
            self.filters.clone(),
            listener,
            control,
        ));

        let format = self.source.format(Track::Video)?.clone();
        let extractor = self.source.take_extractor(Track::Video)?;
        let sink: Arc<dyn DecodeSink> = mediator.clone();
        let decoder = DecodeEngine::video(
            self.source.backend().as_ref(),
            extractor,
            &format,
            DecodeWindow::new(interval, adjusted, start),
            sink,
            self.config.engine_timeouts(),
        )?;

        Supervisor::new(
            "extract",
            self.config.clone(),
            vec![decoder],
            mediator,
            outcome,
        )
        .spawn()
    }

    /// Filter the frames selected by `options` and encode them into an MP4 at
    /// `out_path`, optionally with the source's audio.
    ///
    /// `listener` receives progress in `[0, 1]` after every written sample.
    pub fn export(
        &mut self,
        out_path: impl AsRef<Path>,
        options: ExportOptions,
        listener: Arc<dyn ProgressListener<f32>>,
    ) -> Result<PipelineHandle> {
        options.validate()?;
        let interval = options.window.interval();
        let mut start = options.window.offset();
        self.check_bounds(interval + start)?;

        let total = self.source.total_frame_count()?;
        let adjusted = options.window.frames().min(total);
        let target = self.source.frames_to_process(interval, adjusted, start)?;

        let mut sources = TrackMap::new();
        let mut audio = None;
        let target_duration_us = if options.copy_audio {
            let format = self.source.prepare(Track::Audio)?.clone();
            let frames = adjusted.saturating_mul(interval).saturating_add(start).min(total);
            let duration = self.source.frame_to_timestamp(frames)?;
            audio = Some(self.source.take_extractor(Track::Audio)?);
            sources.insert(Track::Audio, format);
            Some(duration)
        } else {
            if start > 0 {
                start -= self.source.seek_to_frame(start)?;
            }
            None
        };
        let video_format = self.source.format(Track::Video)?.clone();
        let video = self.source.take_extractor(Track::Video)?;
        sources.insert(Track::Video, video_format.clone());
        info!(
            path = %self.path().display(),
            output = %out_path.as_ref().display(),
            interval,
            start,
            target,
            copy_audio = options.copy_audio,
            "Exporting video"
        );

        let mut muxer = Multiplexer::create(out_path)?;
        for track in sources.tracks() {
            muxer.register_track(track)?;
        }

        let (control, outcome) = flume::unbounded();
        let backend = Arc::clone(self.source.backend());
        let mediator = ExportMediator::new(
            ExportSetup {
                backend: Arc::clone(&backend),
                sources: sources.clone(),
                filters: self.filters.clone(),
                options,
                config: self.config.clone(),
                listener,
                muxer,
                progress: ExportProgress::new(target, target_duration_us),
            },
            control,
        );

        let window = DecodeWindow::new(interval, adjusted, start);
        let sink: Arc<dyn DecodeSink> = mediator.clone();
        let audio = audio.zip(sources.get(Track::Audio));
        let decoders = match export_decoders(
            backend.as_ref(),
            (video, &video_format),
            audio,
            window,
            sink,
            &self.config,
        ) {
            Ok(decoders) => decoders,
            Err(err) => {
                // Nothing has run yet; drop the half-created output.
                mediator.release(false)?;
                return Err(err);
            }
        };

        Supervisor::new("export", self.config.clone(), decoders, mediator, outcome).spawn()
    }

    /// Reject windows whose first frame lies past the end of the video.
    fn check_bounds(&mut self, first_frames: u64) -> Result<()> {
        let total = self.total_frame_count()?;
        if first_frames >= total {
            return Err(PipelineError::OutOfBounds {
                requested: first_frames,
                total,
            });
        }
        Ok(())
    }
}
/// Decode engines for an export: video first, then audio when copied.
fn export_decoders(
    backend: &dyn MediaBackend,
    (video, video_format): (Box<dyn MediaExtractor>, &MediaFormat),
    audio: Option<(Box<dyn MediaExtractor>, &MediaFormat)>,
    window: DecodeWindow,
    sink: Arc<dyn DecodeSink>,
    config: &PipelineConfig,
) -> Result<Vec<DecodeEngine>> {
    let mut decoders = vec![DecodeEngine::video(
        backend,
        video,
        video_format,
        window,
        Arc::clone(&sink),
        config.engine_timeouts(),
    )?];
    if let Some((extractor, format)) = audio {
        decoders.push(DecodeEngine::audio(
            backend,
            extractor,
            format,
            window,
            sink,
            config.engine_timeouts(),
        )?);
    }
    Ok(decoders)
}

