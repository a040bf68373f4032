//! Per-track access to a source file.
//!
//! Each track type gets its own extractor, opened on demand. Formats survive
//! [`DataSource::take_extractor`] so metadata stays queryable after the
//! extractor has been handed to a decoder.

use crate::error::Result;
use reel_codec::{MediaBackend, MediaExtractor, SeekMode};
use reel_core::{timing, BufferFlags, CoreError, MediaFormat, Track, TrackMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Number of frames a window will deliver from a video of `total_frames`.
///
/// `num_frames` is expected to be clamped to `total_frames` already.
pub fn frames_to_process(total_frames: u64, frame_interval: u64, num_frames: u64, start: u64) -> u64 {
    let interval = frame_interval.max(1);
    let offset_length = if num_frames.saturating_add(start) > total_frames {
        num_frames.abs_diff(start)
    } else {
        num_frames
    };
    let offset_frames = total_frames.abs_diff(start);

    if offset_frames <= offset_length.saturating_mul(interval) {
        (offset_frames - offset_frames % interval) / interval
    } else if interval < offset_length {
        offset_length - offset_length % interval
    } else {
        offset_length
    }
}

/// Lazily opened tracks of one media file.
pub struct DataSource {
    backend: Arc<dyn MediaBackend>,
    path: PathBuf,
    extractors: TrackMap<Box<dyn MediaExtractor>>,
    formats: TrackMap<MediaFormat>,
}

impl DataSource {
    /// Source for `path`; nothing is opened yet.
    pub fn new(backend: Arc<dyn MediaBackend>, path: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            path: path.into(),
            extractors: TrackMap::new(),
            formats: TrackMap::new(),
        }
    }

    /// Path of the media file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Backend the file is opened through.
    pub fn backend(&self) -> &Arc<dyn MediaBackend> {
        &self.backend
    }

    /// Open a fresh extractor on the first track of type `track`.
    ///
    /// Replaces any extractor already prepared for that track.
    pub fn prepare(&mut self, track: Track) -> Result<&MediaFormat> {
        let mut extractor = self.backend.open_extractor(&self.path)?;
        let mut selected = None;
        for index in 0..extractor.track_count() {
            let format = extractor.track_format(index)?;
            if track.matches_mime(&format.mime) {
                extractor.select_track(index)?;
                selected = Some(format);
                break;
            }
        }
        let format = selected.ok_or(CoreError::TrackNotFound(track))?;
        debug!(track = %track, mime = %format.mime, path = %self.path.display(), "Prepared track");

        self.extractors.insert(track, extractor);
        self.formats.insert(track, format);
        self.format(track)
    }

    /// Prepare `track` unless an unused extractor is already waiting.
    pub fn ensure_prepared(&mut self, track: Track) -> Result<()> {
        if !self.is_prepared(track) {
            self.prepare(track)?;
        }
        Ok(())
    }

    /// Whether an extractor for `track` is open and not yet taken.
    pub fn is_prepared(&self, track: Track) -> bool {
        self.extractors.contains(track)
    }

    /// Format of a prepared track.
    pub fn format(&self, track: Track) -> Result<&MediaFormat> {
        Ok(self
            .formats
            .get(track)
            .ok_or(CoreError::TrackNotFound(track))?)
    }

    /// Hand over the prepared extractor for `track`.
    ///
    /// The source forgets it, so a consumed extractor is never reused.
    pub fn take_extractor(&mut self, track: Track) -> Result<Box<dyn MediaExtractor>> {
        Ok(self
            .extractors
            .remove(track)
            .ok_or(CoreError::TrackNotFound(track))?)
    }

    /// Video frames per second.
    pub fn frame_rate(&self) -> Result<u32> {
        Ok(self.format(Track::Video)?.require_frame_rate()?)
    }

    /// Audio samples per second.
    pub fn sample_rate(&self) -> Result<u32> {
        Ok(self.format(Track::Audio)?.require_sample_rate()?)
    }

    /// Duration of the video track, or of the audio track if only that is known.
    pub fn duration_us(&self) -> Result<i64> {
        let format = self
            .formats
            .get(Track::Video)
            .or_else(|| self.formats.get(Track::Audio))
            .ok_or(CoreError::TrackNotFound(Track::Video))?;
        Ok(format.require_duration_us()?)
    }

    /// Number of video frames.
    pub fn total_frame_count(&self) -> Result<u64> {
        Ok(timing::frame_count(self.duration_us()?, self.frame_rate()?))
    }

    /// Audio samples per channel over the whole file.
    pub fn total_audio_sample_count(&self) -> Result<u64> {
        Ok(timing::audio_sample_count(
            self.duration_us()?,
            self.sample_rate()?,
        ))
    }

    /// Presentation time of `frame`.
    pub fn frame_to_timestamp(&self, frame: u64) -> Result<i64> {
        Ok(timing::frame_to_timestamp(frame, self.frame_rate()?))
    }

    /// Frame nearest to `timestamp_us`.
    pub fn timestamp_to_frame(&self, timestamp_us: i64) -> Result<u64> {
        Ok(timing::timestamp_to_frame(timestamp_us, self.frame_rate()?))
    }

    /// Frames a window over this video will deliver. See [`frames_to_process`].
    pub fn frames_to_process(&self, frame_interval: u64, num_frames: u64, start: u64) -> Result<u64> {
        Ok(frames_to_process(
            self.total_frame_count()?,
            frame_interval,
            num_frames,
            start,
        ))
    }

    /// Seek to the last key frame at or before `frame`.
    ///
    /// The video extractor must be prepared; a prepared audio extractor is
    /// moved to the same time. Returns the key frame's number.
    pub fn seek_to_frame(&mut self, frame: u64) -> Result<u64> {
        let fps = self.frame_rate()?;
        let video = self
            .extractors
            .get_mut(Track::Video)
            .ok_or(CoreError::TrackNotFound(Track::Video))?;

        let mut key_frame = 0;
        while let Some(timestamp_us) = video.sample_time() {
            if video.sample_flags().contains(BufferFlags::KEY_FRAME) {
                let current = timing::timestamp_to_frame(timestamp_us, fps);
                if current > frame {
                    break;
                }
                key_frame = current;
            }
            if !video.advance() {
                break;
            }
        }

        let time = timing::frame_to_timestamp(key_frame, fps);
        video.seek_to(time, SeekMode::ClosestSync);
        if let Some(audio) = self.extractors.get_mut(Track::Audio) {
            audio.seek_to(time, SeekMode::ClosestSync);
        }
        debug!(frame, key_frame, "Seeked to key frame");
        Ok(key_frame)
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("backend", &self.backend.name())
            .field("path", &self.path)
            .field("prepared", &self.extractors.tracks().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use reel_codec::software::{SoftwareBackend, SyntheticMedia};

    fn source(media: SyntheticMedia) -> DataSource {
        let backend = SoftwareBackend::new();
        backend.insert("clip.mp4", media);
        DataSource::new(Arc::new(backend), "clip.mp4")
    }

    #[test]
    fn test_frames_to_process() {
        assert_eq!(frames_to_process(308, 1, 25, 0), 25);
        assert_eq!(frames_to_process(308, 13, 308, 71), 18);
        assert_eq!(frames_to_process(308, 2, 25, 0), 24);
        assert_eq!(frames_to_process(308, 1, 308, 0), 308);
        assert_eq!(frames_to_process(30, 5, 3, 5), 3);
    }

    #[test]
    fn test_metadata() {
        let mut source = source(SyntheticMedia::video(8, 8, 60, 308).with_audio(44_100, 2));
        assert!(!source.is_prepared(Track::Video));
        source.prepare(Track::Video).unwrap();
        assert!(source.is_prepared(Track::Video));
        assert_eq!(source.frame_rate().unwrap(), 60);
        assert_eq!(source.total_frame_count().unwrap(), 308);
        assert_eq!(source.frame_to_timestamp(60).unwrap(), 1_000_000);
        assert_eq!(source.timestamp_to_frame(1_000_000).unwrap(), 60);

        source.prepare(Track::Audio).unwrap();
        assert_eq!(source.sample_rate().unwrap(), 44_100);
        assert_eq!(
            source.total_audio_sample_count().unwrap(),
            timing::audio_sample_count(source.duration_us().unwrap(), 44_100)
        );
    }

    #[test]
    fn test_missing_track() {
        let mut source = source(SyntheticMedia::video(8, 8, 30, 10));
        assert!(matches!(
            source.prepare(Track::Audio),
            Err(PipelineError::Core(CoreError::TrackNotFound(Track::Audio)))
        ));
        assert!(source.take_extractor(Track::Audio).is_err());
    }

    #[test]
    fn test_unknown_path() {
        let mut source = DataSource::new(Arc::new(SoftwareBackend::new()), "missing.mp4");
        assert!(source.prepare(Track::Video).is_err());
    }

    #[test]
    fn test_take_extractor_once() {
        let mut source = source(SyntheticMedia::video(8, 8, 30, 10));
        source.prepare(Track::Video).unwrap();
        assert!(source.take_extractor(Track::Video).is_ok());
        assert!(!source.is_prepared(Track::Video));
        assert!(source.take_extractor(Track::Video).is_err());
        // The format is still known after the extractor is gone.
        assert_eq!(source.total_frame_count().unwrap(), 10);
    }

    #[test]
    fn test_seek_to_frame() {
        let mut source = source(SyntheticMedia::video(8, 8, 30, 120).with_key_frame_spacing(25));
        source.prepare(Track::Video).unwrap();
        assert_eq!(source.seek_to_frame(71).unwrap(), 50);

        let extractor = source.take_extractor(Track::Video).unwrap();
        assert_eq!(
            extractor.sample_time(),
            Some(timing::frame_to_timestamp(50, 30))
        );
    }

    #[test]
    fn test_seek_on_key_frame() {
        let mut source = source(SyntheticMedia::video(8, 8, 30, 120).with_key_frame_spacing(25));
        source.prepare(Track::Video).unwrap();
        assert_eq!(source.seek_to_frame(75).unwrap(), 75);
        assert_eq!(source.seek_to_frame(3).unwrap(), 0);
    }
}
