//! In-memory container and extractor.

use crate::backend::{sync_sample, MediaExtractor, SeekMode};
use crate::error::{CodecError, Result};
use reel_core::timing::frame_to_timestamp;
use reel_core::{BufferFlags, CoreError, MediaFormat};
use std::sync::Arc;

/// Bytes per synthetic audio sample frame (16-bit PCM).
const BYTES_PER_AUDIO_SAMPLE: usize = 2;
/// Sample frames per synthetic audio access unit.
const AUDIO_FRAMES_PER_CHUNK: u32 = 1024;

/// One stored access unit.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedSample {
    pub data: Vec<u8>,
    pub timestamp_us: i64,
    pub flags: BufferFlags,
}

impl std::fmt::Debug for EncodedSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedSample")
            .field("size", &self.data.len())
            .field("timestamp_us", &self.timestamp_us)
            .field("flags", &self.flags)
            .finish()
    }
}

/// One track of a [`SyntheticMedia`].
#[derive(Debug, Clone)]
pub struct SyntheticTrack {
    pub format: MediaFormat,
    pub samples: Vec<EncodedSample>,
}

/// A generated container: a video track of raw RGBA frames and an optional
/// PCM audio track.
///
/// Pixel `(x, y)` of frame `n` is `[n % 256, y % 256, n / 256 % 256, 255]`, so
/// tests can recover which frame an image came from with [`frame_index`].
#[derive(Debug, Clone)]
pub struct SyntheticMedia {
    tracks: Vec<SyntheticTrack>,
}

impl SyntheticMedia {
    /// A video-only clip with a key frame every second.
    pub fn video(width: u32, height: u32, frame_rate: u32, frame_count: u64) -> Self {
        let duration_us = frame_to_timestamp(frame_count, frame_rate);
        let format = MediaFormat::video("video/avc", width, height)
            .with_frame_rate(frame_rate)
            .with_duration_us(duration_us);

        let samples = (0..frame_count)
            .map(|n| EncodedSample {
                data: synthetic_frame(width, height, n),
                timestamp_us: frame_to_timestamp(n, frame_rate),
                flags: BufferFlags::empty(),
            })
            .collect();

        let mut media = Self {
            tracks: vec![SyntheticTrack { format, samples }],
        };
        media.set_key_frames(frame_rate.max(1) as usize);
        media
    }

    /// Place a key frame every `spacing` video frames.
    #[must_use]
    pub fn with_key_frame_spacing(mut self, spacing: usize) -> Self {
        self.set_key_frames(spacing.max(1));
        self
    }

    /// Tag the video track with a display rotation.
    #[must_use]
    pub fn with_rotation(mut self, degrees: u32) -> Self {
        if let Some(video) = self.tracks.first_mut() {
            video.format.rotation = Some(degrees);
        }
        self
    }

    /// Add a stereo-or-mono PCM track covering the video's duration.
    #[must_use]
    pub fn with_audio(mut self, sample_rate: u32, channel_count: u32) -> Self {
        let duration_us = self
            .tracks
            .first()
            .and_then(|track| track.format.duration_us)
            .unwrap_or(0);
        let chunk_bytes =
            AUDIO_FRAMES_PER_CHUNK as usize * channel_count as usize * BYTES_PER_AUDIO_SAMPLE;

        let mut samples = Vec::new();
        let mut frames: u64 = 0;
        loop {
            let timestamp_us = frame_to_timestamp(frames, sample_rate);
            if timestamp_us >= duration_us {
                break;
            }
            samples.push(EncodedSample {
                data: vec![(samples.len() % 251) as u8; chunk_bytes],
                timestamp_us,
                flags: BufferFlags::KEY_FRAME,
            });
            frames += AUDIO_FRAMES_PER_CHUNK as u64;
        }

        let format = MediaFormat::audio("audio/mp4a-latm", sample_rate, channel_count)
            .with_duration_us(duration_us)
            .with_bit_rate(128_000);
        self.tracks.push(SyntheticTrack { format, samples });
        self
    }

    /// Tracks in container order, video first.
    pub fn tracks(&self) -> &[SyntheticTrack] {
        &self.tracks
    }

    fn set_key_frames(&mut self, spacing: usize) {
        if let Some(video) = self.tracks.first_mut() {
            for (n, sample) in video.samples.iter_mut().enumerate() {
                sample.flags.set(BufferFlags::KEY_FRAME, n % spacing == 0);
            }
        }
    }
}

/// RGBA payload of synthetic frame `n`.
pub fn synthetic_frame(width: u32, height: u32, n: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for _ in 0..width {
            data.extend_from_slice(&[(n % 256) as u8, (y % 256) as u8, (n / 256 % 256) as u8, 255]);
        }
    }
    data
}

/// Recover the synthetic frame index encoded in a top-left pixel.
pub fn frame_index(pixel: [u8; 4]) -> u64 {
    pixel[0] as u64 + pixel[2] as u64 * 256
}

/// Extractor over a [`SyntheticMedia`].
pub struct SoftwareExtractor {
    media: Arc<SyntheticMedia>,
    selected: Option<usize>,
    position: usize,
}

impl SoftwareExtractor {
    /// Extractor with no track selected.
    pub fn new(media: Arc<SyntheticMedia>) -> Self {
        Self {
            media,
            selected: None,
            position: 0,
        }
    }

    fn current(&self) -> Option<&EncodedSample> {
        self.selected
            .and_then(|index| self.media.tracks.get(index))
            .and_then(|track| track.samples.get(self.position))
    }
}

impl MediaExtractor for SoftwareExtractor {
    fn track_count(&self) -> usize {
        self.media.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<MediaFormat> {
        self.media
            .tracks
            .get(index)
            .map(|track| track.format.clone())
            .ok_or_else(|| CoreError::unsupported(format!("track index {}", index)).into())
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if index >= self.media.tracks.len() {
            return Err(CodecError::Configure(format!(
                "cannot select track {} of {}",
                index,
                self.media.tracks.len()
            )));
        }
        self.selected = Some(index);
        self.position = 0;
        Ok(())
    }

    fn sample_time(&self) -> Option<i64> {
        self.current().map(|sample| sample.timestamp_us)
    }

    fn sample_flags(&self) -> BufferFlags {
        self.current()
            .map(|sample| sample.flags)
            .unwrap_or_default()
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let sample = self
            .current()
            .ok_or_else(|| CodecError::Configure("no sample to read".into()))?;
        buf.clear();
        buf.extend_from_slice(&sample.data);
        Ok(buf.len())
    }

    fn advance(&mut self) -> bool {
        if self.current().is_none() {
            return false;
        }
        self.position += 1;
        self.current().is_some()
    }

    fn seek_to(&mut self, timestamp_us: i64, mode: SeekMode) {
        let Some(track) = self.selected.and_then(|index| self.media.tracks.get(index)) else {
            return;
        };
        let keys = track
            .samples
            .iter()
            .enumerate()
            .filter(|(_, sample)| sample.flags.contains(BufferFlags::KEY_FRAME))
            .map(|(index, sample)| (index, sample.timestamp_us));
        self.position = sync_sample(keys, timestamp_us, mode).unwrap_or(track.samples.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(media: SyntheticMedia) -> SoftwareExtractor {
        let mut extractor = SoftwareExtractor::new(Arc::new(media));
        extractor.select_track(0).unwrap();
        extractor
    }

    #[test]
    fn test_video_track_layout() {
        let media = SyntheticMedia::video(4, 2, 60, 308);
        let video = &media.tracks()[0];
        assert_eq!(video.samples.len(), 308);
        assert_eq!(video.format.frame_rate, Some(60));
        assert_eq!(video.format.duration_us, Some(5_133_333));
        assert!(video.samples[0].flags.contains(BufferFlags::KEY_FRAME));
        assert!(video.samples[60].flags.contains(BufferFlags::KEY_FRAME));
        assert!(!video.samples[61].flags.contains(BufferFlags::KEY_FRAME));
    }

    #[test]
    fn test_audio_track_covers_duration() {
        let media = SyntheticMedia::video(2, 2, 60, 308).with_audio(44_100, 2);
        let audio = &media.tracks()[1];
        let last = audio.samples.last().unwrap();
        assert!(last.timestamp_us < 5_133_333);
        assert!(last.timestamp_us + 23_220 >= 5_133_333);
        assert_eq!(audio.samples[0].data.len(), 4096);
    }

    #[test]
    fn test_read_and_advance() {
        let mut extractor = extractor(SyntheticMedia::video(2, 2, 10, 3));
        let mut buf = Vec::new();
        assert_eq!(extractor.read_sample(&mut buf).unwrap(), 16);
        assert_eq!(frame_index([buf[0], buf[1], buf[2], buf[3]]), 0);
        assert!(extractor.advance());
        assert_eq!(extractor.sample_time(), Some(100_000));
        assert!(extractor.advance());
        assert!(!extractor.advance());
        assert_eq!(extractor.sample_time(), None);
    }

    #[test]
    fn test_seek_modes() {
        let media = SyntheticMedia::video(2, 2, 10, 30).with_key_frame_spacing(10);
        let mut extractor = extractor(media);

        extractor.seek_to(1_400_000, SeekMode::PreviousSync);
        assert_eq!(extractor.sample_time(), Some(1_000_000));

        extractor.seek_to(1_400_000, SeekMode::ClosestSync);
        assert_eq!(extractor.sample_time(), Some(1_000_000));

        extractor.seek_to(1_600_000, SeekMode::ClosestSync);
        assert_eq!(extractor.sample_time(), Some(2_000_000));

        extractor.seek_to(2_100_000, SeekMode::NextSync);
        assert_eq!(extractor.sample_time(), None);
    }
}
