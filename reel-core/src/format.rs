//! Media format descriptions.
//!
//! A [`MediaFormat`] is what an extractor reports for a track, what a codec is
//! configured with, and what an encoder reports once its output format is
//! known. Keys that only make sense for one kind of track are optional.

use crate::error::{CoreError, Result};
use crate::track::Track;
use serde::{Deserialize, Serialize};

/// Raw pixel layout accepted by an encoder's input buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorFormat {
    /// Interleaved 8-bit RGBA.
    Rgba8888,
    /// 4:2:0 with a full Y plane followed by an interleaved UV plane.
    Nv12,
}

/// Description of a single elementary stream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaFormat {
    /// MIME type, e.g. `video/avc` or `audio/mp4a-latm`.
    pub mime: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Frames per second.
    pub frame_rate: Option<u32>,
    /// Clockwise rotation to apply on display, in degrees.
    pub rotation: Option<u32>,
    pub color_format: Option<ColorFormat>,
    /// Seconds between key frames; zero requests every frame be a key frame.
    pub key_frame_interval: Option<i32>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u32>,
    /// AAC audio object type.
    pub aac_profile: Option<u8>,
    /// Target bit rate in bits per second.
    pub bit_rate: Option<u32>,
    /// Stream duration in microseconds.
    pub duration_us: Option<i64>,
    pub max_input_size: Option<usize>,
    /// Codec-specific data (parameter sets, decoder config).
    pub csd: Vec<Vec<u8>>,
}

impl MediaFormat {
    /// Create a video format.
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime: mime.into(),
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    /// Create an audio format.
    pub fn audio(mime: impl Into<String>, sample_rate: u32, channel_count: u32) -> Self {
        Self {
            mime: mime.into(),
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            ..Default::default()
        }
    }

    /// Set the frame rate.
    #[must_use]
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    /// Set the duration in microseconds.
    #[must_use]
    pub fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    /// Set the display rotation in degrees.
    #[must_use]
    pub fn with_rotation(mut self, degrees: u32) -> Self {
        self.rotation = Some(degrees);
        self
    }

    /// Set the bit rate.
    #[must_use]
    pub fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }

    /// Set the raw picture layout.
    #[must_use]
    pub fn with_color_format(mut self, color_format: ColorFormat) -> Self {
        self.color_format = Some(color_format);
        self
    }

    /// Set the key frame interval in seconds.
    #[must_use]
    pub fn with_key_frame_interval(mut self, seconds: i32) -> Self {
        self.key_frame_interval = Some(seconds);
        self
    }

    /// Set the AAC object type.
    #[must_use]
    pub fn with_aac_profile(mut self, profile: u8) -> Self {
        self.aac_profile = Some(profile);
        self
    }

    /// Append one codec-specific data buffer.
    #[must_use]
    pub fn with_csd(mut self, data: Vec<u8>) -> Self {
        self.csd.push(data);
        self
    }

    /// The track kind this format belongs to, judged by MIME type.
    pub fn track(&self) -> Option<Track> {
        Track::from_mime(&self.mime)
    }

    /// Width, or a missing-key error.
    pub fn require_width(&self) -> Result<u32> {
        self.width.ok_or(CoreError::MissingFormatKey("width"))
    }

    /// Height, or a missing-key error.
    pub fn require_height(&self) -> Result<u32> {
        self.height.ok_or(CoreError::MissingFormatKey("height"))
    }

    /// Frame rate, or a missing-key error.
    pub fn require_frame_rate(&self) -> Result<u32> {
        match self.frame_rate {
            Some(fps) if fps > 0 => Ok(fps),
            _ => Err(CoreError::MissingFormatKey("frame-rate")),
        }
    }

    /// Duration, or a missing-key error.
    pub fn require_duration_us(&self) -> Result<i64> {
        self.duration_us.ok_or(CoreError::MissingFormatKey("duration"))
    }

    /// Sample rate, or a missing-key error.
    pub fn require_sample_rate(&self) -> Result<u32> {
        match self.sample_rate {
            Some(rate) if rate > 0 => Ok(rate),
            _ => Err(CoreError::MissingFormatKey("sample-rate")),
        }
    }

    /// Channel count, or a missing-key error.
    pub fn require_channel_count(&self) -> Result<u32> {
        self.channel_count.ok_or(CoreError::MissingFormatKey("channel-count"))
    }

    /// Dimensions of decoded frames as they should be displayed.
    ///
    /// Quarter-turn rotations swap width and height.
    pub fn display_size(&self) -> Result<(u32, u32)> {
        let (width, height) = (self.require_width()?, self.require_height()?);
        match self.rotation.unwrap_or(0) % 360 {
            90 | 270 => Ok((height, width)),
            _ => Ok((width, height)),
        }
    }
}
