//! Frame window and export options.
//!
//! Values are signed so that negative input is representable and can be
//! rejected by validation rather than wrapping.

use crate::error::{PipelineError, Result};
use reel_codec::format_factory::VideoEncoding;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which frames of the source to process.
///
/// Every `frame_interval`-th frame starting at `starting_frame_offset`, up to
/// `num_frames` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameWindow {
    pub frame_interval: i32,
    pub num_frames: i32,
    pub starting_frame_offset: i32,
}

impl Default for FrameWindow {
    fn default() -> Self {
        Self {
            frame_interval: 1,
            num_frames: i32::MAX,
            starting_frame_offset: 0,
        }
    }
}

impl FrameWindow {
    /// Window from raw values; call `validate` before use.
    pub fn new(frame_interval: i32, num_frames: i32, starting_frame_offset: i32) -> Self {
        Self {
            frame_interval,
            num_frames,
            starting_frame_offset,
        }
    }

    /// Set the gap between delivered frames.
    #[must_use]
    pub fn with_frame_interval(mut self, interval: i32) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Set how many frames to deliver.
    #[must_use]
    pub fn with_num_frames(mut self, frames: i32) -> Self {
        self.num_frames = frames;
        self
    }

    /// Set the first frame delivered.
    #[must_use]
    pub fn with_starting_frame_offset(mut self, offset: i32) -> Self {
        self.starting_frame_offset = offset;
        self
    }

    /// Check the values without touching any resource.
    pub fn validate(&self) -> Result<()> {
        if self.frame_interval <= 0 {
            return Err(PipelineError::invalid_options(format!(
                "frame interval must be positive, got {}",
                self.frame_interval
            )));
        }
        if self.num_frames <= 0 {
            return Err(PipelineError::invalid_options(format!(
                "number of frames must be positive, got {}",
                self.num_frames
            )));
        }
        if self.starting_frame_offset < 0 {
            return Err(PipelineError::invalid_options(format!(
                "starting frame offset must not be negative, got {}",
                self.starting_frame_offset
            )));
        }
        Ok(())
    }

    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub(crate) fn interval(&self) -> u64 {
        self.frame_interval.max(1) as u64
    }

    pub(crate) fn frames(&self) -> u64 {
        self.num_frames.max(0) as u64
    }

    pub(crate) fn offset(&self) -> u64 {
        self.starting_frame_offset.max(0) as u64
    }
}

/// Settings for re-encoding a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    #[serde(flatten)]
    pub window: FrameWindow,
    /// Target video bit rate; unset estimates one from size and frame rate.
    pub bit_rate: Option<i64>,
    /// Multiplier applied to the output frame rate. Timestamps are divided by it.
    pub frame_rate_scale: f64,
    /// Seconds between key frames; zero makes every frame a key frame.
    pub key_frame_interval: i32,
    /// Re-encode the source's audio track alongside the video.
    pub copy_audio: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            window: FrameWindow::default(),
            bit_rate: None,
            frame_rate_scale: 1.0,
            key_frame_interval: 0,
            copy_audio: false,
        }
    }
}

impl ExportOptions {
    /// Set the frame window.
    #[must_use]
    pub fn with_window(mut self, window: FrameWindow) -> Self {
        self.window = window;
        self
    }

    /// Set the video bit rate.
    #[must_use]
    pub fn with_bit_rate(mut self, bit_rate: i64) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }

    /// Set the playback speed factor.
    #[must_use]
    pub fn with_frame_rate_scale(mut self, scale: f64) -> Self {
        self.frame_rate_scale = scale;
        self
    }

    /// Set the key frame interval in seconds.
    #[must_use]
    pub fn with_key_frame_interval(mut self, seconds: i32) -> Self {
        self.key_frame_interval = seconds;
        self
    }

    /// Set whether the source audio is copied.
    #[must_use]
    pub fn with_copy_audio(mut self, copy_audio: bool) -> Self {
        self.copy_audio = copy_audio;
        self
    }

    /// Check the values without touching any resource.
    pub fn validate(&self) -> Result<()> {
        self.window.validate()?;
        if !(self.frame_rate_scale.is_finite() && self.frame_rate_scale > 0.0) {
            return Err(PipelineError::invalid_options(format!(
                "frame rate scale must be positive, got {}",
                self.frame_rate_scale
            )));
        }
        if self.key_frame_interval < 0 {
            return Err(PipelineError::invalid_options(format!(
                "key frame interval must not be negative, got {}",
                self.key_frame_interval
            )));
        }
        if self.copy_audio
            && (self.window.starting_frame_offset > 0 || self.frame_rate_scale != 1.0)
        {
            return Err(PipelineError::invalid_options(
                "audio can only be copied from frame 0 at the original frame rate",
            ));
        }
        Ok(())
    }

    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub(crate) fn video_encoding(&self) -> VideoEncoding {
        VideoEncoding {
            bit_rate: self.bit_rate,
            frame_rate_scale: self.frame_rate_scale,
            key_frame_interval: self.key_frame_interval,
        }
    }
}
