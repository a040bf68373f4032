//! Encoder output formats and encoder lookup.

use crate::backend::{CodecInfo, MediaBackend};
use crate::error::{CodecError, Result};
use reel_core::{ColorFormat, MediaFormat};

/// MIME type of encoded video.
pub const VIDEO_MIME: &str = "video/avc";
/// MIME type of encoded audio.
pub const AUDIO_MIME: &str = "audio/mp4a-latm";
/// AAC Low Complexity audio object type.
pub const AAC_LC: u8 = 2;
/// Audio bit rate used when the source does not report one.
const DEFAULT_AUDIO_BIT_RATE: u32 = 128_000;

/// Knobs for the video encoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoEncoding {
    /// Target bit rate; `None` (or a non-positive value) estimates one.
    pub bit_rate: Option<i64>,
    pub frame_rate_scale: f64,
    /// Seconds between key frames.
    pub key_frame_interval: i32,
}

impl Default for VideoEncoding {
    fn default() -> Self {
        Self {
            bit_rate: None,
            frame_rate_scale: 1.0,
            key_frame_interval: 0,
        }
    }
}

/// A reasonable AVC bit rate for the given size and frame rate.
pub fn estimate_video_bit_rate(width: u32, height: u32, frame_rate: u32) -> u32 {
    (0.07 * 2.0 * width as f64 * height as f64 * frame_rate as f64) as u32
}

/// Output format for the video encoder, sized to the filtered frames.
pub fn video_format(
    width: u32,
    height: u32,
    source: &MediaFormat,
    encoding: &VideoEncoding,
) -> Result<MediaFormat> {
    let source_fps = source.require_frame_rate()?;
    let frame_rate = ((source_fps as f64 * encoding.frame_rate_scale) as u32).max(1);
    let bit_rate = match encoding.bit_rate {
        Some(rate) if rate > 0 => rate.min(u32::MAX as i64) as u32,
        _ => estimate_video_bit_rate(width, height, frame_rate),
    };

    Ok(MediaFormat::video(VIDEO_MIME, width, height)
        .with_bit_rate(bit_rate)
        .with_frame_rate(frame_rate)
        .with_key_frame_interval(encoding.key_frame_interval)
        .with_color_format(ColorFormat::Nv12))
}

/// Output format for the audio encoder, matching the source stream.
pub fn audio_format(source: &MediaFormat) -> Result<MediaFormat> {
    Ok(MediaFormat::audio(
        AUDIO_MIME,
        source.require_sample_rate()?,
        source.require_channel_count()?,
    )
    .with_bit_rate(source.bit_rate.unwrap_or(DEFAULT_AUDIO_BIT_RATE))
    .with_aac_profile(AAC_LC))
}

/// Find an encoder for `format`'s MIME type.
pub fn find_encoder(backend: &dyn MediaBackend, format: &MediaFormat) -> Result<CodecInfo> {
    backend
        .find_encoder(&format.mime)
        .ok_or_else(|| CodecError::NoCodec(format.mime.clone()))
}
