//! Conversions between frame indices, timestamps and counts.
//!
//! Timestamps are microseconds. Frame/timestamp conversion is exact on the way
//! out and rounds on the way back, so `timestamp_to_frame(frame_to_timestamp(f))`
//! always returns `f`.

/// Microseconds per second.
pub const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Presentation time of frame `frame` at `fps` frames per second.
pub fn frame_to_timestamp(frame: u64, fps: u32) -> i64 {
    (frame as f64 * MICROS_PER_SECOND / fps as f64) as i64
}

/// Frame index nearest to `timestamp_us`.
pub fn timestamp_to_frame(timestamp_us: i64, fps: u32) -> u64 {
    (timestamp_us.max(0) as f64 * fps as f64 / MICROS_PER_SECOND).round() as u64
}

/// Number of frames in `duration_us` of video.
pub fn frame_count(duration_us: i64, fps: u32) -> u64 {
    (fps as f64 * duration_us.max(0) as f64 / MICROS_PER_SECOND).round() as u64
}

/// Number of audio samples per channel in `duration_us` of audio.
pub fn audio_sample_count(duration_us: i64, sample_rate: u32) -> u64 {
    frame_count(duration_us, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_timestamps() {
        assert_eq!(frame_to_timestamp(0, 60), 0);
        assert_eq!(frame_to_timestamp(60, 60), 1_000_000);
        assert_eq!(frame_to_timestamp(1, 60), 16_666);
        assert_eq!(timestamp_to_frame(16_666, 60), 1);
        assert_eq!(timestamp_to_frame(-5, 60), 0);
    }

    #[test]
    fn test_counts() {
        assert_eq!(frame_count(frame_to_timestamp(308, 60), 60), 308);
        assert_eq!(audio_sample_count(5_133_333, 44_100), 226_380);
        assert_eq!(frame_count(0, 30), 0);
    }
}
