//! Export completion accounting.

use reel_core::{Track, TrackMap};

/// Highest value reported while some track is still unfinished.
const UNFINISHED_CEILING: f32 = 0.99;

/// A progress value to hand to the listener.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Report {
    pub value: f32,
    /// Set on the single report that completes the export.
    pub completed: bool,
}

/// Tracks how much of an export has been written.
///
/// Video counts encoded frames against a target frame count, audio counts
/// presentation time against a target duration.
#[derive(Debug)]
pub(crate) struct ExportProgress {
    target_frames: u64,
    target_duration_us: i64,
    frames: u64,
    audio_timestamp_us: i64,
    finished: TrackMap<bool>,
    reported: f32,
    completed: bool,
}

impl ExportProgress {
    /// `target_duration_us` is set when audio is exported alongside video.
    pub fn new(target_frames: u64, target_duration_us: Option<i64>) -> Self {
        let mut finished = TrackMap::new();
        finished.insert(Track::Video, false);
        if target_duration_us.is_some() {
            finished.insert(Track::Audio, false);
        }
        Self {
            target_frames,
            target_duration_us: target_duration_us.unwrap_or(1).max(1),
            frames: 0,
            audio_timestamp_us: 0,
            finished,
            reported: 0.0,
            completed: false,
        }
    }

    /// Number of tracks counted toward progress.
    pub fn track_count(&self) -> usize {
        self.finished.len()
    }

    /// Whether completion has been reported.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Account for the `encoded`-th video frame. Returns whether to write it.
    pub fn admit_video(&mut self, encoded: u64) -> bool {
        if encoded > self.target_frames {
            return false;
        }
        self.frames = encoded;
        if encoded >= self.target_frames {
            self.finish(Track::Video);
        }
        true
    }

    /// Account for an audio buffer at `timestamp_us`. Returns whether to write it.
    ///
    /// The first buffer past the target duration is still written so the audio
    /// covers the whole video.
    pub fn admit_audio(&mut self, timestamp_us: i64) -> bool {
        if self.audio_timestamp_us > self.target_duration_us {
            return false;
        }
        self.audio_timestamp_us = timestamp_us;
        if timestamp_us >= self.target_duration_us {
            self.finish(Track::Audio);
        }
        true
    }

    /// Mark `track` as fully written.
    pub fn finish(&mut self, track: Track) {
        if let Some(done) = self.finished.get_mut(track) {
            *done = true;
        }
    }

    fn all_finished(&self) -> bool {
        self.finished.values().all(|done| *done)
    }

    fn fraction(&self) -> f32 {
        let tracks = self.track_count().max(1) as f64;
        let video = self.frames as f64 / (self.target_frames.max(1) as f64 * tracks);
        let audio = if self.finished.contains(Track::Audio) {
            self.audio_timestamp_us.max(0) as f64 / (self.target_duration_us as f64 * tracks)
        } else {
            0.0
        };
        let rounded = ((video + audio) * 100.0).round() / 100.0;
        rounded.min(1.0) as f32
    }

    /// Current progress. Never lower than a previous report; exactly 1 once
    /// every track has finished.
    pub fn report(&mut self) -> Report {
        let value = if self.all_finished() {
            1.0
        } else {
            self.fraction().min(UNFINISHED_CEILING)
        };
        self.reported = self.reported.max(value);

        let completed = self.all_finished() && !self.completed;
        if completed {
            self.completed = true;
        }
        Report {
            value: self.reported,
            completed,
        }
    }
}
