//! Track kinds and a small fixed map keyed by them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of elementary stream a pipeline stage works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Video,
    Audio,
}

impl Track {
    /// Every track kind, in processing order.
    pub const ALL: [Track; 2] = [Track::Video, Track::Audio];

    /// MIME prefix used to recognise this kind of track in a container.
    pub fn mime_prefix(self) -> &'static str {
        match self {
            Track::Video => "video/",
            Track::Audio => "audio/",
        }
    }

    /// Whether a MIME type belongs to this track kind.
    pub fn matches_mime(self, mime: &str) -> bool {
        mime.starts_with(self.mime_prefix())
    }

    /// Classify a MIME type.
    pub fn from_mime(mime: &str) -> Option<Track> {
        Track::ALL.into_iter().find(|track| track.matches_mime(mime))
    }

    fn slot(self) -> usize {
        match self {
            Track::Video => 0,
            Track::Audio => 1,
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Track::Video => write!(f, "video"),
            Track::Audio => write!(f, "audio"),
        }
    }
}

/// A map from [`Track`] to `T`.
///
/// There are only two track kinds, so entries live in fixed slots and
/// iteration always visits video before audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMap<T> {
    slots: [Option<T>; 2],
}

impl<T> Default for TrackMap<T> {
    fn default() -> Self {
        Self { slots: [None, None] }
    }
}

impl<T> TrackMap<T> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one.
    pub fn insert(&mut self, track: Track, value: T) -> Option<T> {
        self.slots[track.slot()].replace(value)
    }

    /// Value for `track`, if set.
    pub fn get(&self, track: Track) -> Option<&T> {
        self.slots[track.slot()].as_ref()
    }

    /// Mutable value for `track`, if set.
    pub fn get_mut(&mut self, track: Track) -> Option<&mut T> {
        self.slots[track.slot()].as_mut()
    }

    /// Get the value for `track`, inserting one built by `f` if absent.
    pub fn get_or_insert_with(&mut self, track: Track, f: impl FnOnce() -> T) -> &mut T {
        self.slots[track.slot()].get_or_insert_with(f)
    }

    /// Remove and return the value for `track`.
    pub fn remove(&mut self, track: Track) -> Option<T> {
        self.slots[track.slot()].take()
    }

    /// Check whether `track` has a value.
    pub fn contains(&self, track: Track) -> bool {
        self.slots[track.slot()].is_some()
    }

    /// Get number of tracks with a value.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Check if no track has a value.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracks that currently have an entry.
    pub fn tracks(&self) -> impl Iterator<Item = Track> + '_ {
        Track::ALL.into_iter().filter(|track| self.contains(*track))
    }

    /// Iterate `(track, value)` pairs, video first.
    pub fn iter(&self) -> impl Iterator<Item = (Track, &T)> {
        Track::ALL
            .into_iter()
            .zip(self.slots.iter())
            .filter_map(|(track, slot)| slot.as_ref().map(|value| (track, value)))
    }

    /// Iterate values, video first.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().flatten()
    }

    /// Iterate values mutably, video first.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().flatten()
    }

    /// Remove every entry, yielding them in track order.
    pub fn drain(&mut self) -> impl Iterator<Item = (Track, T)> + '_ {
        Track::ALL
            .into_iter()
            .zip(self.slots.iter_mut())
            .filter_map(|(track, slot)| slot.take().map(|value| (track, value)))
    }
}
