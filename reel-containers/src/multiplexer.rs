//! Track gathering in front of a container writer.
//!
//! Every track that will be written is registered up front. Encoders report
//! their output format as it becomes known; once all registered tracks have
//! one, the container header is written and samples start flowing. Samples
//! offered before that are dropped.

use crate::error::{ContainerError, Result};
use crate::mp4::Mp4Writer;
use crate::traits::ContainerWriter;
use reel_core::{BufferInfo, MediaFormat, Track, TrackMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct TrackSlot {
    index: Option<usize>,
    written: u64,
}

/// Gathers registered tracks and feeds one container writer.
///
/// An output file opened with [`Multiplexer::create`] only survives a
/// successful [`Multiplexer::finalize`]; otherwise it is deleted when the
/// multiplexer is discarded or dropped.
pub struct Multiplexer {
    writer: Option<Box<dyn ContainerWriter>>,
    output: Option<PathBuf>,
    tracks: TrackMap<TrackSlot>,
    started: bool,
    finalized: bool,
    completed: bool,
}

impl Multiplexer {
    /// Create an MP4 multiplexer writing to `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let mut mux = Self::new(Box::new(Mp4Writer::create(path.as_ref())?));
        mux.output = Some(path.as_ref().to_path_buf());
        Ok(mux)
    }

    /// Wrap an already opened writer.
    pub fn new(writer: Box<dyn ContainerWriter>) -> Self {
        Self {
            writer: Some(writer),
            output: None,
            tracks: TrackMap::new(),
            started: false,
            finalized: false,
            completed: false,
        }
    }

    fn writer(&mut self) -> Result<&mut Box<dyn ContainerWriter>> {
        self.writer.as_mut().ok_or(ContainerError::Discarded)
    }

    /// Declare that `track` will be written.
    pub fn register_track(&mut self, track: Track) -> Result<()> {
        if self.started {
            return Err(ContainerError::AlreadyStarted);
        }
        self.tracks.get_or_insert_with(track, TrackSlot::default);
        debug!(track = %track, registered = self.tracks.len(), "Registered track");
        Ok(())
    }

    /// Number of registered tracks.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Give a registered track its output format.
    ///
    /// Later calls for the same track are ignored. Returns whether writing
    /// has started.
    pub fn add_track(&mut self, track: Track, format: &MediaFormat) -> Result<bool> {
        let ready = self
            .tracks
            .get(track)
            .ok_or(ContainerError::UnknownTrack(track))?
            .index
            .is_some();
        if ready {
            return Ok(self.started);
        }
        let index = self.writer()?.add_track(format)?;
        if let Some(slot) = self.tracks.get_mut(track) {
            slot.index = Some(index);
        }

        if self.tracks.values().all(|slot| slot.index.is_some()) {
            let writer = self.writer()?;
            writer.start()?;
            let format = writer.format_name().to_string();
            self.started = true;
            info!(format = %format, tracks = self.tracks.len(), "Started writing output");
        }
        Ok(self.started)
    }

    /// Whether the container header has been written.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Write one encoded sample.
    ///
    /// Returns `false` without writing when output has not started yet.
    pub fn write_sample(&mut self, track: Track, data: &[u8], info: &BufferInfo) -> Result<bool> {
        if !self.started || self.finalized || self.writer.is_none() {
            return Ok(false);
        }
        let index = self
            .tracks
            .get(track)
            .and_then(|slot| slot.index)
            .ok_or(ContainerError::UnknownTrack(track))?;
        self.writer()?.write_sample(index, data, info)?;
        if let Some(slot) = self.tracks.get_mut(track) {
            slot.written += 1;
        }
        Ok(true)
    }

    /// Samples written for `track` so far.
    pub fn samples_written(&self, track: Track) -> u64 {
        self.tracks.get(track).map_or(0, |slot| slot.written)
    }

    /// Finish the output.
    ///
    /// Fails with [`ContainerError::InsufficientData`] when a registered track
    /// never received a sample. A failed finalize discards the output.
    pub fn finalize(&mut self) -> Result<()> {
        if self.completed {
            return Ok(());
        }
        if self.writer.is_none() {
            return Err(ContainerError::Discarded);
        }
        self.finalized = true;

        let empty = self.tracks.iter().find(|(_, slot)| slot.written == 0).map(|(track, _)| track);
        if let Some(track) = empty {
            warn!(track = %track, "Finalizing output with an empty track");
            self.discard();
            return Err(ContainerError::InsufficientData(track));
        }
        if let Err(err) = self.writer()?.finish() {
            self.discard();
            return Err(err);
        }
        self.completed = true;
        info!(
            video = self.samples_written(Track::Video),
            audio = self.samples_written(Track::Audio),
            "Finalized output"
        );
        Ok(())
    }

    /// Drop the output without finishing it.
    ///
    /// The file opened by [`Multiplexer::create`] is deleted. Does nothing
    /// after a successful [`Multiplexer::finalize`].
    pub fn discard(&mut self) {
        if self.completed {
            return;
        }
        self.finalized = true;
        // Close the file before removing it.
        if self.writer.take().is_none() {
            return;
        }
        let Some(path) = self.output.take() else {
            debug!("Discarded output");
            return;
        };
        match fs::remove_file(&path) {
            Ok(()) => info!(path = %path.display(), "Deleted unfinished output"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), error = %err, "Failed to delete unfinished output"),
        }
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.discard();
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("format", &self.writer.as_ref().map(|writer| writer.format_name()))
            .field("output", &self.output)
            .field("tracks", &self.tracks)
            .field("started", &self.started)
            .field("finalized", &self.finalized)
            .finish()
    }
}
