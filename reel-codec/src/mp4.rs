//! Extractor over MP4 files on disk.

use crate::backend::{sync_sample, MediaExtractor, SeekMode};
use crate::error::{CodecError, Result};
use reel_containers::{Mp4Reader, SampleRef};
use reel_core::{BufferFlags, CoreError, MediaFormat};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// [`MediaExtractor`] backed by an [`Mp4Reader`].
///
/// Tracks keep the order of the file's `trak` boxes. Sync samples come from
/// `stss`; a track without one is all sync samples.
pub struct Mp4Extractor<R: Read + Seek + Send> {
    reader: Mp4Reader<R>,
    selected: Option<usize>,
    position: usize,
}

impl Mp4Extractor<BufReader<File>> {
    /// Open the MP4 file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_reader(Mp4Reader::open(path)?))
    }
}

impl<R: Read + Seek + Send> Mp4Extractor<R> {
    /// Index an MP4 stream.
    pub fn new(reader: R) -> Result<Self> {
        Ok(Self::from_reader(Mp4Reader::new(reader)?))
    }

    fn from_reader(reader: Mp4Reader<R>) -> Self {
        Self {
            reader,
            selected: None,
            position: 0,
        }
    }

    fn samples(&self) -> &[SampleRef] {
        self.selected
            .and_then(|index| self.reader.tracks().get(index))
            .map(|track| track.samples.as_slice())
            .unwrap_or_default()
    }

    fn current(&self) -> Option<&SampleRef> {
        self.samples().get(self.position)
    }
}

impl<R: Read + Seek + Send> MediaExtractor for Mp4Extractor<R> {
    fn track_count(&self) -> usize {
        self.reader.tracks().len()
    }

    fn track_format(&self, index: usize) -> Result<MediaFormat> {
        self.reader
            .tracks()
            .get(index)
            .map(|track| track.format.clone())
            .ok_or_else(|| CoreError::unsupported(format!("track index {}", index)).into())
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        let count = self.reader.tracks().len();
        if index >= count {
            return Err(CodecError::Configure(format!(
                "cannot select track {} of {}",
                index, count
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
        match self.current() {
            Some(sample) if sample.key_frame => BufferFlags::KEY_FRAME,
            _ => BufferFlags::empty(),
        }
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let track = self
            .selected
            .filter(|_| self.current().is_some())
            .ok_or_else(|| CodecError::Configure("no sample to read".into()))?;
        Ok(self.reader.read_sample(track, self.position, buf)?)
    }

    fn advance(&mut self) -> bool {
        if self.current().is_none() {
            return false;
        }
        self.position += 1;
        self.current().is_some()
    }

    fn seek_to(&mut self, timestamp_us: i64, mode: SeekMode) {
        let samples = self.samples();
        let keys = samples
            .iter()
            .enumerate()
            .filter(|(_, sample)| sample.key_frame)
            .map(|(index, sample)| (index, sample.timestamp_us));
        let target = sync_sample(keys, timestamp_us, mode).unwrap_or(samples.len());
        self.position = target;
    }
}
