//! In-memory reference backend.
//!
//! [`SoftwareBackend`] serves [`SyntheticMedia`] registered under a path,
//! falling back to MP4 files on disk, decodes and encodes by copying buffers,
//! and renders into memory surfaces.
//! It runs the same engines as a platform backend, so the whole pipeline can
//! be exercised without codec hardware.

mod codec;
mod extractor;
mod surface;

pub use codec::SoftwareCodec;
pub use extractor::{
    frame_index, synthetic_frame, EncodedSample, SoftwareExtractor, SyntheticMedia,
    SyntheticTrack,
};
pub use surface::SoftwareSurface;

use crate::backend::{
    Codec, CodecInfo, CodecMode, MediaBackend, MediaExtractor, RenderSurface,
};
use crate::error::{CodecError, Result};
use crate::mp4::Mp4Extractor;
use parking_lot::{Mutex, RwLock};
use reel_core::{MediaFormat, Track, TrackMap};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// MIME types the software encoders produce.
const ENCODER_MIMES: [&str; 2] = ["video/avc", "audio/mp4a-latm"];

#[derive(Default)]
struct Faults {
    decoders: TrackMap<u64>,
    encoders: TrackMap<u64>,
    disabled_encoders: HashSet<String>,
}

/// Backend over a library of in-memory clips.
#[derive(Default)]
pub struct SoftwareBackend {
    library: RwLock<HashMap<PathBuf, Arc<SyntheticMedia>>>,
    faults: Mutex<Faults>,
}

impl SoftwareBackend {
    /// Backend with an empty library and no injected faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `media` openable at `path`.
    pub fn insert(&self, path: impl Into<PathBuf>, media: SyntheticMedia) {
        self.library.write().insert(path.into(), Arc::new(media));
    }

    /// Make `track` decoders fail after `inputs` buffers.
    pub fn fail_decoder_after(&self, track: Track, inputs: u64) {
        self.faults.lock().decoders.insert(track, inputs);
    }

    /// Make `track` encoders fail after `inputs` buffers.
    pub fn fail_encoder_after(&self, track: Track, inputs: u64) {
        self.faults.lock().encoders.insert(track, inputs);
    }

    /// Pretend no encoder exists for `mime`.
    pub fn disable_encoder(&self, mime: &str) {
        self.faults.lock().disabled_encoders.insert(mime.to_string());
    }

    fn codec(&self, track: Track, mode: CodecMode) -> SoftwareCodec {
        let faults = self.faults.lock();
        let limit = match mode {
            CodecMode::Decode => faults.decoders.get(track),
            CodecMode::Encode => faults.encoders.get(track),
        };
        let codec = SoftwareCodec::new(track, mode);
        match limit {
            Some(&inputs) => codec.failing_after(inputs),
            None => codec,
        }
    }
}

impl MediaBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn open_extractor(&self, path: &Path) -> Result<Box<dyn MediaExtractor>> {
        if let Some(media) = self.library.read().get(path).cloned() {
            debug!(path = %path.display(), tracks = media.tracks().len(), "Opened software extractor");
            return Ok(Box::new(SoftwareExtractor::new(media)));
        }
        let extractor = Mp4Extractor::open(path)?;
        debug!(path = %path.display(), tracks = extractor.track_count(), "Opened MP4 extractor");
        Ok(Box::new(extractor))
    }

    fn create_decoder(&self, format: &MediaFormat) -> Result<Box<dyn Codec>> {
        let track = format
            .track()
            .ok_or_else(|| CodecError::NoCodec(format.mime.clone()))?;
        Ok(Box::new(self.codec(track, CodecMode::Decode)))
    }

    fn find_encoder(&self, mime: &str) -> Option<CodecInfo> {
        if self.faults.lock().disabled_encoders.contains(mime) || !ENCODER_MIMES.contains(&mime)
        {
            return None;
        }
        Some(CodecInfo {
            name: format!("reel.software.{}", mime.replace('/', ".")),
            mime: mime.to_string(),
            mode: CodecMode::Encode,
            hardware: false,
        })
    }

    fn create_encoder(&self, info: &CodecInfo) -> Result<Box<dyn Codec>> {
        let track = Track::from_mime(&info.mime)
            .ok_or_else(|| CodecError::NoCodec(info.mime.clone()))?;
        Ok(Box::new(self.codec(track, CodecMode::Encode)))
    }

    fn create_surface(&self, width: u32, height: u32) -> Result<Box<dyn RenderSurface>> {
        if width == 0 || height == 0 {
            return Err(CodecError::surface(format!(
                "cannot create {}x{} surface",
                width, height
            )));
        }
        Ok(Box::new(SoftwareSurface::new(width, height)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_unknown_path() {
        let backend = SoftwareBackend::new();
        let err = backend
            .open_extractor(Path::new("/missing.mp4"))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            CodecError::Container(reel_containers::ContainerError::Io(_))
        ));
    }

    #[test]
    fn test_open_file_on_disk() {
        use reel_containers::{ContainerWriter, Mp4Writer};
        use reel_core::{BufferFlags, BufferInfo};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let mut writer = Mp4Writer::create(&path).unwrap();
        let video = writer
            .add_track(&MediaFormat::video("video/avc", 2, 2).with_frame_rate(30))
            .unwrap();
        writer.start().unwrap();
        writer
            .write_sample(video, &[0; 6], &BufferInfo::new(6, 0, BufferFlags::KEY_FRAME))
            .unwrap();
        writer.finish().unwrap();
        drop(writer);

        let extractor = SoftwareBackend::new().open_extractor(&path).unwrap();
        assert_eq!(extractor.track_count(), 1);
        assert_eq!(extractor.track_format(0).unwrap().width, Some(2));
    }

    #[test]
    fn test_open_registered_media() {
        let backend = SoftwareBackend::new();
        backend.insert("/clip.mp4", SyntheticMedia::video(2, 2, 30, 10).with_audio(8_000, 1));
        let extractor = backend.open_extractor(Path::new("/clip.mp4")).unwrap();
        assert_eq!(extractor.track_count(), 2);
        assert_eq!(extractor.track_format(1).unwrap().mime, "audio/mp4a-latm");
    }

    #[test]
    fn test_encoder_lookup() {
        let backend = SoftwareBackend::new();
        assert!(backend.find_encoder("video/avc").is_some());
        assert!(backend.find_encoder("video/hevc").is_none());

        backend.disable_encoder("video/avc");
        assert!(backend.find_encoder("video/avc").is_none());
    }
}
