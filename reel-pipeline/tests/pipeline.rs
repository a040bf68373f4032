//! End-to-end pipeline tests.
//!
//! Every test drives real decode, encode and mux threads through the software
//! backend against an in-memory 60 fps clip of 308 frames.

use parking_lot::Mutex;
use reel_codec::format_factory::VIDEO_MIME;
use reel_codec::software::{frame_index, SoftwareBackend, SyntheticMedia};
use reel_codec::CodecError;
use reel_core::CoreError;
use reel_pipeline::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const CLIP: &str = "clip.mp4";
const FPS: u32 = 60;
const FRAMES: u64 = 308;

// =============================================================================
// Helpers
// =============================================================================

fn clip(audio: bool) -> SyntheticMedia {
    let media = SyntheticMedia::video(16, 12, FPS, FRAMES);
    if audio {
        media.with_audio(44_100, 2)
    } else {
        media
    }
}

fn backend(audio: bool) -> Arc<SoftwareBackend> {
    logging::init_with_default("warn");
    let backend = SoftwareBackend::new();
    backend.insert(CLIP, clip(audio));
    Arc::new(backend)
}

fn video(backend: &Arc<SoftwareBackend>) -> Video {
    Video::new(backend.clone(), CLIP)
}

fn output(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("out.mp4")
}

fn is_mp4(path: &Path) -> bool {
    let bytes = std::fs::read(path).unwrap_or_default();
    bytes.len() > 8 && &bytes[4..8] == b"ftyp"
}

/// Records the frame number and size of every extracted frame.
#[derive(Default)]
struct FrameRecorder {
    frames: Mutex<Vec<(u64, (u32, u32))>>,
    completions: AtomicUsize,
}

impl FrameRecorder {
    fn indices(&self) -> Vec<u64> {
        self.frames.lock().iter().map(|(index, _)| *index).collect()
    }
}

impl ProgressListener<Image> for FrameRecorder {
    fn on_progress(&self, image: Image) {
        self.frames
            .lock()
            .push((frame_index(image.pixel(0, 0)), image.dimensions()));
    }

    fn on_complete(&self) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records export progress values.
#[derive(Default)]
struct ProgressRecorder {
    values: Mutex<Vec<f32>>,
    completions: AtomicUsize,
}

impl ProgressRecorder {
    fn values(&self) -> Vec<f32> {
        self.values.lock().clone()
    }

    fn assert_finished(&self) {
        let values = self.values();
        assert!(values.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", values);
        assert_eq!(values.last(), Some(&1.0));
        assert_eq!(values.iter().filter(|value| **value == 1.0).count(), 1);
        assert_eq!(self.completions.load(Ordering::SeqCst), 1);
    }
}

impl ProgressListener<f32> for ProgressRecorder {
    fn on_progress(&self, value: f32) {
        self.values.lock().push(value);
    }

    fn on_complete(&self) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Metadata
// =============================================================================

#[test]
fn test_metadata_queries() {
    let backend = backend(true);
    let mut video = video(&backend);
    assert_eq!(video.frame_rate().unwrap(), FPS);
    assert_eq!(video.total_frame_count().unwrap(), FRAMES);
    assert_eq!(
        video.duration_us().unwrap(),
        reel_core::timing::frame_to_timestamp(FRAMES, FPS)
    );
    assert_eq!(
        video.total_audio_sample_count().unwrap(),
        reel_core::timing::audio_sample_count(video.duration_us().unwrap(), 44_100)
    );
}

#[test]
fn test_missing_file() {
    let backend = backend(false);
    let mut video = Video::new(backend, "nowhere.mp4");
    assert!(matches!(
        video.total_frame_count(),
        Err(PipelineError::Codec(_)) | Err(PipelineError::Core(CoreError::Io(_)))
    ));
}

// =============================================================================
// Extraction
// =============================================================================

#[test]
fn test_extract_single_frame() {
    let backend = backend(false);
    let listener = Arc::new(FrameRecorder::default());
    let handle = video(&backend)
        .get_frames(FrameWindow::new(1, 1, 0), listener.clone())
        .unwrap();
    handle.wait().unwrap();

    assert_eq!(listener.indices(), vec![0]);
    assert_eq!(listener.frames.lock()[0].1, (16, 12));
    assert_eq!(listener.completions.load(Ordering::SeqCst), 1);
}

#[test]
fn test_extract_window() {
    let backend = backend(false);
    let listener = Arc::new(FrameRecorder::default());
    video(&backend)
        .get_frames(FrameWindow::new(5, 3, 5), listener.clone())
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(listener.indices(), vec![5, 10, 15]);
    assert_eq!(listener.completions.load(Ordering::SeqCst), 1);
}

#[test]
fn test_extract_with_filters() {
    let backend = backend(false);
    let listener = Arc::new(FrameRecorder::default());
    let mut video = Video::with_filters(
        backend.clone(),
        CLIP,
        [
            Arc::new(ScaleFilter::new(8, 4)) as Arc<dyn ImageFilter>,
            Arc::new(FnFilter::new("identity", |image: &Image| Ok(image.clone()))),
        ],
    );
    assert_eq!(video.filters().len(), 2);
    video
        .get_frames(FrameWindow::new(2, 4, 0), listener.clone())
        .unwrap()
        .wait()
        .unwrap();

    let frames = listener.frames.lock().clone();
    assert_eq!(frames.len(), 4);
    assert!(frames.iter().all(|(_, size)| *size == (8, 4)));
}

#[test]
fn test_extract_twice() {
    let backend = backend(false);
    let mut video = video(&backend);
    for _ in 0..2 {
        let listener = Arc::new(FrameRecorder::default());
        video
            .get_frames(FrameWindow::new(1, 2, 0), listener.clone())
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(listener.indices(), vec![0, 1]);
    }
}

#[test]
fn test_extract_out_of_bounds() {
    let backend = backend(false);
    let listener = Arc::new(FrameRecorder::default());
    let result = video(&backend).get_frames(FrameWindow::new(5, 1, 305), listener.clone());
    assert!(matches!(
        result,
        Err(PipelineError::OutOfBounds {
            requested: 310,
            total: 308
        })
    ));
    assert!(listener.frames.lock().is_empty());
}

#[test]
fn test_extract_invalid_window() {
    let backend = backend(false);
    let listener = Arc::new(FrameRecorder::default());
    let result = video(&backend).get_frames(FrameWindow::new(0, 1, 0), listener);
    assert!(matches!(result, Err(PipelineError::InvalidOptions(_))));
}

#[test]
fn test_extract_decoder_failure() {
    let backend = backend(false);
    backend.fail_decoder_after(Track::Video, 3);
    let listener = Arc::new(FrameRecorder::default());
    let result = video(&backend)
        .get_frames(FrameWindow::new(1, 10, 0), listener.clone())
        .unwrap()
        .wait();

    assert!(matches!(
        result,
        Err(PipelineError::Codec(CodecError::Runtime { .. }))
    ));
    assert_eq!(listener.completions.load(Ordering::SeqCst), 0);
}

#[test]
fn test_extract_filter_failure() {
    let backend = backend(false);
    let filter = Arc::new(FnFilter::new("broken", |_: &Image| {
        Err(PipelineError::filter("broken", "model missing"))
    }));
    let listener = Arc::new(FrameRecorder::default());
    let result = Video::with_filter(backend.clone(), CLIP, filter)
        .get_frames(FrameWindow::default(), listener.clone())
        .unwrap()
        .wait();

    assert!(matches!(result, Err(PipelineError::Filter { .. })));
    assert!(listener.frames.lock().is_empty());
}

// =============================================================================
// Export
// =============================================================================

#[test]
fn test_export_frame_count() {
    let backend = backend(false);
    let dir = tempfile::tempdir().unwrap();
    let out = output(&dir);
    let listener = Arc::new(ProgressRecorder::default());

    let options = ExportOptions::default().with_window(FrameWindow::default().with_num_frames(25));
    let handle = video(&backend)
        .export(&out, options, listener.clone())
        .unwrap();
    handle.wait().unwrap();

    assert_eq!(listener.values().len(), 25);
    listener.assert_finished();
    assert!(std::fs::metadata(&out).unwrap().len() > 0);
    assert!(is_mp4(&out));
}

#[test]
fn test_export_interval_and_offset() {
    let backend = backend(false);
    let dir = tempfile::tempdir().unwrap();
    let out = output(&dir);
    let listener = Arc::new(ProgressRecorder::default());

    let window = FrameWindow::default()
        .with_frame_interval(13)
        .with_starting_frame_offset(71);
    video(&backend)
        .export(&out, ExportOptions::default().with_window(window), listener.clone())
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(listener.values().len(), 18);
    listener.assert_finished();
    assert!(is_mp4(&out));
}

#[test]
fn test_export_with_audio() {
    let backend = backend(true);
    let dir = tempfile::tempdir().unwrap();
    let out = output(&dir);
    let listener = Arc::new(ProgressRecorder::default());

    let options = ExportOptions::default()
        .with_window(FrameWindow::default().with_frame_interval(2))
        .with_copy_audio(true);
    video(&backend)
        .export(&out, options, listener.clone())
        .unwrap()
        .wait()
        .unwrap();

    listener.assert_finished();
    assert!(is_mp4(&out));
}

#[test]
fn test_export_scaled_and_filtered() {
    let backend = backend(false);
    let dir = tempfile::tempdir().unwrap();
    let out = output(&dir);
    let listener = Arc::new(ProgressRecorder::default());

    let options = ExportOptions::default()
        .with_window(FrameWindow::new(1, 30, 0))
        .with_frame_rate_scale(2.0)
        .with_bit_rate(250_000)
        .with_key_frame_interval(1);
    Video::with_filter(backend.clone(), CLIP, Arc::new(ScaleFilter::new(10, 6)))
        .export(&out, options, listener.clone())
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(listener.values().len(), 30);
    listener.assert_finished();
}

#[test]
fn test_export_rejects_copy_audio_with_offset() {
    let backend = backend(true);
    let dir = tempfile::tempdir().unwrap();
    let out = output(&dir);

    let options = ExportOptions::default()
        .with_window(FrameWindow::new(1, 10, 5))
        .with_copy_audio(true);
    let result = video(&backend).export(&out, options, Arc::new(ProgressRecorder::default()));
    assert!(matches!(result, Err(PipelineError::InvalidOptions(_))));
    assert!(!out.exists());
}

#[test]
fn test_export_out_of_bounds() {
    let backend = backend(false);
    let dir = tempfile::tempdir().unwrap();
    let out = output(&dir);

    let options = ExportOptions::default().with_window(FrameWindow::new(5, 1, 305));
    let result = video(&backend).export(&out, options, Arc::new(ProgressRecorder::default()));
    assert!(matches!(result, Err(PipelineError::OutOfBounds { .. })));
    assert!(!out.exists());
}

#[test]
fn test_export_missing_audio_track() {
    let backend = backend(false);
    let dir = tempfile::tempdir().unwrap();
    let options = ExportOptions::default().with_copy_audio(true);
    let result = video(&backend).export(
        output(&dir),
        options,
        Arc::new(ProgressRecorder::default()),
    );
    assert!(matches!(
        result,
        Err(PipelineError::Core(CoreError::TrackNotFound(Track::Audio)))
    ));
}

#[test]
fn test_export_without_encoder() {
    let backend = backend(false);
    backend.disable_encoder(VIDEO_MIME);
    let dir = tempfile::tempdir().unwrap();
    let out = output(&dir);
    let listener = Arc::new(ProgressRecorder::default());

    let result = video(&backend)
        .export(
            &out,
            ExportOptions::default().with_window(FrameWindow::new(1, 5, 0)),
            listener.clone(),
        )
        .unwrap()
        .wait();
    assert!(matches!(
        result,
        Err(PipelineError::Codec(CodecError::NoCodec(_)))
    ));
    assert_eq!(listener.completions.load(Ordering::SeqCst), 0);
    assert!(!out.exists());
}

#[test]
fn test_export_encoder_failure() {
    let backend = backend(false);
    backend.fail_encoder_after(Track::Video, 2);
    let dir = tempfile::tempdir().unwrap();
    let out = output(&dir);
    let listener = Arc::new(ProgressRecorder::default());

    let result = video(&backend)
        .export(
            &out,
            ExportOptions::default().with_window(FrameWindow::new(1, 20, 0)),
            listener.clone(),
        )
        .unwrap()
        .wait();
    assert!(matches!(
        result,
        Err(PipelineError::Codec(CodecError::Runtime { .. }))
    ));
    assert_eq!(listener.completions.load(Ordering::SeqCst), 0);
    assert!(!out.exists());
}

#[test]
fn test_exported_file_reads_back() {
    let backend = backend(false);
    let dir = tempfile::tempdir().unwrap();
    let out = output(&dir);

    video(&backend)
        .export(
            &out,
            ExportOptions::default().with_window(FrameWindow::new(1, 5, 0)),
            Arc::new(ProgressRecorder::default()),
        )
        .unwrap()
        .wait()
        .unwrap();

    // Not registered with the backend, so it is read from disk.
    let mut exported = Video::new(backend.clone(), &out);
    assert_eq!(exported.frame_rate().unwrap(), FPS);
    assert_eq!(exported.total_frame_count().unwrap(), 5);

    let listener = Arc::new(FrameRecorder::default());
    exported
        .get_frames(FrameWindow::new(1, 5, 0), listener.clone())
        .unwrap()
        .wait()
        .unwrap();
    let frames = listener.frames.lock().clone();
    assert_eq!(frames.len(), 5);
    assert!(frames.iter().all(|(_, size)| *size == (16, 12)));
    assert_eq!(listener.completions.load(Ordering::SeqCst), 1);
}

#[test]
fn test_handle_reports_finished() {
    let backend = backend(false);
    let listener = Arc::new(FrameRecorder::default());
    let handle = video(&backend)
        .get_frames(FrameWindow::new(1, 1, 0), listener)
        .unwrap();
    assert!(handle.name().starts_with("reel-"));
    while !handle.is_finished() {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    handle.wait().unwrap();
}
