//! Codec access for the reel video pipeline.
//!
//! Platform media services (container extractors, hardware codecs and the GL
//! surfaces decoders render into) are reached through the traits in
//! [`backend`]. Nothing here is a global: callers build a backend and pass it
//! down as an `Arc<dyn MediaBackend>`.
//!
//! - [`backend`]: extractor, codec and surface traits
//! - [`surface`]: the decoder output surface and its attach guard
//! - [`engine`]: per-track decode and encode state machines
//! - [`format_factory`]: encoder output formats
//! - [`mp4`]: an extractor over MP4 files on disk
//! - [`software`]: an in-memory reference backend
//!
//! # Example
//!
//! ```ignore
//! use reel_codec::{MediaBackend, software::SoftwareBackend};
//!
//! let backend: Arc<dyn MediaBackend> = Arc::new(SoftwareBackend::new());
//! let mut extractor = backend.open_extractor(Path::new("clip.mp4"))?;
//! ```

pub mod backend;
pub mod engine;
pub mod error;
pub mod format_factory;
pub mod mp4;
pub mod software;
pub mod surface;

pub use backend::{
    Codec, CodecEvent, CodecInfo, CodecMode, FrameProducer, MediaBackend, MediaExtractor,
    RenderSurface, SeekMode, SurfaceHandle,
};
pub use engine::{
    DecodeEngine, DecodeSink, DecodeWindow, Decoded, EncodeEngine, EncodeSink, EngineHandle,
    EngineState, EngineTimeouts, Flow,
};
pub use error::{CodecError, Result};
pub use mp4::Mp4Extractor;
pub use surface::{AttachedSurface, OutputSurface};
