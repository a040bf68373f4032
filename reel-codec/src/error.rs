//! Error types for codec backends and engines.

use reel_containers::ContainerError;
use reel_core::{CoreError, Track};
use thiserror::Error;

/// Codec and surface errors.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Core type errors (missing format keys, bad images, I/O).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A container file that could not be opened or read.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// No codec on this platform handles the MIME type.
    #[error("No codec available for {0}")]
    NoCodec(String),

    /// The codec rejected its configuration.
    #[error("Failed to configure codec: {0}")]
    Configure(String),

    /// The codec reported an asynchronous failure.
    #[error("{track} codec failed: {message}")]
    Runtime { track: Track, message: String },

    /// A buffer index the codec does not own.
    #[error("Unknown codec buffer index {0}")]
    InvalidBuffer(usize),

    /// The codec was used outside its started state.
    #[error("Codec is not running")]
    NotRunning,

    /// Drawing or read-back attempted without the surface attached.
    #[error("Output surface is not attached to the current thread")]
    SurfaceNotAttached,

    /// Surface setup or rendering failed.
    #[error("Surface error: {0}")]
    Surface(String),

    /// Timed out waiting on the codec or surface.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Spawning an engine thread failed.
    #[error("Failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl CodecError {
    /// Create a runtime codec error.
    pub fn runtime(track: Track, message: impl Into<String>) -> Self {
        CodecError::Runtime {
            track,
            message: message.into(),
        }
    }

    /// Create a surface error.
    pub fn surface(message: impl Into<String>) -> Self {
        CodecError::Surface(message.into())
    }
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
