//! Pipeline error types.

use reel_codec::CodecError;
use reel_containers::ContainerError;
use reel_core::CoreError;
use thiserror::Error;

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Codec error.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Container error.
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Options could not be parsed.
    #[error("Invalid options file: {0}")]
    Parse(#[from] serde_json::Error),

    /// Option values rejected before any work started.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// The requested window starts past the end of the video.
    #[error("Frame window out of bounds: frame {requested} requested, video has {total} frames")]
    OutOfBounds { requested: u64, total: u64 },

    /// The decoder ran out of frames before the requested count was delivered.
    #[error("Source ended after {delivered} of {expected} frames")]
    Truncated { expected: u64, delivered: u64 },

    /// A filter failed on a frame.
    #[error("Filter {name} failed: {message}")]
    Filter { name: String, message: String },

    /// Filtered frames changed size mid-stream.
    #[error("Filtered frame is {actual:?}, encoder was configured for {expected:?}")]
    FrameSizeChanged {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// A background thread panicked.
    #[error("Pipeline thread panicked")]
    Panicked,

    /// Pipeline aborted.
    #[error("Pipeline aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    /// Create an invalid options error.
    pub fn invalid_options(msg: impl Into<String>) -> Self {
        PipelineError::InvalidOptions(msg.into())
    }

    /// Create a filter error.
    pub fn filter(name: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Filter {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Pipeline result type.
pub type Result<T> = std::result::Result<T, PipelineError>;
