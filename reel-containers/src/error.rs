//! Container writing errors.

use reel_core::{CoreError, Track};
use thiserror::Error;

/// Container reading and writing errors.
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Samples were written before the container header.
    #[error("Container writing has not started")]
    NotStarted,

    /// Tracks were registered after writing began.
    #[error("Container writing has already started")]
    AlreadyStarted,

    /// A track the multiplexer was never told about.
    #[error("Track {0} is not registered")]
    UnknownTrack(Track),

    /// A writer track index that does not exist.
    #[error("Invalid track index {0}")]
    InvalidTrackIndex(usize),

    /// A registered track never received a sample.
    #[error("Not enough data to finalize: no samples written for {0} track")]
    InsufficientData(Track),

    /// The output was deleted after a failed run.
    #[error("Container output was discarded")]
    Discarded,

    /// An input file whose boxes do not parse.
    #[error("Malformed MP4: {0}")]
    Malformed(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;
