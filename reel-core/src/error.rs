//! Error types shared across the reel crates.

use crate::track::Track;
use thiserror::Error;

/// Errors raised by the core media types.
#[derive(Error, Debug)]
pub enum CoreError {
    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The source has no track of the requested kind.
    #[error("No {0} track found in source")]
    TrackNotFound(Track),

    /// A format is missing a key the caller needs.
    #[error("Media format is missing required key: {0}")]
    MissingFormatKey(&'static str),

    /// Pixel data does not match the declared dimensions.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Unsupported feature or format.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl CoreError {
    /// Create an invalid image error.
    pub fn invalid_image(msg: impl Into<String>) -> Self {
        CoreError::InvalidImage(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        CoreError::Unsupported(msg.into())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
