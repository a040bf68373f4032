//! Frame extraction and filtered re-encoding of video files.
//!
//! A [`Video`] wraps one source file. [`Video::get_frames`] decodes a window of
//! frames, runs each through the filter chain and hands the results to a
//! listener. [`Video::export`] re-encodes the filtered frames (optionally
//! together with the original audio) into a new MP4 file.
//!
//! Both run in the background and return a [`PipelineHandle`] that can be
//! waited on for the final outcome.
//!
//! # Example
//!
//! ```ignore
//! use reel_pipeline::{ExportOptions, Video};
//!
//! let backend = Arc::new(SoftwareBackend::new());
//! let mut video = Video::with_filter(backend, "clip.mp4", Arc::new(MyFilter));
//! let handle = video.export("out.mp4", ExportOptions::default(), listener)?;
//! handle.wait()?;
//! ```

mod config;
mod error;
mod filter;
mod listener;
mod mediator;
mod options;
mod source;
mod supervisor;
mod video;

pub mod logging;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use filter::{CompositionMode, FilterChain, FnFilter, ImageFilter, ScaleFilter};
pub use listener::ProgressListener;
pub use options::{ExportOptions, FrameWindow};
pub use source::{frames_to_process, DataSource};
pub use supervisor::PipelineHandle;
pub use video::Video;

pub use reel_core::{Image, Track};
