//! Per-track codec engines.
//!
//! Each engine owns one codec and drives it through
//! [`EngineState::AwaitingInput`] → [`EngineState::AwaitingOutput`] →
//! [`EngineState::Done`], passing through [`EngineState::Draining`] while a
//! valid output is handed on. Engines run on their own named thread and talk
//! to the rest of the pipeline through [`DecodeSink`] and [`EncodeSink`].

mod decode;
mod encode;

pub use decode::{DecodeEngine, DecodeWindow};
pub use encode::EncodeEngine;

use crate::error::{CodecError, Result};
use reel_core::{BufferInfo, Image, MediaFormat, Track};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Where an engine is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// The codec is being fed.
    AwaitingInput,
    /// End of stream was queued; only outputs remain.
    AwaitingOutput,
    /// A valid output is being handed on.
    Draining,
    /// The codec delivered end of stream or the consumer asked to stop.
    Done,
}

/// What an engine should do after handing data on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop processing; for encoders the output buffer is kept, not returned.
    Stop,
}

/// Output of a decoder.
#[derive(Debug, Clone)]
pub enum Decoded {
    /// A rendered video frame.
    Image(Image),
    /// Raw audio bytes.
    Pcm(Vec<u8>),
}

/// Consumer of decoder output.
pub trait DecodeSink: Send + Sync {
    /// A valid decoded frame or audio buffer.
    fn transfer(&self, track: Track, data: Decoded, timestamp_us: i64) -> Flow;

    /// The decoder delivered end of stream.
    fn decoder_finished(&self, track: Track);

    fn decoder_failed(&self, track: Track, error: CodecError);
}

/// Consumer of encoder output.
pub trait EncodeSink: Send + Sync {
    fn output_format_changed(&self, track: Track, format: MediaFormat) -> Flow;

    /// An encoded buffer; `encoded` counts media outputs so far, this one included.
    fn submit(&self, track: Track, data: &[u8], info: &BufferInfo, encoded: u64) -> Flow;

    /// The encoder delivered end of stream.
    fn encoder_finished(&self, track: Track);

    fn encoder_failed(&self, track: Track, error: CodecError);
}

/// Timeouts an engine waits with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTimeouts {
    /// Longest wait for one codec event before re-checking for stop.
    pub poll: Duration,
    /// Longest wait for a rendered frame to reach the output surface.
    pub frame: Duration,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(10),
            frame: Duration::from_millis(500),
        }
    }
}

/// Running engine thread.
///
/// Dropping the handle stops the engine and joins its thread.
pub struct EngineHandle {
    name: String,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub(crate) fn spawn<F>(name: String, body: F) -> Result<Self>
    where
        F: FnOnce(&AtomicBool) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(&flag))
            .map_err(CodecError::Spawn)?;
        debug!(engine = %name, "Engine thread started");
        Ok(Self {
            name,
            stop,
            thread: Some(thread),
        })
    }

    /// Name of the engine thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the engine to stop at its next poll.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Whether the engine thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |thread| thread.is_finished())
    }

    /// Stop the engine and wait for its thread to exit.
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop();
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            warn!(engine = %self.name, "Engine thread panicked");
        } else {
            debug!(engine = %self.name, "Engine thread joined");
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}
