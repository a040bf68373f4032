//! Glue between decoders, the filter chain, encoders and the listener.
//!
//! Mediators are the sinks engines report to. They never tear anything down
//! themselves: the first [`Control`] message they send decides the outcome,
//! and the supervisor then calls [`Mediator::close`] and
//! [`Mediator::release`].

mod export;
mod extraction;
mod progress;

pub(crate) use export::{ExportMediator, ExportSetup};
pub(crate) use extraction::ExtractionMediator;
pub(crate) use progress::ExportProgress;

use crate::error::{PipelineError, Result};
use flume::Sender;
use reel_codec::DecodeSink;
use tracing::debug;

/// Outcome reported to the supervisor.
#[derive(Debug)]
pub(crate) enum Control {
    Completed,
    Failed(PipelineError),
}

/// A sink the supervisor can shut down.
pub(crate) trait Mediator: DecodeSink {
    /// Stop accepting data. Blocked producers give up promptly.
    fn close(&self);

    /// Release every resource the mediator owns. Only a successful run
    /// finalizes its output.
    fn release(&self, success: bool) -> Result<()>;

    /// Tell the listener the run is complete.
    fn notify_complete(&self);
}

pub(crate) fn send_control(control: &Sender<Control>, message: Control) {
    if let Err(err) = control.send(message) {
        debug!("Supervisor already gone, dropping {:?}", err.into_inner());
    }
}
