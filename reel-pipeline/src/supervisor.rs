//! Background thread that owns one pipeline run.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::mediator::{Control, Mediator};
use flume::Receiver;
use reel_codec::{DecodeEngine, EngineHandle};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Starts the decoders of a run, waits for its outcome and tears it down.
///
/// Teardown order is fixed: decoders are stopped first, then the mediator
/// releases its encoders and output, and only then is the listener told the
/// run completed.
pub(crate) struct Supervisor {
    label: &'static str,
    config: PipelineConfig,
    decoders: Vec<DecodeEngine>,
    mediator: Arc<dyn Mediator>,
    control: Receiver<Control>,
}

impl Supervisor {
    /// Supervisor for decoders feeding `mediator`.
    pub fn new(
        label: &'static str,
        config: PipelineConfig,
        decoders: Vec<DecodeEngine>,
        mediator: Arc<dyn Mediator>,
        control: Receiver<Control>,
    ) -> Self {
        Self {
            label,
            config,
            decoders,
            mediator,
            control,
        }
    }

    /// Run on a new thread.
    pub fn spawn(self) -> Result<PipelineHandle> {
        let name = self.config.thread(self.label);
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())?;
        Ok(PipelineHandle {
            name,
            thread: Some(thread),
        })
    }

    fn run(self) -> Result<()> {
        let Self {
            label,
            config,
            decoders,
            mediator,
            control,
        } = self;
        info!(pipeline = label, decoders = decoders.len(), "Pipeline started");

        let mut handles: Vec<EngineHandle> = Vec::with_capacity(decoders.len());
        let mut outcome = None;
        for decoder in decoders {
            let name = config.thread(&format!("decode-{}", decoder.track()));
            match decoder.spawn(name) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    outcome = Some(Control::Failed(err.into()));
                    break;
                }
            }
        }
        let outcome = match outcome {
            Some(outcome) => outcome,
            None => control.recv().unwrap_or_else(|_| {
                Control::Failed(PipelineError::Aborted("control channel closed".into()))
            }),
        };
        let success = matches!(outcome, Control::Completed);
        debug!(pipeline = label, success, "Tearing down");

        mediator.close();
        for handle in handles {
            handle.join();
        }
        let released = mediator.release(success);

        let err = match (outcome, released) {
            (Control::Completed, Ok(())) => {
                info!(pipeline = label, "Pipeline completed");
                mediator.notify_complete();
                return Ok(());
            }
            (Control::Completed, Err(err)) => err,
            (Control::Failed(err), released) => {
                if let Err(release_err) = released {
                    debug!(pipeline = label, "Release after failure also failed: {}", release_err);
                }
                err
            }
        };
        error!(pipeline = label, "Pipeline failed: {}", err);
        Err(err)
    }
}

/// Handle to a running pipeline.
///
/// Dropping it lets the pipeline finish in the background.
#[derive(Debug)]
pub struct PipelineHandle {
    name: String,
    thread: Option<JoinHandle<Result<()>>>,
}

impl PipelineHandle {
    /// Name of the supervising thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the pipeline thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |thread| thread.is_finished())
    }

    /// Block until the pipeline has released everything, returning its outcome.
    pub fn wait(mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| PipelineError::Panicked)?,
            None => Ok(()),
        }
    }
}
