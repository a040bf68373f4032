//! Runtime tuning for pipeline threads.

use reel_codec::EngineTimeouts;
use std::time::Duration;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Samples buffered per track between decoder and encoder.
    pub queue_capacity: usize,
    /// Longest wait on a codec before re-checking for shutdown.
    pub poll_timeout: Duration,
    /// Longest wait for a decoded frame to reach the output surface.
    pub frame_timeout: Duration,
    /// Name prefix for pipeline threads.
    pub thread_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            poll_timeout: Duration::from_millis(10),
            frame_timeout: Duration::from_millis(500),
            thread_name: "reel".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Set the per-track sample queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set how long blocked stages wait between checks.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set how long to wait for a rendered frame.
    #[must_use]
    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    /// Set the prefix of pipeline thread names.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub(crate) fn engine_timeouts(&self) -> EngineTimeouts {
        EngineTimeouts {
            poll: self.poll_timeout,
            frame: self.frame_timeout,
        }
    }

    pub(crate) fn thread(&self, role: &str) -> String {
        format!("{}-{}", self.thread_name, role)
    }
}
