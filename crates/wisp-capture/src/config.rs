//! Capture configuration.
//!
//! An explicit context object passed into the tracker; there are no
//! process-wide singletons.

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for completion detection and debug exports
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// The stream is considered finished when no tokens arrive for this long
    pub idle_timeout: Duration,
    /// How often callers should poll the completion predicate
    pub poll_interval: Duration,
    /// How many polls before giving up on an exchange
    pub max_polls: u32,
    /// Where debug exports land
    pub debug_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_secs(2),
            max_polls: 6,
            debug_dir: PathBuf::from("debug"),
        }
    }
}

impl CaptureConfig {
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    pub fn with_debug_dir(mut self, debug_dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = debug_dir.into();
        self
    }

    /// Total time budget for a bounded completion wait
    pub fn wait_budget(&self) -> Duration {
        self.poll_interval * self.max_polls
    }
}
