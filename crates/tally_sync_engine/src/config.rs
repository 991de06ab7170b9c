//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync runs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// An automatic run within this window after the last pull only pushes.
    pub auto_push_window: Duration,
    /// Number of most recent time entries the purge never touches.
    pub purge_keep: usize,
    /// Maximum number of time entries purged per run.
    pub purge_batch: usize,
}

impl SyncConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            auto_push_window: Duration::from_secs(5 * 60),
            purge_keep: 1000,
            purge_batch: 200,
        }
    }

    /// Sets the automatic push-only window.
    pub fn with_auto_push_window(mut self, window: Duration) -> Self {
        self.auto_push_window = window;
        self
    }

    /// Sets how many recent time entries survive the purge.
    pub fn with_purge_keep(mut self, keep: usize) -> Self {
        self.purge_keep = keep;
        self
    }

    /// Sets the per-run purge limit.
    pub fn with_purge_batch(mut self, batch: usize) -> Self {
        self.purge_batch = batch;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
