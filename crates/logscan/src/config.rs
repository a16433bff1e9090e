//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which file-change notification backend to use for follow mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackend {
    /// OS notifications (inotify, kqueue, ...) with polling fallback.
    #[default]
    Notify,
    /// Periodic size polling only.
    Poll,
}

/// Tunables shared by every query an engine serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes read per disk access when scanning.
    pub chunk_size: usize,
    /// Records per backward batch.
    pub batch_size: usize,
    /// Upper bound on how long a live stream sleeps between file checks (ms).
    pub poll_interval_ms: u64,
    /// Capacity of the output channel used by spawned queries.
    pub channel_capacity: usize,
    /// Consecutive polling failures tolerated before a live stream gives up.
    pub max_poll_failures: u32,
    /// Notification backend for follow mode.
    pub watch_backend: WatchBackend,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024, // 64 KiB
            batch_size: 100,
            poll_interval_ms: 250,
            channel_capacity: 1024,
            max_poll_failures: 5,
            watch_backend: WatchBackend::Notify,
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file; missing keys take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the scan chunk size.
    #[must_use]
    pub const fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the backward batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the live-mode poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets the spawned-query channel capacity.
    #[must_use]
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Sets how many consecutive polling failures are tolerated.
    #[must_use]
    pub const fn with_max_poll_failures(mut self, attempts: u32) -> Self {
        self.max_poll_failures = attempts;
        self
    }

    /// Sets the watch backend.
    #[must_use]
    pub const fn with_watch_backend(mut self, backend: WatchBackend) -> Self {
        self.watch_backend = backend;
        self
    }

    /// The poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel_capacity must be positive".to_string()));
        }
        Ok(())
    }
}
