//! # Sync Configuration
//!
//! Session-wide sizing for the synchronization core, loaded once at startup.
//!
//! ```toml
//! num_layers = 16
//! worker_threads = 4
//!
//! [demo]
//! ring_len = 3
//! wait_timeout_ms = 50
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Default number of layers in a training session.
pub const DEFAULT_NUM_LAYERS: usize = 16;

/// Default number of training workers (and barrier parties).
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default number of frame slots in the demo ring (triple buffering).
pub const DEFAULT_RING_LEN: usize = 3;

/// Configuration for one training + demo session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Number of per-layer locks in the layer sync context.
    pub num_layers: usize,
    /// Number of training workers. Also the barrier party count.
    pub worker_threads: usize,
    /// Demo pipeline settings.
    pub demo: DemoConfig,
}

/// Demo pipeline settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Number of frame slots the capture role cycles through.
    pub ring_len: usize,
    /// Upper bound on a single condvar wait. `None` waits until signalled.
    pub wait_timeout_ms: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            num_layers: DEFAULT_NUM_LAYERS,
            worker_threads: DEFAULT_WORKER_THREADS,
            demo: DemoConfig::default(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            ring_len: DEFAULT_RING_LEN,
            wait_timeout_ms: None,
        }
    }
}

impl DemoConfig {
    /// Returns the configured wait bound as a `Duration`.
    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

impl SyncConfig {
    /// Parses a configuration from TOML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if the text does not parse or a
    /// value is out of range.
    pub fn from_toml_str(text: &str) -> SyncResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the file cannot be read, otherwise the
    /// errors of [`SyncConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Io(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            num_layers = config.num_layers,
            worker_threads = config.worker_threads,
            "loaded sync config"
        );
        Ok(config)
    }

    /// Checks every value is usable.
    ///
    /// Zero layers is allowed (an empty context is valid, every call on it is
    /// a no-op). Zero workers or an empty frame ring is not.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> SyncResult<()> {
        if self.worker_threads == 0 {
            return Err(SyncError::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.demo.ring_len == 0 {
            return Err(SyncError::InvalidConfig(
                "demo.ring_len must be at least 1".to_string(),
            ));
        }
        if self.demo.wait_timeout_ms == Some(0) {
            return Err(SyncError::InvalidConfig(
                "demo.wait_timeout_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}
