//! # Driver Error Types

use tessera_core::SyncError;
use thiserror::Error;

/// Errors reported by the training and demo drivers.
#[derive(Error, Debug)]
pub enum TesseraError {
    /// Failure from the sync core (creation, configuration).
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A worker thread panicked. The session was wound down cleanly.
    #[error("{role} panicked")]
    WorkerPanicked {
        /// Thread role ("training worker 2", "capture", ...).
        role: String,
    },

    /// Invalid driver parameters or command line.
    #[error("config error: {0}")]
    Config(String),
}

/// Result type for driver operations.
pub type TesseraResult<T> = Result<T, TesseraError>;
