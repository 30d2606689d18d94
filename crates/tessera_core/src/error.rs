//! # Sync Core Error Types
//!
//! Errors the synchronization core can report.
//!
//! The default entry points never produce these: an out-of-range layer index
//! is a silent no-op. Errors only come from the checked variants, from
//! creation (the failure sentinel when storage cannot be reserved) and from
//! configuration loading.

use thiserror::Error;

/// Errors that can occur in the synchronization core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Layer index is past the end of the layer arena.
    #[error("layer index {index} out of range (context has {num_layers} layers)")]
    LayerOutOfRange {
        /// The requested index.
        index: usize,
        /// Number of layers in the context.
        num_layers: usize,
    },

    /// Layer index is negative or does not fit a `usize`.
    #[error("layer index {index} is not a valid layer position")]
    InvalidLayerIndex {
        /// The raw index as given.
        index: String,
    },

    /// Storage for a context could not be reserved.
    #[error("allocation failed for {what}: requested {requested} slots")]
    Allocation {
        /// What was being allocated.
        what: &'static str,
        /// Number of slots requested.
        requested: usize,
    },

    /// A barrier needs at least one party.
    #[error("barrier requires at least one party")]
    InvalidParties,

    /// Invalid configuration value or unparsable configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read.
    #[error("config io error: {0}")]
    Io(String),
}

/// Result type for sync core operations.
pub type SyncResult<T> = Result<T, SyncError>;
