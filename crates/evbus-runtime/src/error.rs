//! Runtime error types.

use evbus_core::{AdapterError, BusError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while setting up or running consumers.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An adapter could not be created for a worker.
    #[error("Failed to create adapter for worker {worker}: {source}")]
    AdapterSetup {
        worker: usize,
        #[source]
        source: AdapterError,
    },

    /// A bus component failed outside of a worker loop.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
