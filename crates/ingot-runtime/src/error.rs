//! Runtime error types.

use ingot_core::CoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while assembling or running a process.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The backend rejected a feature or failed to start.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Installing a signal handler failed.
    #[error("Signal handling failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
