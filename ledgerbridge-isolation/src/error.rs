//! Error types for the isolation layer.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IsolationError {
    /// The host OS has no side-by-side activation support.
    #[error("isolation is not supported on this platform: {0}")]
    Unsupported(&'static str),

    /// The manifest could not be generated or understood.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// The type library could not be read.
    #[error("type library error: {0}")]
    TypeLib(String),

    /// An OS call failed; `code` is the HRESULT or Win32 error.
    #[error("{operation} failed (0x{code:08X}): {message}")]
    Os {
        operation: &'static str,
        code: i32,
        message: String,
    },

    /// A different staged component already owns the process-wide context.
    #[error("isolation context already active for {active:?}; cannot activate {requested:?}")]
    Conflict { active: PathBuf, requested: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for isolation operations.
pub type IsolationResult<T> = Result<T, IsolationError>;
