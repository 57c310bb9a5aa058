//! Acquisition error types.

use ledgerbridge_isolation::IsolationError;
use ledgerbridge_types::EngineVersion;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for acquisition operations.
pub type AcquireResult<T> = Result<T, AcquireError>;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("no download URL for engine {version} or any {major}.x version")]
    NoDownloadUrl { version: EngineVersion, major: u16 },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} fetching {url}")]
    Http { status: u16, url: String },

    #[error("download timed out after {0:?}")]
    Timeout(Duration),

    #[error("download cancelled")]
    Cancelled,

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("installer extraction failed: {0}")]
    Installer(String),

    #[error("engine binary not found under {0:?}")]
    BinaryNotFound(PathBuf),

    #[error("no cache directory available")]
    NoCacheDir,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("manifest generation failed: {0}")]
    Isolation(#[from] IsolationError),
}
