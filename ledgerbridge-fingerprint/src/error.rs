//! Error types for version fingerprinting.
//!
//! These never escape [`crate::VersionFingerprinter::detect`]; they describe
//! why a single method fell through so the diagnostics can say so.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FingerprintError {
    /// The artifact a method reads does not exist in the data directory.
    #[error("artifact not found: {0}")]
    ArtifactMissing(String),

    /// The artifact exists but holds no token of the expected shape.
    #[error("no {kind} token in {artifact}")]
    NoToken { kind: &'static str, artifact: String },

    /// A token was found but no table maps it to a version.
    #[error("unmapped {kind} token: {token}")]
    Unmapped { kind: &'static str, token: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for a single fingerprint method.
pub type FingerprintResult<T> = Result<T, FingerprintError>;
