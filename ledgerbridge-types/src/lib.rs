//! Core type definitions for LedgerBridge.
//!
//! This crate defines the small, engine-agnostic vocabulary shared by every
//! stage of the bridge:
//! - Engine versions (`major.minor`)
//! - Class and connection identifiers
//! - Scalar field values exchanged with engine records
//!
//! Anything that touches the native engine, the filesystem or the network
//! lives in the downstream crates, not here.

mod ids;
mod value;
mod version;

pub use ids::{ClassId, ConnectionToken, EngineIdentity, ThreadingModel};
pub use value::FieldValue;
pub use version::EngineVersion;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid class identifier: {0}")]
    InvalidClassId(#[from] uuid::Error),

    #[error("invalid engine version: {0}")]
    InvalidVersion(String),

    #[error("invalid threading model: {0}")]
    InvalidThreadingModel(String),
}
