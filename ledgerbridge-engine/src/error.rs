//! Engine error types.
//!
//! Display strings keep the five user-facing failure classes apart:
//! engine not present, wrong version staged, isolation failed, session busy
//! and commit rejected.

use ledgerbridge_acquire::AcquireError;
use ledgerbridge_isolation::IsolationError;
use ledgerbridge_types::EngineVersion;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine not present: {0}")]
    EngineNotPresent(String),

    #[error("engine version unknown for data at {0:?}")]
    VersionUnknown(PathBuf),

    #[error("wrong version staged: data needs {expected}, staged engine is {staged}")]
    WrongVersion {
        expected: EngineVersion,
        staged: EngineVersion,
    },

    #[error("isolation failed: {0}")]
    IsolationFailed(String),

    #[error("session busy: {diagnostic}{}", local_summary(.local_processes))]
    Busy {
        diagnostic: String,
        /// Engine host processes running on this machine, as `name (pid)`.
        local_processes: Vec<String>,
    },

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("commit rejected: {0}")]
    CommitRejected(String),

    #[error("engine call {member} failed (0x{code:08X}): {message}")]
    Dispatch {
        member: String,
        code: i32,
        message: String,
    },

    #[error("engine object has no member {0}")]
    MemberNotFound(String),

    #[error("unexpected value from {member}: expected {expected}")]
    TypeMismatch {
        member: String,
        expected: &'static str,
    },

    #[error("session disposed")]
    Disposed,

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error("isolation failed: {0}")]
    Isolation(#[from] IsolationError),
}

fn local_summary(processes: &[String]) -> String {
    if processes.is_empty() {
        " (no local engine processes; held by another machine)".to_string()
    } else {
        format!(" (local engine processes: {})", processes.join(", "))
    }
}

impl EngineError {
    /// True for failures caused by another holder of the connection.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}
