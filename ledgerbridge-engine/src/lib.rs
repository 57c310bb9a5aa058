//! Engine sessions for LedgerBridge.
//!
//! Connects to an engine data store and exposes its objects through a
//! uniform record model:
//!
//! - [`EngineSession`] obtains the engine root through an [`EngineProvider`]
//!   and holds one authenticated connection
//! - [`RecordCursor`] walks a result set forward and reads fields by name or
//!   ordinal
//! - [`PostingDocument`] builds a header with lines and commits it once
//!
//! Engine objects are reached through the [`Dispatch`] seam. On Windows the
//! native binding implements it over `IDispatch`; the [`memory`] engine
//! implements it in-process.
//!
//! [`LedgerBridge`] ties the stages together: version detection, component
//! acquisition, isolation and connection.

mod bridge;
#[cfg(windows)]
pub mod com;
mod config;
mod cursor;
mod dispatch;
mod error;
pub mod logging;
pub mod memory;
mod posting;
mod record;
mod session;

pub use bridge::{LedgerBridge, PreparedEngine};
pub use config::{BridgeConfig, EngineSettings};
pub use cursor::{CursorState, RecordCursor};
pub use dispatch::{get_object, invoke_object, last_error_text, Dispatch, DispatchRef, Variant};
pub use error::{EngineError, EngineResult};
pub use posting::{CommitOutcome, CommitResult, LineItem, PostingDocument};
pub use record::{DispatchRecord, FieldRecord};
pub use session::{
    ActivationPath, EngineProvider, EngineSession, IsolatedProvider, RootObject, SessionConfig,
};
