//! Side-by-side isolation for a staged engine binary.
//!
//! Lets the engine be created from a private directory without registering it
//! system-wide:
//!
//! - [`manifest`] writes the assembly manifest that declares the engine class
//! - [`IsolationActivator`] owns the process-wide activation context
//! - [`InstantiationChain`] tries each creation strategy in order and keeps
//!   an attempt log for diagnostics

mod context;
mod error;
pub mod manifest;
pub mod platform;
mod strategy;
mod typelib;

pub use context::{
    lock_activator, ActivationBackend, ActivationCookie, ActivationLease, ContextHandle,
    IsolationActivator, SharedActivator,
};
pub use error::{IsolationError, IsolationResult};
pub use manifest::{ManifestSpec, TypeLibRef};
pub use strategy::{
    Attempt, InstantiationChain, InstantiationOutcome, InstantiationRequest,
    InstantiationStrategy, StrategyFailure,
};
pub use typelib::{CoClassInfo, NoTypeLib, TypeLibInfo, TypeLibReader};
