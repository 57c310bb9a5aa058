//! Native backends. Windows gets the real OS calls; every other host gets a
//! backend that reports [`IsolationError::Unsupported`](crate::IsolationError).

#[cfg(windows)]
pub mod windows;

#[cfg(not(windows))]
mod unsupported;

use crate::context::ActivationBackend;
use crate::typelib::TypeLibReader;

#[cfg(windows)]
pub fn native_backend() -> Box<dyn ActivationBackend> {
    Box::new(windows::WindowsBackend::default())
}

#[cfg(not(windows))]
pub fn native_backend() -> Box<dyn ActivationBackend> {
    Box::new(unsupported::UnsupportedBackend)
}

#[cfg(windows)]
pub fn native_typelib_reader() -> Box<dyn TypeLibReader + Send + Sync> {
    Box::new(windows::WindowsTypeLibReader)
}

#[cfg(not(windows))]
pub fn native_typelib_reader() -> Box<dyn TypeLibReader + Send + Sync> {
    Box::new(crate::typelib::NoTypeLib)
}

/// True if the system registry resolves `prog_id` to a class.
#[cfg(windows)]
#[must_use]
pub fn prog_id_registered(prog_id: &str) -> bool {
    windows::prog_id_registered(prog_id)
}

#[cfg(not(windows))]
#[must_use]
pub fn prog_id_registered(_prog_id: &str) -> bool {
    false
}
