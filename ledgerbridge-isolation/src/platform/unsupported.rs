use std::path::Path;

use crate::context::{ActivationBackend, ActivationCookie, ContextHandle};
use crate::error::{IsolationError, IsolationResult};

pub(crate) struct UnsupportedBackend;

impl ActivationBackend for UnsupportedBackend {
    fn set_search_path(&mut self, dir: Option<&Path>) -> IsolationResult<()> {
        match dir {
            Some(_) => Err(IsolationError::Unsupported("library search path")),
            None => Ok(()),
        }
    }

    fn create_context(&mut self, _manifest: &Path) -> IsolationResult<ContextHandle> {
        Err(IsolationError::Unsupported("activation contexts"))
    }

    fn activate(&mut self, _context: ContextHandle) -> IsolationResult<ActivationCookie> {
        Err(IsolationError::Unsupported("activation contexts"))
    }

    fn deactivate(&mut self, _cookie: ActivationCookie) -> IsolationResult<()> {
        Ok(())
    }

    fn release(&mut self, _context: ContextHandle) {}
}
