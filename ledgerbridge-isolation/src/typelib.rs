//! Reading class identifiers from a binary's embedded type library.

use ledgerbridge_types::ClassId;
use std::path::Path;

use crate::error::{IsolationError, IsolationResult};

/// A coclass declared by a type library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoClassInfo {
    pub name: String,
    pub class_id: ClassId,
}

/// The parts of a type library a manifest needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeLibInfo {
    pub lib_id: ClassId,
    pub major: u16,
    pub minor: u16,
    pub coclasses: Vec<CoClassInfo>,
}

impl TypeLibInfo {
    /// Looks up a coclass by name, ignoring case.
    #[must_use]
    pub fn coclass(&self, name: &str) -> Option<&CoClassInfo> {
        self.coclasses
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

pub trait TypeLibReader {
    fn read(&self, binary: &Path) -> IsolationResult<TypeLibInfo>;
}

/// Reader for hosts that cannot load type libraries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTypeLib;

impl TypeLibReader for NoTypeLib {
    fn read(&self, _binary: &Path) -> IsolationResult<TypeLibInfo> {
        Err(IsolationError::Unsupported("type library loading"))
    }
}

/// A fixed answer, for callers that already know the type library.
impl TypeLibReader for TypeLibInfo {
    fn read(&self, _binary: &Path) -> IsolationResult<TypeLibInfo> {
        Ok(self.clone())
    }
}
