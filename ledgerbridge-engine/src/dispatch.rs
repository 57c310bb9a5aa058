//! The late-bound object seam.
//!
//! Every engine object is reached through [`Dispatch`]: properties and methods
//! are addressed by name at runtime. The native binding implements it over
//! `IDispatch`; the in-process [`memory`](crate::memory) engine implements it
//! directly.

use ledgerbridge_types::FieldValue;
use std::fmt;
use std::rc::Rc;

use crate::error::{EngineError, EngineResult};

pub type DispatchRef = Rc<dyn Dispatch>;

/// A value crossing the dispatch seam: a scalar or another object.
#[derive(Clone)]
pub enum Variant {
    Value(FieldValue),
    Object(DispatchRef),
}

impl Variant {
    pub const EMPTY: Variant = Variant::Value(FieldValue::Empty);

    #[must_use]
    pub fn into_value(self) -> Option<FieldValue> {
        match self {
            Self::Value(v) => Some(v),
            Self::Object(_) => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&DispatchRef> {
        match self {
            Self::Object(o) => Some(o),
            Self::Value(_) => None,
        }
    }

    /// Engine-style success test for method results: objects are truthy,
    /// scalars follow [`FieldValue::is_truthy`].
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Object(_) => true,
            Self::Value(v) => v.is_truthy(),
        }
    }

    /// Unwraps an object result of `member`.
    pub fn expect_object(self, member: &str) -> EngineResult<DispatchRef> {
        match self {
            Self::Object(o) => Ok(o),
            Self::Value(_) => Err(EngineError::TypeMismatch {
                member: member.to_string(),
                expected: "object",
            }),
        }
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Object(o) => f.debug_tuple("Object").field(&o.type_name()).finish(),
        }
    }
}

impl From<FieldValue> for Variant {
    fn from(value: FieldValue) -> Self {
        Self::Value(value)
    }
}

macro_rules! variant_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Self::Value(FieldValue::from(value))
                }
            }
        )*
    };
}

variant_from_scalar!(bool, i32, i64, f64, &str, String);

impl From<DispatchRef> for Variant {
    fn from(object: DispatchRef) -> Self {
        Self::Object(object)
    }
}

/// A late-bound engine object.
///
/// Methods take `&self`: engine objects are shared handles whose state lives
/// on the engine side.
pub trait Dispatch {
    /// Diagnostic name of the object's type.
    fn type_name(&self) -> String;

    fn get_property(&self, name: &str, args: &[Variant]) -> EngineResult<Variant>;

    fn set_property(&self, name: &str, args: &[Variant], value: Variant) -> EngineResult<()>;

    fn invoke(&self, name: &str, args: &[Variant]) -> EngineResult<Variant>;
}

/// Reads a property that must be an object.
pub fn get_object(
    object: &dyn Dispatch,
    name: &str,
    args: &[Variant],
) -> EngineResult<DispatchRef> {
    object.get_property(name, args)?.expect_object(name)
}

/// Calls a method that must return an object.
pub fn invoke_object(
    object: &dyn Dispatch,
    name: &str,
    args: &[Variant],
) -> EngineResult<DispatchRef> {
    object.invoke(name, args)?.expect_object(name)
}

/// Reads the engine's last-error text from `object`, if it exposes one.
///
/// Accepts either a `LastError` object with a `Text` or `Description`
/// property, or a plain `LastError` string.
#[must_use]
pub fn last_error_text(object: &dyn Dispatch) -> Option<String> {
    let text = match object.get_property("LastError", &[]).ok()? {
        Variant::Value(value) => value,
        Variant::Object(error) => ["Text", "Description"]
            .iter()
            .find_map(|member| error.get_property(member, &[]).ok()?.into_value())?,
    };
    let text = text.to_string();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}
