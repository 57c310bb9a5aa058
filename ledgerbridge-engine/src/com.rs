//! [`Dispatch`] over native `IDispatch` objects.

use ledgerbridge_isolation::platform::windows::{
    ContextCoCreate, DirectClassFactory, RegisteredLookup,
};
use ledgerbridge_isolation::{
    InstantiationChain, InstantiationRequest, InstantiationStrategy, StrategyFailure,
};
use ledgerbridge_types::FieldValue;
use std::cell::RefCell;
use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::rc::Rc;
use tracing::debug;
use windows::Win32::Foundation::{DISP_E_EXCEPTION, VARIANT_FALSE, VARIANT_TRUE};
use windows::Win32::System::Com::{
    IDispatch, DISPATCH_FLAGS, DISPATCH_METHOD, DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT,
    DISPPARAMS, EXCEPINFO,
};
use windows::Win32::System::Ole::DISPID_PROPERTYPUT;
use windows::Win32::System::Variant::{
    VariantChangeType, VariantClear, VAR_CHANGE_FLAGS, VARIANT, VT_BOOL, VT_BSTR, VT_DISPATCH,
    VT_EMPTY, VT_I1, VT_I2, VT_I4, VT_I8, VT_INT, VT_NULL, VT_R4, VT_R8, VT_UI1, VT_UI2, VT_UI4,
};
use windows::core::{BSTR, GUID, PCWSTR};

use crate::dispatch::{Dispatch, DispatchRef, Variant};
use crate::error::{EngineError, EngineResult};

const LOCALE_USER_DEFAULT: u32 = 0x0400;
const MEMBERID_NIL: i32 = -1;

/// A native engine object.
///
/// Member ids are resolved once per name and cached.
pub struct ComObject {
    dispatch: IDispatch,
    dispids: RefCell<HashMap<String, i32>>,
}

impl ComObject {
    #[must_use]
    pub fn new(dispatch: IDispatch) -> Self {
        Self {
            dispatch,
            dispids: RefCell::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn into_ref(dispatch: IDispatch) -> DispatchRef {
        Rc::new(Self::new(dispatch))
    }

    fn dispid(&self, name: &str) -> EngineResult<i32> {
        if let Some(id) = self.dispids.borrow().get(name) {
            return Ok(*id);
        }

        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
        let names = [PCWSTR(wide.as_ptr())];
        let mut id = 0i32;
        unsafe {
            self.dispatch
                .GetIDsOfNames(&GUID::zeroed(), names.as_ptr(), 1, LOCALE_USER_DEFAULT, &mut id)
        }
        .map_err(|_| EngineError::MemberNotFound(name.to_string()))?;

        self.dispids.borrow_mut().insert(name.to_string(), id);
        Ok(id)
    }

    fn call(
        &self,
        name: &str,
        flags: DISPATCH_FLAGS,
        args: &[Variant],
        put: Option<&Variant>,
    ) -> EngineResult<Variant> {
        let dispid = self.dispid(name)?;

        // Arguments travel in reverse order; a put value is argument zero.
        let mut raw = Vec::with_capacity(args.len() + 1);
        let converted = put
            .into_iter()
            .chain(args.iter().rev())
            .try_for_each(|arg| to_variant(name, arg).map(|v| raw.push(v)));
        if let Err(e) = converted {
            clear_all(&mut raw);
            return Err(e);
        }

        let mut named = [DISPID_PROPERTYPUT];
        let params = DISPPARAMS {
            rgvarg: raw.as_mut_ptr(),
            rgdispidNamedArgs: if put.is_some() {
                named.as_mut_ptr()
            } else {
                std::ptr::null_mut()
            },
            cArgs: raw.len() as u32,
            cNamedArgs: u32::from(put.is_some()),
        };

        let mut result = VARIANT::default();
        let mut exception = EXCEPINFO::default();
        let mut arg_error = 0u32;
        let outcome = unsafe {
            self.dispatch.Invoke(
                dispid,
                &GUID::zeroed(),
                LOCALE_USER_DEFAULT,
                flags,
                &params,
                Some(&mut result as *mut VARIANT),
                Some(&mut exception as *mut EXCEPINFO),
                Some(&mut arg_error as *mut u32),
            )
        };
        clear_all(&mut raw);

        match outcome {
            Ok(()) => {
                let value = from_variant(name, &result);
                unsafe {
                    let _ = VariantClear(&mut result);
                }
                value
            }
            Err(e) => Err(invoke_error(name, &e, &mut exception)),
        }
    }
}

impl Dispatch for ComObject {
    fn type_name(&self) -> String {
        unsafe {
            let Ok(info) = self.dispatch.GetTypeInfo(0, LOCALE_USER_DEFAULT) else {
                return "IDispatch".to_string();
            };
            let mut name = BSTR::new();
            let mut help_context = 0u32;
            match info.GetDocumentation(
                MEMBERID_NIL,
                Some(&mut name as *mut BSTR),
                None,
                &mut help_context,
                None,
            ) {
                Ok(()) => name.to_string(),
                Err(_) => "IDispatch".to_string(),
            }
        }
    }

    fn get_property(&self, name: &str, args: &[Variant]) -> EngineResult<Variant> {
        self.call(name, DISPATCH_PROPERTYGET | DISPATCH_METHOD, args, None)
    }

    fn set_property(&self, name: &str, args: &[Variant], value: Variant) -> EngineResult<()> {
        self.call(name, DISPATCH_PROPERTYPUT, args, Some(&value)).map(|_| ())
    }

    fn invoke(&self, name: &str, args: &[Variant]) -> EngineResult<Variant> {
        self.call(name, DISPATCH_METHOD | DISPATCH_PROPERTYGET, args, None)
    }
}

fn clear_all(raw: &mut [VARIANT]) {
    for value in raw {
        unsafe {
            let _ = VariantClear(value);
        }
    }
}

fn to_variant(member: &str, value: &Variant) -> EngineResult<VARIANT> {
    let Variant::Value(value) = value else {
        return Err(EngineError::TypeMismatch {
            member: member.to_string(),
            expected: "scalar argument",
        });
    };

    let mut raw = VARIANT::default();
    unsafe {
        let inner = &mut *raw.Anonymous.Anonymous;
        match value {
            FieldValue::Empty => inner.vt = VT_EMPTY,
            FieldValue::Bool(b) => {
                inner.vt = VT_BOOL;
                inner.Anonymous.boolVal = if *b { VARIANT_TRUE } else { VARIANT_FALSE };
            }
            FieldValue::Int(i) => match i32::try_from(*i) {
                Ok(small) => {
                    inner.vt = VT_I4;
                    inner.Anonymous.lVal = small;
                }
                Err(_) => {
                    inner.vt = VT_I8;
                    inner.Anonymous.llVal = *i;
                }
            },
            FieldValue::Float(f) => {
                inner.vt = VT_R8;
                inner.Anonymous.dblVal = *f;
            }
            FieldValue::Text(s) => {
                inner.vt = VT_BSTR;
                inner.Anonymous.bstrVal = ManuallyDrop::new(BSTR::from(s.as_str()));
            }
        }
    }
    Ok(raw)
}

fn from_variant(member: &str, raw: &VARIANT) -> EngineResult<Variant> {
    unsafe {
        let inner = &*raw.Anonymous.Anonymous;
        let value = match inner.vt {
            VT_EMPTY | VT_NULL => FieldValue::Empty,
            VT_BOOL => FieldValue::Bool(inner.Anonymous.boolVal.0 != 0),
            VT_I1 => FieldValue::Int(i64::from(inner.Anonymous.cVal)),
            VT_UI1 => FieldValue::Int(i64::from(inner.Anonymous.bVal)),
            VT_I2 => FieldValue::Int(i64::from(inner.Anonymous.iVal)),
            VT_UI2 => FieldValue::Int(i64::from(inner.Anonymous.uiVal)),
            VT_I4 | VT_INT => FieldValue::Int(i64::from(inner.Anonymous.lVal)),
            VT_UI4 => FieldValue::Int(i64::from(inner.Anonymous.ulVal)),
            VT_I8 => FieldValue::Int(inner.Anonymous.llVal),
            VT_R4 => FieldValue::Float(f64::from(inner.Anonymous.fltVal)),
            VT_R8 => FieldValue::Float(inner.Anonymous.dblVal),
            VT_BSTR => FieldValue::Text(inner.Anonymous.bstrVal.to_string()),
            VT_DISPATCH => {
                return Ok(match &*inner.Anonymous.pdispVal {
                    Some(object) => Variant::Object(ComObject::into_ref(object.clone())),
                    None => Variant::EMPTY,
                });
            }
            other => {
                // Dates, currency and decimals come back as their text form.
                let mut text = VARIANT::default();
                VariantChangeType(&mut text, raw, VAR_CHANGE_FLAGS(0), VT_BSTR).map_err(|e| {
                    debug!(member, vt = other.0, "Unconvertible variant");
                    EngineError::Dispatch {
                        member: member.to_string(),
                        code: e.code().0,
                        message: format!("unsupported variant type {}", other.0),
                    }
                })?;
                let converted = (*text.Anonymous.Anonymous).Anonymous.bstrVal.to_string();
                let _ = VariantClear(&mut text);
                FieldValue::Text(converted)
            }
        };
        Ok(Variant::Value(value))
    }
}

fn invoke_error(
    member: &str,
    error: &windows::core::Error,
    exception: &mut EXCEPINFO,
) -> EngineError {
    let description = exception.bstrDescription.to_string();
    let code = if error.code() == DISP_E_EXCEPTION && exception.scode != 0 {
        exception.scode
    } else {
        error.code().0
    };
    unsafe {
        ManuallyDrop::drop(&mut exception.bstrSource);
        ManuallyDrop::drop(&mut exception.bstrDescription);
        ManuallyDrop::drop(&mut exception.bstrHelpFile);
    }

    EngineError::Dispatch {
        member: member.to_string(),
        code,
        message: if description.trim().is_empty() {
            error.message()
        } else {
            description.trim().to_string()
        },
    }
}

/// Wraps a native strategy so it yields [`DispatchRef`] handles.
pub struct ComStrategy<S>(pub S);

impl<S> InstantiationStrategy for ComStrategy<S>
where
    S: InstantiationStrategy<Handle = IDispatch>,
{
    type Handle = DispatchRef;

    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn instantiate(&self, request: &InstantiationRequest) -> Result<DispatchRef, StrategyFailure> {
        self.0.instantiate(request).map(ComObject::into_ref)
    }
}

/// Creation through the system registration only.
#[must_use]
pub fn registered_chain() -> InstantiationChain<DispatchRef> {
    InstantiationChain::new().with(ComStrategy(RegisteredLookup))
}

/// Class factory, then context creation, then registry.
#[must_use]
pub fn isolated_chain() -> InstantiationChain<DispatchRef> {
    InstantiationChain::new()
        .with(ComStrategy(DirectClassFactory::default()))
        .with(ComStrategy(ContextCoCreate))
        .with(ComStrategy(RegisteredLookup))
}
