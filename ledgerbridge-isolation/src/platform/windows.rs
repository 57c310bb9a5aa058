//! Win32 activation contexts and COM instantiation.

use ledgerbridge_types::ClassId;
use libloading::{Library, Symbol};
use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::ApplicationInstallationAndServicing::{
    ACTCTXW, ActivateActCtx, CreateActCtxW, DeactivateActCtx, ReleaseActCtx,
};
use windows::Win32::System::Com::{
    CLSCTX_ALL, CLSCTX_INPROC_SERVER, CLSIDFromProgID, COINIT_APARTMENTTHREADED,
    CoCreateInstance, CoInitializeEx, IClassFactory, IDispatch, TKIND_COCLASS,
};
use windows::Win32::System::LibraryLoader::SetDllDirectoryW;
use windows::Win32::System::Ole::{LoadTypeLibEx, REGKIND_NONE};
use windows::core::{BSTR, GUID, HRESULT, HSTRING, IUnknown, Interface, PCWSTR};

use crate::context::{ActivationBackend, ActivationCookie, ContextHandle};
use crate::error::{IsolationError, IsolationResult};
use crate::strategy::{InstantiationRequest, InstantiationStrategy, StrategyFailure};
use crate::typelib::{CoClassInfo, TypeLibInfo, TypeLibReader};

type DllGetClassObjectFn =
    unsafe extern "system" fn(*const GUID, *const GUID, *mut *mut c_void) -> HRESULT;

fn os_error(operation: &'static str, e: windows::core::Error) -> IsolationError {
    IsolationError::Os {
        operation,
        code: e.code().0,
        message: e.message(),
    }
}

fn failure(e: windows::core::Error) -> StrategyFailure {
    StrategyFailure::os(e.code().0, e.message())
}

fn wide(path: &Path) -> Vec<u16> {
    path.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
}

fn guid(class_id: ClassId) -> GUID {
    GUID::from_u128(class_id.as_u128())
}

/// Initializes COM for the calling thread as a single-threaded apartment.
/// Already-initialized threads keep their existing model.
pub fn ensure_com() {
    // S_FALSE and RPC_E_CHANGED_MODE both leave COM usable on this thread.
    let hr = unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) };
    if hr.is_err() {
        debug!(code = hr.0, "CoInitializeEx returned an error; continuing");
    }
}

#[derive(Debug, Default)]
pub struct WindowsBackend;

impl ActivationBackend for WindowsBackend {
    fn set_search_path(&mut self, dir: Option<&Path>) -> IsolationResult<()> {
        match dir {
            Some(dir) => {
                let path = HSTRING::from(dir.as_os_str());
                unsafe { SetDllDirectoryW(&path) }
            }
            None => unsafe { SetDllDirectoryW(PCWSTR::null()) },
        }
        .map_err(|e| os_error("SetDllDirectoryW", e))
    }

    fn create_context(&mut self, manifest: &Path) -> IsolationResult<ContextHandle> {
        let source = wide(manifest);
        let actctx = ACTCTXW {
            cbSize: std::mem::size_of::<ACTCTXW>() as u32,
            lpSource: PCWSTR(source.as_ptr()),
            ..Default::default()
        };
        let handle = unsafe { CreateActCtxW(&actctx) }.map_err(|e| os_error("CreateActCtxW", e))?;
        Ok(ContextHandle(handle.0 as usize))
    }

    fn activate(&mut self, context: ContextHandle) -> IsolationResult<ActivationCookie> {
        let mut cookie = 0usize;
        unsafe { ActivateActCtx(Some(HANDLE(context.0 as *mut c_void)), &mut cookie) }
            .map_err(|e| os_error("ActivateActCtx", e))?;
        Ok(ActivationCookie(cookie))
    }

    fn deactivate(&mut self, cookie: ActivationCookie) -> IsolationResult<()> {
        unsafe { DeactivateActCtx(0, cookie.0) }.map_err(|e| os_error("DeactivateActCtx", e))
    }

    fn release(&mut self, context: ContextHandle) {
        unsafe { ReleaseActCtx(HANDLE(context.0 as *mut c_void)) };
    }
}

/// Reads the type library embedded in a binary without registering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsTypeLibReader;

impl TypeLibReader for WindowsTypeLibReader {
    fn read(&self, binary: &Path) -> IsolationResult<TypeLibInfo> {
        ensure_com();
        let path = HSTRING::from(binary.as_os_str());
        unsafe {
            let lib = LoadTypeLibEx(&path, REGKIND_NONE).map_err(|e| os_error("LoadTypeLibEx", e))?;

            let attr = lib.GetLibAttr().map_err(|e| os_error("GetLibAttr", e))?;
            let (lib_id, major, minor) = {
                let a = &*attr;
                (ClassId::from_u128(a.guid.to_u128()), a.wMajorVerNum, a.wMinorVerNum)
            };
            lib.ReleaseTLibAttr(attr);

            let mut coclasses = Vec::new();
            for index in 0..lib.GetTypeInfoCount() {
                if lib.GetTypeInfoType(index).ok() != Some(TKIND_COCLASS) {
                    continue;
                }
                let Ok(info) = lib.GetTypeInfo(index) else {
                    continue;
                };
                let Ok(type_attr) = info.GetTypeAttr() else {
                    continue;
                };
                let class_id = ClassId::from_u128((*type_attr).guid.to_u128());
                info.ReleaseTypeAttr(type_attr);

                let mut name = BSTR::new();
                let mut help_context = 0u32;
                if lib
                    .GetDocumentation(
                        index as i32,
                        Some(&mut name as *mut BSTR),
                        None,
                        &mut help_context,
                        None,
                    )
                    .is_ok()
                {
                    coclasses.push(CoClassInfo {
                        name: name.to_string(),
                        class_id,
                    });
                }
            }

            Ok(TypeLibInfo {
                lib_id,
                major,
                minor,
                coclasses,
            })
        }
    }
}

/// Calls the staged binary's `DllGetClassObject` export directly.
///
/// Loaded libraries stay loaded for the strategy's lifetime, since objects
/// they created may still be alive.
#[derive(Debug, Default)]
pub struct DirectClassFactory {
    libraries: Mutex<Vec<Library>>,
}

impl InstantiationStrategy for DirectClassFactory {
    type Handle = IDispatch;

    fn name(&self) -> &'static str {
        "class-factory"
    }

    fn instantiate(&self, request: &InstantiationRequest) -> Result<IDispatch, StrategyFailure> {
        let binary = request
            .binary
            .as_deref()
            .ok_or_else(|| StrategyFailure::new("no staged binary"))?;
        let class_id = request
            .class_id
            .ok_or_else(|| StrategyFailure::new("no class id"))?;
        ensure_com();

        let library = unsafe { Library::new(binary) }
            .map_err(|e| {
                StrategyFailure::new(format!("failed to load {}: {e}", binary.display()))
            })?;

        let dispatch = unsafe {
            let entry: Symbol<DllGetClassObjectFn> = library
                .get(b"DllGetClassObject\0")
                .map_err(|e| StrategyFailure::new(format!("missing DllGetClassObject: {e}")))?;

            let clsid = guid(class_id);
            let mut raw: *mut c_void = std::ptr::null_mut();
            entry(&clsid, &IClassFactory::IID, &mut raw)
                .ok()
                .map_err(failure)?;
            let factory = IClassFactory::from_raw(raw);
            factory
                .CreateInstance::<Option<&IUnknown>, IDispatch>(None)
                .map_err(failure)?
        };

        self.libraries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(library);
        Ok(dispatch)
    }
}

/// `CoCreateInstance` for an in-process server while the context is active.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextCoCreate;

impl InstantiationStrategy for ContextCoCreate {
    type Handle = IDispatch;

    fn name(&self) -> &'static str {
        "context-create"
    }

    fn instantiate(&self, request: &InstantiationRequest) -> Result<IDispatch, StrategyFailure> {
        if !request.context_active {
            return Err(StrategyFailure::new("no active isolation context"));
        }
        let class_id = request
            .class_id
            .ok_or_else(|| StrategyFailure::new("no class id"))?;
        ensure_com();
        unsafe { CoCreateInstance(&guid(class_id), None, CLSCTX_INPROC_SERVER) }.map_err(failure)
    }
}

/// Standard creation through the system registration.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegisteredLookup;

impl InstantiationStrategy for RegisteredLookup {
    type Handle = IDispatch;

    fn name(&self) -> &'static str {
        "registered-lookup"
    }

    fn instantiate(&self, request: &InstantiationRequest) -> Result<IDispatch, StrategyFailure> {
        ensure_com();
        let clsid = match request.class_id {
            Some(class_id) => guid(class_id),
            None => {
                let prog_id = HSTRING::from(request.prog_id.as_str());
                unsafe { CLSIDFromProgID(&prog_id) }.map_err(failure)?
            }
        };
        unsafe { CoCreateInstance(&clsid, None, CLSCTX_ALL) }.map_err(failure)
    }
}

pub(crate) fn prog_id_registered(prog_id: &str) -> bool {
    ensure_com();
    let prog_id = HSTRING::from(prog_id);
    unsafe { CLSIDFromProgID(&prog_id) }.is_ok()
}
