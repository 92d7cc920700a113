//! Runtime plugin abstraction and the shared-library implementation
//!
//! A runtime plugin is a shared library named `xllr.<name>.<ext>` under the
//! engine home that exports the plugin C ABI:
//!
//! ```c
//! void load_runtime(char** err);
//! void free_runtime(char** err);
//! struct xcall* load_entity(const char* module_path, const char* entity_path,
//!                           metaffi_type_info* params, int8_t params_count,
//!                           metaffi_type_info* retvals, int8_t retvals_count,
//!                           char** err);
//! void free_xcall(struct xcall* pxcall, char** err);
//! ```
//!
//! A plugin may also export `make_callable` to wrap a runtime-specific
//! function context as an xcall:
//!
//! ```c
//! struct xcall* make_callable(void* make_callable_context,
//!                             metaffi_type_info* params, int8_t params_count,
//!                             metaffi_type_info* retvals, int8_t retvals_count,
//!                             char** err);
//! ```

use core::ffi::{c_char, c_void};
use std::ffi::CString;
use std::path::Path;

use super::library::Library;
use super::xcall::take_error;
use crate::cdt::{CTypeInfo, CTypeInfoArray, TypeInfo, XCall};
use crate::error::{Result, XllrError};

type LoadRuntimeFn = unsafe extern "C" fn(*mut *mut c_char);
type FreeRuntimeFn = unsafe extern "C" fn(*mut *mut c_char);
type LoadEntityFn = unsafe extern "C" fn(
    *const c_char,
    *const c_char,
    *mut CTypeInfo,
    i8,
    *mut CTypeInfo,
    i8,
    *mut *mut c_char,
) -> *mut XCall;
type FreeXCallFn = unsafe extern "C" fn(*mut XCall, *mut *mut c_char);
type MakeCallableFn = unsafe extern "C" fn(
    *mut c_void,
    *mut CTypeInfo,
    i8,
    *mut CTypeInfo,
    i8,
    *mut *mut c_char,
) -> *mut XCall;

/// Language runtime reachable through the engine
pub trait RuntimePlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Start the runtime; called once after the plugin is located
    fn load_runtime(&self) -> Result<()>;

    /// Stop the runtime; no entity may be invoked afterwards
    fn free_runtime(&self) -> Result<()>;

    /// Resolve an entity and return its xcall pair
    fn load_entity(
        &self,
        module_path: &str,
        entity_path: &str,
        params: &[TypeInfo],
        retvals: &[TypeInfo],
    ) -> Result<*mut XCall>;

    fn free_xcall(&self, xcall: *mut XCall) -> Result<()>;

    /// Wrap a runtime-specific function context as an xcall
    ///
    /// The xcall is released with [`RuntimePlugin::free_xcall`].
    fn make_callable(&self, context: *mut c_void, params: &[TypeInfo], retvals: &[TypeInfo]) -> Result<*mut XCall> {
        let _ = (context, params, retvals);
        Err(XllrError::SymbolMissing {
            plugin: self.name().to_string(),
            symbol: "make_callable".to_string(),
        })
    }

    /// Entities must be invoked on the thread that resolved them
    fn requires_thread_affinity(&self) -> bool {
        false
    }
}

/// Run `f` with an error slot and turn a set slot into an error
unsafe fn with_error_slot<T>(f: impl FnOnce(*mut *mut c_char) -> T) -> core::result::Result<T, String> {
    let mut err: *mut c_char = core::ptr::null_mut();
    let value = f(&mut err);
    match take_error(err) {
        None => Ok(value),
        Some(message) => Err(message),
    }
}

/// Plugin backed by a shared library
pub struct DylibPlugin {
    name: String,
    thread_affinity: bool,
    load_runtime: LoadRuntimeFn,
    free_runtime: FreeRuntimeFn,
    load_entity: LoadEntityFn,
    free_xcall: FreeXCallFn,
    make_callable: Option<MakeCallableFn>,
    // Last field: the library must outlive the copied function pointers
    library: Library,
}

impl DylibPlugin {
    /// Map `path` and resolve the plugin ABI
    pub fn open(name: &str, path: &Path) -> Result<Self> {
        let library = Library::open(path).map_err(|e| XllrError::PluginLoad {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let resolve = |symbol: &str| {
            library.symbol(symbol).map_err(|_| XllrError::SymbolMissing {
                plugin: name.to_string(),
                symbol: symbol.to_string(),
            })
        };

        // Safety: signatures follow the plugin ABI documented above
        unsafe {
            let load_runtime: LoadRuntimeFn = core::mem::transmute(resolve("load_runtime")?.as_ptr());
            let free_runtime: FreeRuntimeFn = core::mem::transmute(resolve("free_runtime")?.as_ptr());
            let load_entity: LoadEntityFn = core::mem::transmute(resolve("load_entity")?.as_ptr());
            let free_xcall: FreeXCallFn = core::mem::transmute(resolve("free_xcall")?.as_ptr());
            let make_callable = library
                .optional_symbol("make_callable")
                .map(|p| core::mem::transmute::<*mut c_void, MakeCallableFn>(p.as_ptr()));
            Ok(Self {
                name: name.to_string(),
                thread_affinity: false,
                load_runtime,
                free_runtime,
                load_entity,
                free_xcall,
                make_callable,
                library,
            })
        }
    }

    pub fn with_thread_affinity(mut self, affinity: bool) -> Self {
        self.thread_affinity = affinity;
        self
    }

    pub fn path(&self) -> &Path {
        self.library.path()
    }

    /// Raw symbol lookup for plugin-specific extensions
    pub fn symbol(&self, name: &str) -> Option<*mut c_void> {
        self.library.optional_symbol(name).map(|p| p.as_ptr())
    }

    fn invocation_error(&self, op: &str, message: String) -> XllrError {
        XllrError::Invocation(format!("{}: {} failed: {}", self.name, op, message))
    }
}

impl RuntimePlugin for DylibPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_runtime(&self) -> Result<()> {
        unsafe { with_error_slot(|err| (self.load_runtime)(err)) }.map_err(|reason| XllrError::PluginLoad {
            name: self.name.clone(),
            reason,
        })
    }

    fn free_runtime(&self) -> Result<()> {
        unsafe { with_error_slot(|err| (self.free_runtime)(err)) }
            .map_err(|message| self.invocation_error("free_runtime", message))
    }

    fn load_entity(
        &self,
        module_path: &str,
        entity_path: &str,
        params: &[TypeInfo],
        retvals: &[TypeInfo],
    ) -> Result<*mut XCall> {
        unsafe { resolve_entity(&self.name, self.load_entity, module_path, entity_path, params, retvals) }
    }

    fn free_xcall(&self, xcall: *mut XCall) -> Result<()> {
        unsafe { with_error_slot(|err| (self.free_xcall)(xcall, err)) }
            .map_err(|message| self.invocation_error("free_xcall", message))
    }

    fn make_callable(&self, context: *mut c_void, params: &[TypeInfo], retvals: &[TypeInfo]) -> Result<*mut XCall> {
        let make_callable = self.make_callable.ok_or_else(|| XllrError::SymbolMissing {
            plugin: self.name.clone(),
            symbol: "make_callable".to_string(),
        })?;
        unsafe { wrap_callable(&self.name, make_callable, context, params, retvals) }
    }

    fn requires_thread_affinity(&self) -> bool {
        self.thread_affinity
    }
}

/// Call a plugin's `load_entity`; an error it reports is a resolution failure
unsafe fn resolve_entity(
    plugin: &str,
    load_entity: LoadEntityFn,
    module_path: &str,
    entity_path: &str,
    params: &[TypeInfo],
    retvals: &[TypeInfo],
) -> Result<*mut XCall> {
    let module = CString::new(module_path)
        .map_err(|_| XllrError::InvalidEntityPath(format!("module path '{}' contains NUL", module_path)))?;
    let entity = CString::new(entity_path)
        .map_err(|_| XllrError::InvalidEntityPath(format!("entity path '{}' contains NUL", entity_path)))?;
    let mut c_params = CTypeInfoArray::new(params)?;
    let mut c_retvals = CTypeInfoArray::new(retvals)?;

    let xcall = with_error_slot(|err| {
        load_entity(
            module.as_ptr(),
            entity.as_ptr(),
            c_params.as_mut_ptr(),
            c_params.len(),
            c_retvals.as_mut_ptr(),
            c_retvals.len(),
            err,
        )
    })
    .map_err(|reason| XllrError::EntityResolution {
        plugin: plugin.to_string(),
        module: module_path.to_string(),
        entity: entity_path.to_string(),
        reason,
    })?;

    if xcall.is_null() {
        return Err(XllrError::EntityNotFound {
            module: module_path.to_string(),
            entity: entity_path.to_string(),
        });
    }
    Ok(xcall)
}

/// Call a plugin's `make_callable`
unsafe fn wrap_callable(
    plugin: &str,
    make_callable: MakeCallableFn,
    context: *mut c_void,
    params: &[TypeInfo],
    retvals: &[TypeInfo],
) -> Result<*mut XCall> {
    let mut c_params = CTypeInfoArray::new(params)?;
    let mut c_retvals = CTypeInfoArray::new(retvals)?;
    let xcall = with_error_slot(|err| {
        make_callable(
            context,
            c_params.as_mut_ptr(),
            c_params.len(),
            c_retvals.as_mut_ptr(),
            c_retvals.len(),
            err,
        )
    })
    .map_err(|message| XllrError::Invocation(format!("{}: make_callable failed: {}", plugin, message)))?;
    if xcall.is_null() {
        return Err(XllrError::Invocation(format!("{}: make_callable returned no xcall", plugin)));
    }
    Ok(xcall)
}

impl core::fmt::Debug for DylibPlugin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DylibPlugin")
            .field("name", &self.name)
            .field("path", &self.library.path())
            .field("thread_affinity", &self.thread_affinity)
            .field("make_callable", &self.make_callable.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdt::{alloc, TypeTag};

    unsafe extern "C" fn failing_load_entity(
        _module: *const c_char,
        _entity: *const c_char,
        _params: *mut CTypeInfo,
        _params_count: i8,
        _retvals: *mut CTypeInfo,
        _retvals_count: i8,
        err: *mut *mut c_char,
    ) -> *mut XCall {
        *err = alloc::alloc_c_string("no such class");
        core::ptr::null_mut()
    }

    unsafe extern "C" fn silent_load_entity(
        _module: *const c_char,
        _entity: *const c_char,
        _params: *mut CTypeInfo,
        _params_count: i8,
        _retvals: *mut CTypeInfo,
        _retvals_count: i8,
        _err: *mut *mut c_char,
    ) -> *mut XCall {
        core::ptr::null_mut()
    }

    /// Hands the context back as the xcall
    unsafe extern "C" fn passthrough_make_callable(
        context: *mut c_void,
        _params: *mut CTypeInfo,
        params_count: i8,
        _retvals: *mut CTypeInfo,
        retvals_count: i8,
        err: *mut *mut c_char,
    ) -> *mut XCall {
        if params_count != 1 || retvals_count != 0 {
            *err = alloc::alloc_c_string("unexpected signature");
            return core::ptr::null_mut();
        }
        context as *mut XCall
    }

    #[test]
    fn test_plugin_error_on_load_is_a_resolution_error() {
        let err = unsafe { resolve_entity("go", failing_load_entity, "pkg", "callable=F", &[], &[]) }.unwrap_err();
        match &err {
            XllrError::EntityResolution { plugin, module, entity, reason } => {
                assert_eq!(plugin, "go");
                assert_eq!(module, "pkg");
                assert_eq!(entity, "callable=F");
                assert_eq!(reason, "no such class");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains("failed to resolve 'callable=F'"));

        let err = unsafe { resolve_entity("go", silent_load_entity, "pkg", "callable=F", &[], &[]) }.unwrap_err();
        assert!(matches!(err, XllrError::EntityNotFound { .. }));
    }

    #[test]
    fn test_oversized_signature_never_reaches_plugin() {
        let params = vec![TypeInfo::new(TypeTag::INT8); 200];
        let err = unsafe { resolve_entity("go", silent_load_entity, "pkg", "F", &params, &[]) }.unwrap_err();
        assert!(matches!(
            err,
            XllrError::Marshal(crate::error::MarshalError::SignatureTooLong { len: 200 })
        ));
    }

    #[test]
    fn test_wrap_callable() {
        let mut target = XCall::new(core::ptr::null_mut(), core::ptr::null_mut());
        let context = &mut target as *mut XCall as *mut c_void;
        let xcall = unsafe {
            wrap_callable("go", passthrough_make_callable, context, &[TypeInfo::new(TypeTag::INT64)], &[])
        }
        .unwrap();
        assert_eq!(xcall, &mut target as *mut XCall);

        let err = unsafe { wrap_callable("go", passthrough_make_callable, context, &[], &[]) }.unwrap_err();
        assert_eq!(err.to_string(), "go: make_callable failed: unexpected signature");
    }
}
