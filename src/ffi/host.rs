//! Host API used by generated glue and language front-ends

use core::ffi::{c_char, c_void};
use std::path::Path;

use super::{report, signature_arg, str_arg};
use crate::cdt::{alloc, CTypeInfo, Cdts, XCall};
use crate::config::XllrConfig;
use crate::error::{Result, XllrError};
use crate::interop::{self, xllr, CallShape, ThreadPin};
use crate::logging::{self, debug};

/// Initialize logging and the engine
///
/// `config_path` may be null to use `$XLLR_HOME/xllr.toml` or defaults.
/// Returns 0 on success, -1 with `out_err` set on failure.
///
/// # Safety
/// `config_path` must be null or a NUL-terminated string; `out_err` must be
/// null or writable.
#[no_mangle]
pub unsafe extern "C" fn xllr_init(config_path: *const c_char, out_err: *mut *mut c_char) -> i32 {
    let result = (|| {
        let config = if config_path.is_null() {
            XllrConfig::from_env()?
        } else {
            XllrConfig::load(Path::new(str_arg(config_path, "config path")?))?
        };
        logging::init_with_config(config.log_config());
        xllr().init(config)
    })();
    match report(result, out_err) {
        Some(()) => 0,
        None => -1,
    }
}

/// Free every loaded runtime plugin
#[no_mangle]
pub extern "C" fn xllr_cleanup() {
    debug!(target: "xllr::plugin", "Cleaning up engine");
    xllr().shutdown();
}

/// # Safety
/// `runtime_plugin` must be a NUL-terminated string; `out_err` writable or null.
#[no_mangle]
pub unsafe extern "C" fn xllr_load_runtime_plugin(runtime_plugin: *const c_char, out_err: *mut *mut c_char) {
    let result = str_arg(runtime_plugin, "runtime plugin name").and_then(|name| xllr().load_runtime_plugin(name));
    report(result, out_err);
}

/// # Safety
/// `runtime_plugin` must be a NUL-terminated string; `out_err` writable or null.
#[no_mangle]
pub unsafe extern "C" fn xllr_free_runtime_plugin(runtime_plugin: *const c_char, out_err: *mut *mut c_char) {
    let result = str_arg(runtime_plugin, "runtime plugin name").and_then(|name| xllr().free_runtime_plugin(name));
    report(result, out_err);
}

/// Resolve an entity; returns null with `out_err` set on failure
///
/// # Safety
/// String arguments must be NUL-terminated; descriptor arrays must hold
/// the given number of entries.
#[no_mangle]
pub unsafe extern "C" fn xllr_load_entity(
    runtime_plugin: *const c_char,
    module_path: *const c_char,
    entity_path: *const c_char,
    params_types: *const CTypeInfo,
    params_count: i8,
    retvals_types: *const CTypeInfo,
    retvals_count: i8,
    out_err: *mut *mut c_char,
) -> *mut XCall {
    let result = (|| {
        let plugin = str_arg(runtime_plugin, "runtime plugin name")?;
        let module = str_arg(module_path, "module path")?;
        let entity = str_arg(entity_path, "entity path")?;
        let params = signature_arg(params_types, params_count);
        let retvals = signature_arg(retvals_types, retvals_count);
        xllr().load_entity_raw(plugin, module, entity, &params, &retvals)
    })();
    report(result, out_err).unwrap_or(core::ptr::null_mut())
}

/// Wrap `make_callable_context` as an xcall of `runtime_plugin`
///
/// # Safety
/// The context must be what the plugin expects; descriptor arrays must hold
/// the given number of entries.
#[no_mangle]
pub unsafe extern "C" fn xllr_make_callable(
    runtime_plugin: *const c_char,
    make_callable_context: *mut c_void,
    params_types: *const CTypeInfo,
    params_count: i8,
    retvals_types: *const CTypeInfo,
    retvals_count: i8,
    out_err: *mut *mut c_char,
) -> *mut XCall {
    let result = (|| {
        let plugin = str_arg(runtime_plugin, "runtime plugin name")?;
        let params = signature_arg(params_types, params_count);
        let retvals = signature_arg(retvals_types, retvals_count);
        xllr().make_callable(plugin, make_callable_context, &params, &retvals)
    })();
    report(result, out_err).unwrap_or(core::ptr::null_mut())
}

/// # Safety
/// `xcall` must come from [`xllr_load_entity`] or [`xllr_make_callable`]
/// for the same plugin.
#[no_mangle]
pub unsafe extern "C" fn xllr_free_xcall(runtime_plugin: *const c_char, xcall: *mut XCall, out_err: *mut *mut c_char) {
    let result = str_arg(runtime_plugin, "runtime plugin name").and_then(|name| xllr().free_xcall_raw(name, xcall));
    report(result, out_err);
}

unsafe fn invoke(xcall: *mut XCall, shape: CallShape, buffer: *mut Cdts, out_err: *mut *mut c_char) {
    let result: Result<()> = match xcall.as_ref() {
        None => Err(XllrError::Invocation("xcall is null".to_string())),
        Some(pair) => {
            let _pin = ThreadPin::enter();
            interop::call_dispatcher(pair, shape, buffer)
        }
    };
    report(result, out_err);
}

/// Invoke with parameters at `buffer[0]` and return values at `buffer[1]`
///
/// # Safety
/// `xcall` must be live and `buffer` a pair from [`xllr_alloc_cdts_buffer`].
#[no_mangle]
pub unsafe extern "C" fn xllr_xcall_params_ret(xcall: *mut XCall, buffer: *mut Cdts, out_err: *mut *mut c_char) {
    invoke(xcall, CallShape::ParamsRet, buffer, out_err);
}

/// # Safety
/// `xcall` must be live and `parameters` point to the parameter array.
#[no_mangle]
pub unsafe extern "C" fn xllr_xcall_params_no_ret(xcall: *mut XCall, parameters: *mut Cdts, out_err: *mut *mut c_char) {
    invoke(xcall, CallShape::ParamsNoRet, parameters, out_err);
}

/// # Safety
/// `xcall` must be live and `return_values` point to the return value array.
#[no_mangle]
pub unsafe extern "C" fn xllr_xcall_no_params_ret(xcall: *mut XCall, return_values: *mut Cdts, out_err: *mut *mut c_char) {
    invoke(xcall, CallShape::NoParamsRet, return_values, out_err);
}

/// # Safety
/// `xcall` must be live.
#[no_mangle]
pub unsafe extern "C" fn xllr_xcall_no_params_no_ret(xcall: *mut XCall, out_err: *mut *mut c_char) {
    invoke(xcall, CallShape::NoParamsNoRet, core::ptr::null_mut(), out_err);
}

#[no_mangle]
pub extern "C" fn xllr_alloc_cdts_buffer(params_count: u64, retvals_count: u64) -> *mut Cdts {
    interop::alloc_cdts_buffer(params_count, retvals_count)
}

/// # Safety
/// `buffer` must be null or come from [`xllr_alloc_cdts_buffer`] on this thread.
#[no_mangle]
pub unsafe extern "C" fn xllr_free_cdts_buffer(buffer: *mut Cdts) {
    interop::free_cdts_buffer(buffer);
}

/// Zeroed memory from the shared C allocator
#[no_mangle]
pub extern "C" fn xllr_alloc_memory(size: u64) -> *mut c_void {
    alloc::calloc::<u8>(size as usize) as *mut c_void
}

/// # Safety
/// `ptr` must be null or a live C allocation.
#[no_mangle]
pub unsafe extern "C" fn xllr_free_memory(ptr: *mut c_void) {
    alloc::free(ptr);
}

/// Release an error message or string payload
///
/// # Safety
/// `s` must be null or a C-allocated string.
#[no_mangle]
pub unsafe extern "C" fn xllr_free_string(s: *mut c_char) {
    alloc::free(s);
}

/// # Safety
/// `flag_name` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn xllr_set_runtime_flag(flag_name: *const c_char) {
    if let Ok(flag) = str_arg(flag_name, "flag name") {
        xllr().set_runtime_flag(flag);
    }
}

/// Returns 1 when set, 0 otherwise
///
/// # Safety
/// `flag_name` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn xllr_is_runtime_flag_set(flag_name: *const c_char) -> i32 {
    match str_arg(flag_name, "flag name") {
        Ok(flag) => xllr().is_runtime_flag_set(flag) as i32,
        Err(_) => 0,
    }
}
