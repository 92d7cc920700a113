//! Runtime plugin ABI for the in-process Rust runtime
//!
//! Lets another engine load this library as plugin `xllr.rust`. Entities
//! are the functions registered with [`local_runtime`].

use core::ffi::{c_char, c_void};

use super::{report, signature_arg, str_arg};
use crate::callable::{
    dispatch_no_params_no_ret, dispatch_no_params_ret, dispatch_params_no_ret, dispatch_params_ret,
};
use crate::cdt::{CTypeInfo, Cdts, XCall};
use crate::interop::{local_runtime, RuntimePlugin};

/// # Safety
/// `err` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn load_runtime(err: *mut *mut c_char) {
    report(local_runtime().load_runtime(), err);
}

/// # Safety
/// `err` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn free_runtime(err: *mut *mut c_char) {
    report(local_runtime().free_runtime(), err);
}

/// # Safety
/// Strings must be NUL-terminated; descriptor arrays must hold the given
/// number of entries.
#[no_mangle]
pub unsafe extern "C" fn load_entity(
    module_path: *const c_char,
    entity_path: *const c_char,
    params_types: *const CTypeInfo,
    params_count: i8,
    retvals_types: *const CTypeInfo,
    retval_count: i8,
    err: *mut *mut c_char,
) -> *mut XCall {
    let result = (|| {
        let module = str_arg(module_path, "module path")?;
        let entity = str_arg(entity_path, "entity path")?;
        local_runtime().load_entity(
            module,
            entity,
            &signature_arg(params_types, params_count),
            &signature_arg(retvals_types, retval_count),
        )
    })();
    report(result, err).unwrap_or(core::ptr::null_mut())
}

/// Export the native function registered under the objects-table handle
/// passed as `make_callable_context`
///
/// # Safety
/// Descriptor arrays must hold the given number of entries.
#[no_mangle]
pub unsafe extern "C" fn make_callable(
    make_callable_context: *mut c_void,
    params_types: *const CTypeInfo,
    params_count: i8,
    retvals_types: *const CTypeInfo,
    retval_count: i8,
    err: *mut *mut c_char,
) -> *mut XCall {
    let result = local_runtime().make_callable(
        make_callable_context,
        &signature_arg(params_types, params_count),
        &signature_arg(retvals_types, retval_count),
    );
    report(result, err).unwrap_or(core::ptr::null_mut())
}

/// # Safety
/// `pxcall` must come from [`load_entity`] or [`make_callable`].
#[no_mangle]
pub unsafe extern "C" fn free_xcall(pxcall: *mut XCall, err: *mut *mut c_char) {
    report(local_runtime().free_xcall(pxcall), err);
}

/// # Safety
/// `context` must be the context half of an xcall from [`load_entity`].
#[no_mangle]
pub unsafe extern "C" fn xcall_params_ret(context: *mut c_void, params_ret: *mut Cdts, out_err: *mut *mut c_char) {
    dispatch_params_ret(context, params_ret, out_err);
}

/// # Safety
/// As for [`xcall_params_ret`].
#[no_mangle]
pub unsafe extern "C" fn xcall_params_no_ret(context: *mut c_void, parameters: *mut Cdts, out_err: *mut *mut c_char) {
    dispatch_params_no_ret(context, parameters, out_err);
}

/// # Safety
/// As for [`xcall_params_ret`].
#[no_mangle]
pub unsafe extern "C" fn xcall_no_params_ret(context: *mut c_void, return_values: *mut Cdts, out_err: *mut *mut c_char) {
    dispatch_no_params_ret(context, return_values, out_err);
}

/// # Safety
/// As for [`xcall_params_ret`].
#[no_mangle]
pub unsafe extern "C" fn xcall_no_params_no_ret(context: *mut c_void, out_err: *mut *mut c_char) {
    dispatch_no_params_no_ret(context, out_err);
}
