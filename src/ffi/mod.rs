//! C ABI - host API (`xllr_*`) and runtime plugin API
//!
//! Design: Every fallible entry point takes a `char** out_err` slot that is
//! left null on success and receives a C-allocated message on failure. The
//! message is released with `xllr_free_string`.

mod host;
#[cfg(feature = "plugin-abi")]
mod plugin_api;

pub use host::*;
#[cfg(feature = "plugin-abi")]
pub use plugin_api::*;

use core::ffi::c_char;
use std::ffi::CStr;

use crate::callable::write_error;
use crate::cdt::{type_infos_from_raw, CTypeInfo, TypeInfo};
use crate::error::{Result, XllrError};

/// Borrow a NUL-terminated argument as UTF-8
///
/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
pub(crate) unsafe fn str_arg<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(XllrError::Invocation(format!("{} is null", what)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| XllrError::Invocation(format!("{} is not valid UTF-8", what)))
}

/// # Safety
/// `ptr` must point to `count` descriptors when `count > 0`.
pub(crate) unsafe fn signature_arg(ptr: *const CTypeInfo, count: i8) -> Vec<TypeInfo> {
    type_infos_from_raw(ptr, count)
}

/// Store the error of `result` in `out_err`, returning the value on success
///
/// # Safety
/// `out_err` must be null or writable.
pub(crate) unsafe fn report<T>(result: Result<T>, out_err: *mut *mut c_char) -> Option<T> {
    if !out_err.is_null() {
        *out_err = core::ptr::null_mut();
    }
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            write_error(out_err, &e.to_string());
            None
        }
    }
}

#[cfg(test)]
mod tests;
