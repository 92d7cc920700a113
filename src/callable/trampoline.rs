//! The four fixed dispatchers and the export path
//!
//! Every failure inside a dispatcher, panics included, is converted into a
//! message in the error out-parameter. Nothing unwinds across `extern "C"`.

use core::ffi::{c_char, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashSet;
use once_cell::sync::Lazy;

use super::NativeFunction;
use crate::cdt::{alloc, Cdts, XCall};
use crate::engine::{construct_cdts, traverse_cdts, ValueBuilder, ValueSource};
use crate::error::{Result, XllrError};
use crate::handles::{objects, Object};
use crate::interop::CallShape;
use crate::logging::{log_xcall, log_xcall_panic, warn};

/// Xcalls exported for a single callable cell, owned by that cell
static CELL_EXPORTS: Lazy<DashSet<usize>> = Lazy::new(DashSet::new);

/// Context passed as the second half of the xcall pair
struct CallableContext {
    handle: u64,
    params_count: usize,
    retval_count: usize,
}

/// `params` at `buffer[0]`, retvals at `buffer[1]`
pub(crate) unsafe extern "C" fn dispatch_params_ret(context: *mut c_void, buffer: *mut Cdts, out_err: *mut *mut c_char) {
    dispatch(context, buffer, buffer.wrapping_add(1), out_err);
}

pub(crate) unsafe extern "C" fn dispatch_params_no_ret(context: *mut c_void, buffer: *mut Cdts, out_err: *mut *mut c_char) {
    dispatch(context, buffer, core::ptr::null_mut(), out_err);
}

/// Retvals at `buffer[0]`
pub(crate) unsafe extern "C" fn dispatch_no_params_ret(context: *mut c_void, buffer: *mut Cdts, out_err: *mut *mut c_char) {
    dispatch(context, core::ptr::null_mut(), buffer, out_err);
}

pub(crate) unsafe extern "C" fn dispatch_no_params_no_ret(context: *mut c_void, out_err: *mut *mut c_char) {
    dispatch(context, core::ptr::null_mut(), core::ptr::null_mut(), out_err);
}

fn dispatcher_for(shape: CallShape) -> *mut c_void {
    match shape {
        CallShape::ParamsRet => dispatch_params_ret as usize as *mut c_void,
        CallShape::ParamsNoRet => dispatch_params_no_ret as usize as *mut c_void,
        CallShape::NoParamsRet => dispatch_no_params_ret as usize as *mut c_void,
        CallShape::NoParamsNoRet => dispatch_no_params_no_ret as usize as *mut c_void,
    }
}

/// Whether `xcall` was produced by [`export_function`]
pub fn is_local_xcall(xcall: &XCall) -> bool {
    [
        CallShape::ParamsRet,
        CallShape::ParamsNoRet,
        CallShape::NoParamsRet,
        CallShape::NoParamsNoRet,
    ]
    .into_iter()
    .any(|shape| dispatcher_for(shape) == xcall.dispatcher())
}

/// Register `function` and build an xcall for it
///
/// The xcall and its context stay alive until [`release_exported`].
pub fn export_function(function: Arc<NativeFunction>) -> *mut XCall {
    let shape = function.shape();
    let params_count = function.params().len();
    let retval_count = function.retvals().len();
    let context = Box::into_raw(Box::new(CallableContext {
        handle: objects().register(Object::from_arc(function)),
        params_count,
        retval_count,
    }));
    Box::into_raw(Box::new(XCall::new(
        dispatcher_for(shape),
        context as *mut c_void,
    )))
}

/// Export `function` for one callable cell; freeing the cell releases it
pub(crate) fn export_for_cell(function: Arc<NativeFunction>) -> *mut XCall {
    let xcall = export_function(function);
    CELL_EXPORTS.insert(xcall as usize);
    xcall
}

/// Release `xcall` if it was exported by [`export_for_cell`]
///
/// # Safety
/// `xcall` must be null or a pointer read from a callable cell being freed.
pub(crate) unsafe fn release_cell_export(xcall: *mut XCall) {
    if CELL_EXPORTS.remove(&(xcall as usize)).is_none() {
        return;
    }
    if let Err(e) = release_exported(xcall) {
        warn!(target: "xllr::handles", error = %e, "Failed to release callable export");
    }
}

/// Function behind a local xcall, if it is still registered
///
/// # Safety
/// `xcall` must satisfy [`is_local_xcall`] and not have been released.
pub unsafe fn local_function(xcall: &XCall) -> Option<Arc<NativeFunction>> {
    let context = (xcall.context() as *const CallableContext).as_ref()?;
    objects().resolve(context.handle)?.downcast::<NativeFunction>()
}

/// Free an xcall from [`export_function`] and release its handle
///
/// # Safety
/// `xcall` must come from [`export_function`] and not be used afterwards.
pub unsafe fn release_exported(xcall: *mut XCall) -> Result<()> {
    let Some(pair) = xcall.as_ref() else {
        return Ok(());
    };
    if !is_local_xcall(pair) {
        return Err(XllrError::Invocation(
            "xcall was not created by this runtime".to_string(),
        ));
    }
    let pair = Box::from_raw(xcall);
    let context = Box::from_raw(pair.context() as *mut CallableContext);
    objects().release(context.handle)?;
    Ok(())
}

/// Store `message` in the error out-parameter
///
/// # Safety
/// `out_err` must be null or writable.
pub unsafe fn write_error(out_err: *mut *mut c_char, message: &str) {
    if !out_err.is_null() {
        *out_err = alloc::alloc_c_string(message);
    }
}

unsafe fn dispatch(context: *mut c_void, params: *mut Cdts, retvals: *mut Cdts, out_err: *mut *mut c_char) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| invoke_local(context, params, retvals)));
    let message = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err.to_string(),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log_xcall_panic(&message);
            message
        }
    };
    write_error(out_err, &message);
}

fn panic_message(payload: &(dyn core::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic: unknown payload".to_string()
    }
}

unsafe fn invoke_local(context: *mut c_void, params: *mut Cdts, retvals: *mut Cdts) -> Result<()> {
    let context = (context as *const CallableContext)
        .as_ref()
        .ok_or_else(|| XllrError::Invocation("null callable context".to_string()))?;
    let function = objects()
        .resolve(context.handle)
        .and_then(|object| object.downcast::<NativeFunction>())
        .ok_or_else(|| XllrError::Invocation(format!(
            "callable handle {} is no longer registered",
            context.handle
        )))?;
    log_xcall(function.shape().name(), context.params_count, context.retval_count);

    let args = match params.as_ref() {
        Some(params) if context.params_count > 0 => {
            let mut builder = ValueBuilder::new(params.len());
            traverse_cdts(params, &mut builder)?;
            builder.into_values()
        }
        _ => Vec::new(),
    };

    let results = function.call(args)?;

    if context.retval_count > 0 {
        let retvals = retvals
            .as_mut()
            .ok_or_else(|| XllrError::Invocation("missing return value buffer".to_string()))?;
        construct_cdts(
            retvals,
            &mut ValueSource::new(&results, function.retvals()),
            function.retvals(),
        )?;
    }
    Ok(())
}
