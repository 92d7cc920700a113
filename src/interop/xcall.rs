//! Call shapes and xcall invocation

use core::ffi::c_char;

use super::buffer::CallBuffer;
use super::pin::ThreadPin;
use crate::cdt::{alloc, Cdts, TypeInfo, XCall};
use crate::engine::{construct_cdts, traverse_cdts, ValueBuilder, ValueSource};
use crate::error::{Result, XllrError};
use crate::logging::{log_xcall, log_xcall_error, perf};
use crate::value::Value;

/// One of the four fixed calling conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    ParamsRet,
    ParamsNoRet,
    NoParamsRet,
    NoParamsNoRet,
}

impl CallShape {
    pub fn from_counts(params: usize, retvals: usize) -> Self {
        match (params > 0, retvals > 0) {
            (true, true) => Self::ParamsRet,
            (true, false) => Self::ParamsNoRet,
            (false, true) => Self::NoParamsRet,
            (false, false) => Self::NoParamsNoRet,
        }
    }

    pub fn has_params(self) -> bool {
        matches!(self, Self::ParamsRet | Self::ParamsNoRet)
    }

    pub fn has_retvals(self) -> bool {
        matches!(self, Self::ParamsRet | Self::NoParamsRet)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ParamsRet => "params_ret",
            Self::ParamsNoRet => "params_no_ret",
            Self::NoParamsRet => "no_params_ret",
            Self::NoParamsNoRet => "no_params_no_ret",
        }
    }
}

/// Take ownership of a C error string, if one was set
///
/// # Safety
/// `err` must be null or a NUL-terminated string from the C allocator.
pub unsafe fn take_error(err: *mut c_char) -> Option<String> {
    if err.is_null() {
        return None;
    }
    let message = std::ffi::CStr::from_ptr(err).to_string_lossy().into_owned();
    alloc::free(err);
    Some(message)
}

/// Invoke `xcall` with a buffer pair laid out by [`CallBuffer`]
///
/// `buffer` is the pair base: parameters at `[0]`, return values at `[1]`.
///
/// # Safety
/// `xcall` must be live and its dispatcher must implement `shape`;
/// `buffer` must be a pair from `alloc_cdts_buffer` unless the shape is
/// `NoParamsNoRet`.
pub unsafe fn invoke_xcall(xcall: &XCall, shape: CallShape, buffer: *mut Cdts) -> Result<()> {
    let part = match shape {
        CallShape::NoParamsRet => buffer.wrapping_add(1),
        _ => buffer,
    };
    call_dispatcher(xcall, shape, part)
}

/// Call the dispatcher with the part of the pair `shape` expects
///
/// `ParamsRet` and `ParamsNoRet` take the pair base, `NoParamsRet` takes
/// the return value array and `NoParamsNoRet` ignores `part`.
///
/// # Safety
/// As for [`invoke_xcall`], with `part` already offset.
pub unsafe fn call_dispatcher(xcall: &XCall, shape: CallShape, part: *mut Cdts) -> Result<()> {
    let mut err: *mut c_char = core::ptr::null_mut();
    match shape {
        CallShape::NoParamsNoRet => xcall.call_no_buffer(&mut err),
        _ => xcall.call_with_buffer(part, &mut err),
    }
    let error = take_error(err);
    super::record_call(error.is_some());
    match error {
        None => Ok(()),
        Some(message) => {
            log_xcall_error(shape.name(), &message);
            Err(XllrError::Invocation(message))
        }
    }
}

/// Xcall bound to its signature
#[derive(Debug)]
pub struct XCallInvoker {
    xcall: XCall,
    params: Vec<TypeInfo>,
    retvals: Vec<TypeInfo>,
    shape: CallShape,
}

// Safety: the pair is opaque; thread rules are enforced by the entity layer
unsafe impl Send for XCallInvoker {}
unsafe impl Sync for XCallInvoker {}

impl XCallInvoker {
    pub fn new(xcall: XCall, params: Vec<TypeInfo>, retvals: Vec<TypeInfo>) -> Self {
        let shape = CallShape::from_counts(params.len(), retvals.len());
        Self {
            xcall,
            params,
            retvals,
            shape,
        }
    }

    pub fn shape(&self) -> CallShape {
        self.shape
    }

    pub fn params(&self) -> &[TypeInfo] {
        &self.params
    }

    pub fn retvals(&self) -> &[TypeInfo] {
        &self.retvals
    }

    pub fn xcall(&self) -> &XCall {
        &self.xcall
    }

    /// Buffer sized for this signature
    pub fn buffer(&self) -> CallBuffer {
        CallBuffer::new(self.params.len() as u64, self.retvals.len() as u64)
    }

    /// Invoke with a caller-populated buffer
    pub fn invoke_raw(&self, buffer: &mut CallBuffer) -> Result<()> {
        let _pin = ThreadPin::enter();
        log_xcall(self.shape.name(), self.params.len(), self.retvals.len());
        unsafe { invoke_xcall(&self.xcall, self.shape, buffer.as_mut_ptr()) }
    }

    /// Marshal `args`, invoke, and unmarshal the return values
    pub fn invoke(&self, args: Vec<Value>) -> Result<Vec<Value>> {
        if args.len() != self.params.len() {
            return Err(XllrError::ArgCountMismatch {
                expected: self.params.len(),
                got: args.len(),
            });
        }
        // Held across marshaling so the whole round trip stays on this thread
        let _pin = ThreadPin::enter();
        let _perf = perf::track("xcall");

        let mut buffer = self.buffer();
        if self.shape.has_params() {
            construct_cdts(
                buffer.params_mut(),
                &mut ValueSource::new(&args, &self.params),
                &self.params,
            )?;
        }

        self.invoke_raw(&mut buffer)?;

        if !self.shape.has_retvals() {
            return Ok(Vec::new());
        }
        let mut builder = ValueBuilder::new(self.retvals.len());
        traverse_cdts(buffer.retvals(), &mut builder)?;
        Ok(builder.into_values())
    }
}
