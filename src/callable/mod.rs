//! Callable bridge - Rust functions ⇄ cross-runtime callables
//!
//! Design: A local function crosses the boundary as an xcall whose
//! dispatcher is one of exactly four trampolines, chosen once from the
//! presence of parameters and return values. The context carries the
//! function's handle in the objects table plus its counts.
//!
//! A foreign callable arrives as an xcall pointer plus wire signature and is
//! invoked through the same four call shapes. A local function that makes a
//! round trip comes back as the original `Arc<NativeFunction>`.

mod trampoline;

use core::fmt;
use std::sync::Arc;

use crate::cdt::{CdtCallable, TypeInfo, TypeTag, XCall};
use crate::error::{Result, XllrError};
use crate::interop::{CallShape, XCallInvoker};
use crate::value::Value;

pub use trampoline::{
    export_function, is_local_xcall, local_function, release_exported, write_error,
};
pub(crate) use trampoline::{export_for_cell, release_cell_export};
pub(crate) use trampoline::{
    dispatch_no_params_no_ret, dispatch_no_params_ret, dispatch_params_no_ret, dispatch_params_ret,
};

/// Boxed body of a [`NativeFunction`]
pub type NativeFn = dyn Fn(Vec<Value>) -> Result<Vec<Value>> + Send + Sync;

/// Rust function with a declared cross-runtime signature
pub struct NativeFunction {
    name: String,
    params: Vec<TypeInfo>,
    retvals: Vec<TypeInfo>,
    func: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, params: Vec<TypeInfo>, retvals: Vec<TypeInfo>, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            retvals,
            func: Box::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[TypeInfo] {
        &self.params
    }

    pub fn retvals(&self) -> &[TypeInfo] {
        &self.retvals
    }

    pub fn shape(&self) -> CallShape {
        CallShape::from_counts(self.params.len(), self.retvals.len())
    }

    /// Invoke with argument and result count checks
    pub fn call(&self, args: Vec<Value>) -> Result<Vec<Value>> {
        if args.len() != self.params.len() {
            return Err(XllrError::ArgCountMismatch {
                expected: self.params.len(),
                got: args.len(),
            });
        }
        let results = (self.func)(args)?;
        if results.len() != self.retvals.len() {
            return Err(XllrError::Invocation(format!(
                "'{}' returned {} values, expected {}",
                self.name,
                results.len(),
                self.retvals.len()
            )));
        }
        Ok(results)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("retvals", &self.retvals)
            .finish()
    }
}

/// Callable owned by another runtime
#[derive(Clone)]
pub struct ForeignCallable {
    xcall: *mut XCall,
    invoker: Arc<XCallInvoker>,
}

// Safety: the xcall pointer is only handed back to the runtime that made it
unsafe impl Send for ForeignCallable {}
unsafe impl Sync for ForeignCallable {}

impl ForeignCallable {
    /// # Safety
    /// `xcall` must point to a live xcall whose dispatcher matches the
    /// shape implied by the signature.
    pub unsafe fn new(xcall: *mut XCall, params: Vec<TypeInfo>, retvals: Vec<TypeInfo>) -> Option<Self> {
        let pair = *xcall.as_ref()?;
        Some(Self {
            xcall,
            invoker: Arc::new(XCallInvoker::new(pair, params, retvals)),
        })
    }

    pub fn xcall(&self) -> *mut XCall {
        self.xcall
    }

    pub fn params(&self) -> &[TypeInfo] {
        self.invoker.params()
    }

    pub fn retvals(&self) -> &[TypeInfo] {
        self.invoker.retvals()
    }

    pub fn shape(&self) -> CallShape {
        self.invoker.shape()
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Vec<Value>> {
        self.invoker.invoke(args)
    }
}

impl fmt::Debug for ForeignCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignCallable")
            .field("xcall", &self.xcall)
            .field("shape", &self.shape())
            .finish()
    }
}

impl PartialEq for ForeignCallable {
    fn eq(&self, other: &Self) -> bool {
        self.xcall == other.xcall
    }
}

/// Function value crossing the boundary
#[derive(Debug, Clone)]
pub enum Callable {
    Local(Arc<NativeFunction>),
    Foreign(ForeignCallable),
}

impl Callable {
    pub fn local<F>(name: &str, params: Vec<TypeInfo>, retvals: Vec<TypeInfo>, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        Self::Local(Arc::new(NativeFunction::new(name, params, retvals, func)))
    }

    pub fn params(&self) -> &[TypeInfo] {
        match self {
            Self::Local(f) => f.params(),
            Self::Foreign(f) => f.params(),
        }
    }

    pub fn retvals(&self) -> &[TypeInfo] {
        match self {
            Self::Local(f) => f.retvals(),
            Self::Foreign(f) => f.retvals(),
        }
    }

    pub fn shape(&self) -> CallShape {
        CallShape::from_counts(self.params().len(), self.retvals().len())
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Vec<Value>> {
        match self {
            Self::Local(f) => f.call(args),
            Self::Foreign(f) => f.call(args),
        }
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Local(a), Self::Local(b)) => Arc::ptr_eq(a, b),
            (Self::Foreign(a), Self::Foreign(b)) => a == b,
            _ => false,
        }
    }
}

fn tags(types: &[TypeInfo]) -> Vec<TypeTag> {
    types
        .iter()
        .map(|t| if t.dimensions > 0 { t.tag.with_array() } else { t.tag })
        .collect()
}

/// Wire record for `function`
///
/// A local function gets a fresh export owned by the record's cell and
/// released when that cell is freed.
pub(crate) fn to_record(function: &Callable) -> Result<*mut CdtCallable> {
    let params = tags(function.params());
    let retvals = tags(function.retvals());
    // Checked before exporting so a rejected signature leaks nothing
    crate::cdt::signature_count(params.len())?;
    crate::cdt::signature_count(retvals.len())?;
    let xcall = match function {
        Callable::Local(f) => export_for_cell(f.clone()),
        Callable::Foreign(f) => f.xcall(),
    };
    Ok(CdtCallable::alloc(xcall, &params, &retvals)?)
}

/// Rebuild a callable from its wire record
///
/// # Safety
/// `record.val` must be null or a live xcall.
pub(crate) unsafe fn from_record(record: &CdtCallable) -> Option<Callable> {
    let xcall = record.val.as_ref()?;
    if is_local_xcall(xcall) {
        if let Some(f) = local_function(xcall) {
            return Some(Callable::Local(f));
        }
    }
    let params = record.params().into_iter().map(TypeInfo::new).collect();
    let retvals = record.retvals().into_iter().map(TypeInfo::new).collect();
    ForeignCallable::new(record.val, params, retvals).map(Callable::Foreign)
}
