//! xllr - cross-runtime value marshaling and invocation engine
//!
//! Native code in one language runtime calls, and is called by, code in
//! another runtime through a stable C ABI. Values cross as tagged cells
//! (see [`cdt`]); calls go through xcall pairs resolved by runtime plugins
//! (see [`interop`]).
//!
//! ```no_run
//! use xllr::{TypeInfo, TypeTag, Value, Xllr};
//!
//! let engine = Xllr::default();
//! let add = engine.load_entity(
//!     "rust",
//!     "math",
//!     "callable=add",
//!     &[TypeInfo::new(TypeTag::INT64), TypeInfo::new(TypeTag::INT64)],
//!     &[TypeInfo::new(TypeTag::INT64)],
//! )?;
//! let sum = add.call(vec![Value::I64(1), Value::I64(2)])?;
//! # Ok::<(), xllr::XllrError>(())
//! ```

pub mod callable;
pub mod cdt;
pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod handles;
pub mod interop;
pub mod logging;
pub mod value;

// Re-export core types
pub use callable::{Callable, ForeignCallable, NativeFunction};
pub use cdt::{Cdt, Cdts, TypeInfo, TypeTag, MIXED_OR_UNKNOWN_DIMENSIONS};
pub use config::XllrConfig;
pub use error::{HandleError, MarshalError, Result, XllrError};
pub use handles::{objects, ForeignHandle, HandleTable, Object};
pub use interop::{local_runtime, xllr, CallBuffer, EntityHandle, LocalRuntime, RuntimePlugin, Xllr};
pub use value::{FromValue, Value};
