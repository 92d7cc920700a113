//! Wire representation shared by every runtime
//!
//! Architecture:
//! - `types.rs` - Type tags and signature descriptors
//! - `chars.rs` - char8/char16/char32 payloads
//! - `cell.rs` - Value Cell (CDT) with handle, callable and xcall records
//! - `array.rs` - Value Array (CDTS)
//! - `alloc.rs` - C allocator bridge and per-thread cell cache
//!
//! All structs here are `#[repr(C)]` and must stay layout compatible with
//! the plugin ABI.

pub mod alloc;
mod array;
mod cell;
mod chars;
mod types;

pub use array::Cdts;
pub use cell::{
    Cdt, CdtCallable, CdtHandle, CdtVal, InteriorNul, ReleaseFn, XCall, XCallNoBufferFn,
    XCallWithBufferFn,
};
pub use chars::{Char16, Char32, Char8};
pub use types::{
    format_signature, signature_count, signature_from_json, signatures_match, type_infos_from_raw, CTypeInfo,
    CTypeInfoArray, TypeInfo, TypeTag, MIXED_OR_UNKNOWN_DIMENSIONS,
};
