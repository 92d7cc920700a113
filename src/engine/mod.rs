//! Construction and traversal engines
//!
//! Design: The engines own the wire rules (tag resolution, dimension
//! inference, handle minting, callable wrapping) and talk to the native side
//! only through two traits:
//! - [`ConstructSource`] - supplies native values addressed by index path
//! - [`TraverseSink`] - receives decoded values addressed by index path
//!
//! Architecture:
//! - `construct.rs` - native → Value Array
//! - `traverse.rs` - Value Array → native
//! - `native.rs` - [`ValueSource`]/[`ValueBuilder`] over the `Value` model

mod construct;
mod native;
mod traverse;

use core::any::TypeId;
use core::sync::atomic::{AtomicUsize, Ordering};

use smallvec::SmallVec;

use crate::callable::Callable;
use crate::cdt::{Cdt, CdtHandle, Cdts, TypeInfo, TypeTag};
use crate::error::{format_path, MarshalError, Result};
use crate::handles::{ForeignHandle, Object};

pub use construct::{construct_cdt, construct_cdts};
pub use native::{ValueBuilder, ValueSource};
pub use traverse::{common_element_type, sample_handle_types, traverse_cdt, traverse_cdts};

/// Position of a value: top-level index followed by nested array indices
pub type IndexPath = SmallVec<[u64; 8]>;

/// Handle-typed array elements sampled when inferring a native element type
pub const DEFAULT_HANDLE_TYPE_SAMPLES: usize = 3;

static HANDLE_TYPE_SAMPLES: AtomicUsize = AtomicUsize::new(DEFAULT_HANDLE_TYPE_SAMPLES);

pub fn set_handle_type_samples(samples: usize) {
    HANDLE_TYPE_SAMPLES.store(samples.max(1), Ordering::Relaxed);
}

pub fn handle_type_samples() -> usize {
    HANDLE_TYPE_SAMPLES.load(Ordering::Relaxed)
}

/// Value carried inline in a cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    F64(f64),
    F32(f32),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Size(u64),
    Bool(bool),
    Char8(char),
    Char16(char),
    Char32(char),
}

impl Scalar {
    pub fn tag(&self) -> TypeTag {
        match self {
            Self::F64(_) => TypeTag::FLOAT64,
            Self::F32(_) => TypeTag::FLOAT32,
            Self::I8(_) => TypeTag::INT8,
            Self::I16(_) => TypeTag::INT16,
            Self::I32(_) => TypeTag::INT32,
            Self::I64(_) => TypeTag::INT64,
            Self::U8(_) => TypeTag::UINT8,
            Self::U16(_) => TypeTag::UINT16,
            Self::U32(_) => TypeTag::UINT32,
            Self::U64(_) => TypeTag::UINT64,
            Self::Size(_) => TypeTag::SIZE,
            Self::Bool(_) => TypeTag::BOOL,
            Self::Char8(_) => TypeTag::CHAR8,
            Self::Char16(_) => TypeTag::CHAR16,
            Self::Char32(_) => TypeTag::CHAR32,
        }
    }

    /// Write into `cell`, replacing its previous payload
    pub fn write(self, cell: &mut Cdt) {
        match self {
            Self::F64(v) => cell.set_f64(v),
            Self::F32(v) => cell.set_f32(v),
            Self::I8(v) => cell.set_i8(v),
            Self::I16(v) => cell.set_i16(v),
            Self::I32(v) => cell.set_i32(v),
            Self::I64(v) => cell.set_i64(v),
            Self::U8(v) => cell.set_u8(v),
            Self::U16(v) => cell.set_u16(v),
            Self::U32(v) => cell.set_u32(v),
            Self::U64(v) => cell.set_u64(v),
            Self::Size(v) => cell.set_size(v),
            Self::Bool(v) => cell.set_bool(v),
            Self::Char8(v) => cell.set_char8(v),
            Self::Char16(v) => cell.set_char16(v),
            Self::Char32(v) => cell.set_char32(v),
        }
    }

    /// Read a scalar cell; `None` for non-scalar tags or invalid chars
    pub fn read(cell: &Cdt) -> Option<Self> {
        Some(match cell.tag() {
            TypeTag::FLOAT64 => Self::F64(cell.as_f64()?),
            TypeTag::FLOAT32 => Self::F32(cell.as_f32()?),
            TypeTag::INT8 => Self::I8(cell.as_i8()?),
            TypeTag::INT16 => Self::I16(cell.as_i16()?),
            TypeTag::INT32 => Self::I32(cell.as_i32()?),
            TypeTag::INT64 => Self::I64(cell.as_i64()?),
            TypeTag::UINT8 => Self::U8(cell.as_u8()?),
            TypeTag::UINT16 => Self::U16(cell.as_u16()?),
            TypeTag::UINT32 => Self::U32(cell.as_u32()?),
            TypeTag::UINT64 => Self::U64(cell.as_u64()?),
            TypeTag::SIZE => Self::Size(cell.as_size()?),
            TypeTag::BOOL => Self::Bool(cell.as_bool()?),
            TypeTag::CHAR8 => Self::Char8(cell.as_char()?),
            TypeTag::CHAR16 => Self::Char16(cell.as_char()?),
            TypeTag::CHAR32 => Self::Char32(cell.as_char()?),
            _ => return None,
        })
    }
}

/// Shape of an array position as reported by a construct source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayMetadata {
    pub length: u64,
    /// Uniform 1-D: no element may itself be an array
    pub is_1d: bool,
    /// Shared leaf element tag, or `ANY`
    pub common_type: TypeTag,
    /// Source fills every cell itself through [`ConstructSource::construct_array`]
    pub manual: bool,
}

/// Shape of an array cell handed to a traverse sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayShape {
    pub length: u64,
    pub fixed_dimensions: i64,
    /// Tag shared by every cell, or `ANY`
    pub common_type: TypeTag,
    /// Native type shared by sampled local handles
    pub common_native: Option<TypeId>,
}

/// What a source offers for a handle-typed position
#[derive(Debug, Clone)]
pub enum HandleSource {
    /// Forward an existing wire record unchanged
    Record(CdtHandle),
    /// Forward a handle owned by another runtime
    Foreign(ForeignHandle),
    /// Mint a new handle in the local table
    Local(Object),
}

/// Decoded handle
#[derive(Debug, Clone, PartialEq)]
pub enum HandleValue {
    Local(Object),
    Foreign(ForeignHandle),
}

/// Native value provider for the construction engine
///
/// One method per native value category; the engine decides which to call
/// from the resolved tag.
pub trait ConstructSource {
    /// Inspect the value at `path` (declared type absent or `any`)
    fn type_info(&mut self, path: &[u64]) -> Result<TypeInfo>;

    fn array_metadata(&mut self, path: &[u64], declared: &TypeInfo) -> Result<ArrayMetadata>;

    /// Value at `path` converted to the scalar kind `tag`
    fn scalar(&mut self, path: &[u64], tag: TypeTag) -> Result<Scalar>;

    fn string(&mut self, path: &[u64], tag: TypeTag) -> Result<String>;

    fn handle(&mut self, path: &[u64]) -> Result<HandleSource>;

    fn callable(&mut self, path: &[u64]) -> Result<Callable>;

    /// Fill `array` in one step; called only for arrays whose metadata is
    /// marked `manual`
    ///
    /// `array` already holds `length` null cells. The source sets its
    /// `fixed_dimensions` unless the array is 1-D.
    fn construct_array(&mut self, path: &[u64], array: &mut Cdts) -> Result<()> {
        let _ = array;
        Err(MarshalError::BulkArrayUnsupported {
            path: format_path(path),
        }
        .into())
    }
}

/// Native value consumer for the traversal engine
pub trait TraverseSink {
    fn on_null(&mut self, path: &[u64]) -> Result<()>;

    fn on_scalar(&mut self, path: &[u64], value: Scalar) -> Result<()>;

    fn on_string(&mut self, path: &[u64], tag: TypeTag, value: String) -> Result<()>;

    fn on_handle(&mut self, path: &[u64], value: HandleValue) -> Result<()>;

    fn on_callable(&mut self, path: &[u64], value: Callable) -> Result<()>;

    /// Allocate the native container
    ///
    /// Returning `true` visits the children depth-first; `false` means the
    /// sink consumed `array` itself and its children are skipped.
    fn on_array(&mut self, path: &[u64], shape: &ArrayShape, array: &Cdts) -> Result<bool>;

    /// Native element type expected for handle arrays at `path`
    fn expected_handle_type(&self, _path: &[u64]) -> Option<TypeId> {
        None
    }
}
