//! Dynamically typed Rust values crossing the runtime boundary
//!
//! `Value` is the native model the engines construct from and traverse
//! into. Local objects travel as handles into the global objects table;
//! foreign handles and callables are carried opaquely.

mod convert;

use smallvec::SmallVec;

use crate::callable::Callable;
use crate::cdt::{TypeInfo, TypeTag, MIXED_OR_UNKNOWN_DIMENSIONS};
use crate::handles::{ForeignHandle, Object};

pub use convert::FromValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Size(u64),
    F32(f32),
    F64(f64),
    Char8(char),
    Char16(char),
    Char32(char),
    String8(String),
    String16(String),
    String32(String),
    Array(Vec<Value>),
    /// Local Rust object, passed as a handle
    Object(Object),
    /// Handle owned by another runtime
    Foreign(ForeignHandle),
    Callable(Callable),
}

impl Value {
    /// Wrap any Rust value as a shareable object
    pub fn object<T: core::any::Any + Send + Sync>(value: T) -> Self {
        Self::Object(Object::new(value))
    }

    /// Resolved wire tag; arrays carry their shared leaf tag (or `ANY`)
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Null => TypeTag::NULL,
            Self::Bool(_) => TypeTag::BOOL,
            Self::I8(_) => TypeTag::INT8,
            Self::I16(_) => TypeTag::INT16,
            Self::I32(_) => TypeTag::INT32,
            Self::I64(_) => TypeTag::INT64,
            Self::U8(_) => TypeTag::UINT8,
            Self::U16(_) => TypeTag::UINT16,
            Self::U32(_) => TypeTag::UINT32,
            Self::U64(_) => TypeTag::UINT64,
            Self::Size(_) => TypeTag::SIZE,
            Self::F32(_) => TypeTag::FLOAT32,
            Self::F64(_) => TypeTag::FLOAT64,
            Self::Char8(_) => TypeTag::CHAR8,
            Self::Char16(_) => TypeTag::CHAR16,
            Self::Char32(_) => TypeTag::CHAR32,
            Self::String8(_) => TypeTag::STRING8,
            Self::String16(_) => TypeTag::STRING16,
            Self::String32(_) => TypeTag::STRING32,
            Self::Array(items) => ArrayProfile::of(items).leaf_tag().with_array(),
            Self::Object(_) | Self::Foreign(_) => TypeTag::HANDLE,
            Self::Callable(_) => TypeTag::CALLABLE,
        }
    }

    /// Inspected descriptor: tag plus rectangular depth (or the sentinel)
    pub fn type_info(&self) -> TypeInfo {
        match self {
            Self::Array(items) => {
                let profile = ArrayProfile::of(items);
                TypeInfo::array(profile.leaf_tag(), profile.dimensions())
            }
            other => TypeInfo::new(other.type_tag()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String8(s) | Self::String16(s) | Self::String32(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Any integer kind widened to `i128`
    pub fn as_integer(&self) -> Option<i128> {
        Some(match self {
            Self::I8(v) => *v as i128,
            Self::I16(v) => *v as i128,
            Self::I32(v) => *v as i128,
            Self::I64(v) => *v as i128,
            Self::U8(v) => *v as i128,
            Self::U16(v) => *v as i128,
            Self::U32(v) => *v as i128,
            Self::U64(v) | Self::Size(v) => *v as i128,
            _ => return None,
        })
    }

    /// Any numeric kind as `f64`
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::F64(v) => Some(*v),
            Self::F32(v) => Some(*v as f64),
            other => other.as_integer().map(|v| v as f64),
        }
    }

    pub fn as_char(&self) -> Option<char> {
        match self {
            Self::Char8(c) | Self::Char16(c) | Self::Char32(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Self::Callable(c) => Some(c),
            _ => None,
        }
    }

    /// Element lengths of an array of arrays, e.g. `[3, 1, 2]`
    pub fn row_lengths(&self) -> Option<Vec<usize>> {
        self.as_array()?
            .iter()
            .map(|row| row.as_array().map(<[Value]>::len))
            .collect()
    }
}

/// Lengths of the levels below an array, outermost first
type LevelLengths = SmallVec<[u64; 4]>;

/// Shared leaf tag and rectangular shape of a nested array
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ArrayProfile {
    /// `None` while no leaf has been seen
    leaf: Option<TypeTag>,
    /// `None` when ragged or mixed at any level
    below: Option<LevelLengths>,
}

impl ArrayProfile {
    pub(crate) fn of(items: &[Value]) -> Self {
        let mut leaf: Option<TypeTag> = None;
        // Outer `None` until the first item
        let mut below: Option<Option<LevelLengths>> = None;

        for item in items {
            let (item_leaf, item_levels) = match item {
                Value::Array(sub) => {
                    let profile = Self::of(sub);
                    let levels = profile.below.map(|rest| {
                        let mut levels = LevelLengths::with_capacity(rest.len() + 1);
                        levels.push(sub.len() as u64);
                        levels.extend(rest);
                        levels
                    });
                    (profile.leaf, levels)
                }
                other => (Some(other.type_tag()), Some(LevelLengths::new())),
            };

            leaf = match (leaf, item_leaf) {
                (None, l) | (l, None) => l,
                (Some(a), Some(b)) if a == b => Some(a),
                _ => Some(TypeTag::ANY),
            };
            below = match below {
                None => Some(item_levels),
                Some(found) if found == item_levels => Some(found),
                Some(_) => Some(None),
            };
        }

        Self {
            leaf,
            below: below.unwrap_or_else(|| Some(LevelLengths::new())),
        }
    }

    pub(crate) fn leaf_tag(&self) -> TypeTag {
        self.leaf.unwrap_or(TypeTag::ANY)
    }

    pub(crate) fn dimensions(&self) -> i64 {
        self.below
            .as_ref()
            .map_or(MIXED_OR_UNKNOWN_DIMENSIONS, |levels| levels.len() as i64 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Value {
        Value::Array(values.iter().copied().map(Value::I64).collect())
    }

    #[test]
    fn test_scalar_tags() {
        assert_eq!(Value::I32(1).type_tag(), TypeTag::INT32);
        assert_eq!(Value::from("s").type_tag(), TypeTag::STRING8);
        assert_eq!(Value::Null.type_tag(), TypeTag::NULL);
        assert_eq!(Value::object(5u8).type_tag(), TypeTag::HANDLE);
    }

    #[test]
    fn test_rectangular_profile() {
        let v = Value::Array(vec![ints(&[1, 2]), ints(&[3, 4])]);
        let info = v.type_info();
        assert_eq!(info.tag, TypeTag::INT64.with_array());
        assert_eq!(info.dimensions, 2);
    }

    #[test]
    fn test_ragged_below_the_first_level() {
        let v = Value::Array(vec![
            Value::Array(vec![ints(&[1, 2]), ints(&[3, 4])]),
            Value::Array(vec![ints(&[5]), ints(&[6])]),
        ]);
        assert_eq!(v.type_info().dimensions, MIXED_OR_UNKNOWN_DIMENSIONS);

        let cube = Value::Array(vec![
            Value::Array(vec![ints(&[1, 2]), ints(&[3, 4])]),
            Value::Array(vec![ints(&[5, 6]), ints(&[7, 8])]),
        ]);
        assert_eq!(cube.type_info(), TypeInfo::array(TypeTag::INT64, 3));

        let empty_rows = Value::Array(vec![ints(&[]), ints(&[])]);
        assert_eq!(empty_rows.type_info().dimensions, 2);
    }

    #[test]
    fn test_ragged_profile() {
        let v = Value::Array(vec![ints(&[1, 2, 3]), ints(&[4]), ints(&[5, 6])]);
        assert_eq!(v.type_info().dimensions, MIXED_OR_UNKNOWN_DIMENSIONS);
        assert_eq!(v.type_info().tag, TypeTag::INT64.with_array());
        assert_eq!(v.row_lengths(), Some(vec![3, 1, 2]));
    }

    #[test]
    fn test_mixed_leaves_degrade_to_any() {
        let v = Value::Array(vec![Value::I64(1), Value::from("x")]);
        assert_eq!(v.type_tag(), TypeTag::ANY.with_array());
        assert_eq!(v.type_info().dimensions, 1);

        let empty = Value::Array(vec![]);
        assert_eq!(empty.type_info(), TypeInfo::array(TypeTag::ANY, 1));
    }
}
