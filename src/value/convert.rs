//! Rust ↔ `Value` conversions

use super::Value;
use crate::callable::Callable;
use crate::cdt::TypeTag;
use crate::error::MarshalError;
use crate::handles::{ForeignHandle, Object};

macro_rules! from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

from_primitive! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    char => Char32,
    String => String8,
    Object => Object,
    ForeignHandle => Foreign,
    Callable => Callable,
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Size(v as u64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String8(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Extraction of a concrete Rust type from a `Value`
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, MarshalError>;
}

fn mismatch(expected: &str, found: &Value) -> MarshalError {
    MarshalError::TypeMismatch {
        path: "<value>".to_string(),
        expected: expected.to_string(),
        found: found.type_tag().to_string(),
    }
}

macro_rules! integer_from_value {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, MarshalError> {
                    let wide = value
                        .as_integer()
                        .ok_or_else(|| mismatch(stringify!($ty), &value))?;
                    <$ty>::try_from(wide).map_err(|_| MarshalError::OutOfRange {
                        path: "<value>".to_string(),
                        target: TypeTag::$tag,
                    })
                }
            }
        )*
    };
}

integer_from_value! {
    i8 => INT8,
    i16 => INT16,
    i32 => INT32,
    i64 => INT64,
    u8 => UINT8,
    u16 => UINT16,
    u32 => UINT32,
    u64 => UINT64,
    usize => SIZE,
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, MarshalError> {
        value.as_float().ok_or_else(|| mismatch("f64", &value))
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, MarshalError> {
        value
            .as_float()
            .map(|v| v as f32)
            .ok_or_else(|| mismatch("f32", &value))
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, MarshalError> {
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }
}

impl FromValue for char {
    fn from_value(value: Value) -> Result<Self, MarshalError> {
        value.as_char().ok_or_else(|| mismatch("char", &value))
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, MarshalError> {
        match value {
            Value::String8(s) | Value::String16(s) | Value::String32(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl FromValue for Object {
    fn from_value(value: Value) -> Result<Self, MarshalError> {
        match value {
            Value::Object(o) => Ok(o),
            other => Err(mismatch("object", &other)),
        }
    }
}

impl FromValue for Callable {
    fn from_value(value: Value) -> Result<Self, MarshalError> {
        match value {
            Value::Callable(c) => Ok(c),
            other => Err(mismatch("callable", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, MarshalError> {
        match value {
            Value::Array(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch("array", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, MarshalError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl Value {
    /// Convert into a concrete Rust type
    pub fn into_native<T: FromValue>(self) -> Result<T, MarshalError> {
        T::from_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_and_back() {
        let v: Value = vec![vec![1i64, 2], vec![3]].into();
        let back: Vec<Vec<i64>> = v.into_native().unwrap();
        assert_eq!(back, vec![vec![1, 2], vec![3]]);

        assert_eq!(Value::from("x").into_native::<String>().unwrap(), "x");
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn test_narrowing_is_checked() {
        assert_eq!(Value::I64(200).into_native::<u8>().unwrap(), 200);
        assert!(matches!(
            Value::I64(300).into_native::<u8>(),
            Err(MarshalError::OutOfRange { .. })
        ));
        assert!(matches!(
            Value::from("1").into_native::<i32>(),
            Err(MarshalError::TypeMismatch { .. })
        ));
    }
}
