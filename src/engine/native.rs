//! Engine adapters over the `Value` model

use smallvec::SmallVec;

use super::{
    ArrayMetadata, ArrayShape, ConstructSource, HandleSource, HandleValue, IndexPath, Scalar,
    TraverseSink,
};
use crate::callable::Callable;
use crate::cdt::{CdtHandle, Cdts, TypeInfo, TypeTag};
use crate::error::{format_path, MarshalError, Result};
use crate::handles::{Object, RUST_RUNTIME_ID};
use crate::value::{ArrayProfile, Value};

/// Construct source over top-level `values` with their declared types
///
/// Elements of a declared array inherit the declared base kind when their
/// own kind is compatible, so `int32[]` stays int32 all the way down.
pub struct ValueSource<'a> {
    values: &'a [Value],
    declared: &'a [TypeInfo],
}

impl<'a> ValueSource<'a> {
    pub fn new(values: &'a [Value], declared: &'a [TypeInfo]) -> Self {
        Self { values, declared }
    }

    fn value_at(&self, path: &[u64]) -> Result<&'a Value> {
        let mut indices = path.iter();
        let first = indices.next().copied().unwrap_or(0) as usize;
        let mut current = self.values.get(first).ok_or_else(|| missing(path))?;
        for &i in indices {
            current = match current {
                Value::Array(items) => items.get(i as usize).ok_or_else(|| missing(path))?,
                _ => return Err(missing(path)),
            };
        }
        Ok(current)
    }

    /// Declared base kind of the top-level position owning `path`
    fn declared_base(&self, path: &[u64]) -> Option<TypeTag> {
        let info = self.declared.get(*path.first()? as usize)?;
        let base = info.tag.base();
        (info.tag.is_array() || info.dimensions > 0)
            .then_some(base)
            .filter(|b| b.bits() != 0 && !b.is_any())
    }

    fn coerce(&self, path: &[u64], inspected: TypeTag) -> TypeTag {
        if path.len() < 2 {
            return inspected;
        }
        match self.declared_base(path) {
            Some(declared) if compatible(declared, inspected.base()) => {
                if inspected.is_array() {
                    declared.with_array()
                } else {
                    declared
                }
            }
            _ => inspected,
        }
    }
}

fn compatible(declared: TypeTag, inspected: TypeTag) -> bool {
    (declared.is_numeric() && inspected.is_numeric())
        || (declared.is_string() && inspected.is_string())
        || (declared.is_char() && inspected.is_char())
}

fn missing(path: &[u64]) -> crate::error::XllrError {
    MarshalError::TypeMismatch {
        path: format_path(path),
        expected: "value".into(),
        found: "nothing".into(),
    }
    .into()
}

fn mismatch(path: &[u64], expected: TypeTag, found: &Value) -> crate::error::XllrError {
    MarshalError::TypeMismatch {
        path: format_path(path),
        expected: expected.to_string(),
        found: found.type_tag().to_string(),
    }
    .into()
}

macro_rules! narrow {
    ($value:expr, $path:expr, $tag:expr, $variant:ident, $ty:ty) => {{
        let wide = $value.as_integer().ok_or_else(|| mismatch($path, $tag, $value))?;
        let narrowed = <$ty>::try_from(wide).map_err(|_| MarshalError::OutOfRange {
            path: format_path($path),
            target: $tag,
        })?;
        Scalar::$variant(narrowed)
    }};
}

impl ConstructSource for ValueSource<'_> {
    fn type_info(&mut self, path: &[u64]) -> Result<TypeInfo> {
        let mut info = self.value_at(path)?.type_info();
        info.tag = self.coerce(path, info.tag);
        Ok(info)
    }

    fn array_metadata(&mut self, path: &[u64], declared: &TypeInfo) -> Result<ArrayMetadata> {
        let value = self.value_at(path)?;
        let items = value
            .as_array()
            .ok_or_else(|| mismatch(path, declared.tag, value))?;
        let profile = ArrayProfile::of(items);
        let is_1d = match declared.dimensions {
            1 => true,
            d if d > 1 => false,
            _ => items.iter().all(|item| item.as_array().is_none()),
        };
        let common_type = match self.declared_base(path).filter(|_| path.len() == 1) {
            Some(base) => base,
            None => self.coerce(path, profile.leaf_tag()).base(),
        };
        Ok(ArrayMetadata {
            length: items.len() as u64,
            is_1d,
            common_type,
            manual: false,
        })
    }

    fn scalar(&mut self, path: &[u64], tag: TypeTag) -> Result<Scalar> {
        let value = self.value_at(path)?;
        Ok(match tag {
            TypeTag::INT8 => narrow!(value, path, tag, I8, i8),
            TypeTag::INT16 => narrow!(value, path, tag, I16, i16),
            TypeTag::INT32 => narrow!(value, path, tag, I32, i32),
            TypeTag::INT64 => narrow!(value, path, tag, I64, i64),
            TypeTag::UINT8 => narrow!(value, path, tag, U8, u8),
            TypeTag::UINT16 => narrow!(value, path, tag, U16, u16),
            TypeTag::UINT32 => narrow!(value, path, tag, U32, u32),
            TypeTag::UINT64 => narrow!(value, path, tag, U64, u64),
            TypeTag::SIZE => narrow!(value, path, tag, Size, u64),
            TypeTag::FLOAT64 => {
                Scalar::F64(value.as_float().ok_or_else(|| mismatch(path, tag, value))?)
            }
            TypeTag::FLOAT32 => match value {
                Value::F32(v) => Scalar::F32(*v),
                other => Scalar::F32(
                    other.as_float().ok_or_else(|| mismatch(path, tag, value))? as f32,
                ),
            },
            TypeTag::BOOL => Scalar::Bool(value.as_bool().ok_or_else(|| mismatch(path, tag, value))?),
            TypeTag::CHAR8 | TypeTag::CHAR16 | TypeTag::CHAR32 => {
                let ch = value.as_char().ok_or_else(|| mismatch(path, tag, value))?;
                match tag {
                    TypeTag::CHAR8 => Scalar::Char8(ch),
                    TypeTag::CHAR16 => Scalar::Char16(ch),
                    _ => Scalar::Char32(ch),
                }
            }
            _ => return Err(mismatch(path, tag, value)),
        })
    }

    fn string(&mut self, path: &[u64], tag: TypeTag) -> Result<String> {
        let value = self.value_at(path)?;
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| mismatch(path, tag, value))
    }

    fn handle(&mut self, path: &[u64]) -> Result<HandleSource> {
        Ok(match self.value_at(path)? {
            Value::Object(object) => HandleSource::Local(object.clone()),
            Value::Foreign(foreign) => HandleSource::Foreign(foreign.clone()),
            Value::Null => HandleSource::Record(CdtHandle {
                handle: core::ptr::null_mut(),
                runtime_id: RUST_RUNTIME_ID,
                release: None,
            }),
            // Anything else crosses as an opaque Rust object
            other => HandleSource::Local(Object::new(other.clone())),
        })
    }

    fn callable(&mut self, path: &[u64]) -> Result<Callable> {
        let value = self.value_at(path)?;
        value
            .as_callable()
            .cloned()
            .ok_or_else(|| mismatch(path, TypeTag::CALLABLE, value))
    }
}

/// Traverse sink that rebuilds `Value`s into top-level slots
pub struct ValueBuilder {
    slots: Vec<Value>,
    shapes: Vec<(IndexPath, ArrayShape)>,
}

impl ValueBuilder {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: vec![Value::Null; slots],
            shapes: Vec::new(),
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        self.slots
    }

    /// Array shape reported at `path` during traversal
    pub fn shape(&self, path: &[u64]) -> Option<&ArrayShape> {
        self.shapes
            .iter()
            .find(|(p, _)| p.as_slice() == path)
            .map(|(_, shape)| shape)
    }

    fn slot(&mut self, path: &[u64]) -> Result<&mut Value> {
        let mut indices = path.iter();
        let first = indices.next().copied().unwrap_or(0) as usize;
        if first >= self.slots.len() {
            self.slots.resize(first + 1, Value::Null);
        }
        let mut current = &mut self.slots[first];
        for &i in indices {
            current = match current {
                Value::Array(items) => items.get_mut(i as usize).ok_or_else(|| missing(path))?,
                _ => return Err(missing(path)),
            };
        }
        Ok(current)
    }

    fn put(&mut self, path: &[u64], value: Value) -> Result<()> {
        *self.slot(path)? = value;
        Ok(())
    }
}

impl TraverseSink for ValueBuilder {
    fn on_null(&mut self, path: &[u64]) -> Result<()> {
        self.put(path, Value::Null)
    }

    fn on_scalar(&mut self, path: &[u64], value: Scalar) -> Result<()> {
        let value = match value {
            Scalar::F64(v) => Value::F64(v),
            Scalar::F32(v) => Value::F32(v),
            Scalar::I8(v) => Value::I8(v),
            Scalar::I16(v) => Value::I16(v),
            Scalar::I32(v) => Value::I32(v),
            Scalar::I64(v) => Value::I64(v),
            Scalar::U8(v) => Value::U8(v),
            Scalar::U16(v) => Value::U16(v),
            Scalar::U32(v) => Value::U32(v),
            Scalar::U64(v) => Value::U64(v),
            Scalar::Size(v) => Value::Size(v),
            Scalar::Bool(v) => Value::Bool(v),
            Scalar::Char8(v) => Value::Char8(v),
            Scalar::Char16(v) => Value::Char16(v),
            Scalar::Char32(v) => Value::Char32(v),
        };
        self.put(path, value)
    }

    fn on_string(&mut self, path: &[u64], tag: TypeTag, value: String) -> Result<()> {
        let value = match tag {
            TypeTag::STRING16 => Value::String16(value),
            TypeTag::STRING32 => Value::String32(value),
            _ => Value::String8(value),
        };
        self.put(path, value)
    }

    fn on_handle(&mut self, path: &[u64], value: HandleValue) -> Result<()> {
        let value = match value {
            HandleValue::Local(object) => Value::Object(object),
            HandleValue::Foreign(foreign) => Value::Foreign(foreign),
        };
        self.put(path, value)
    }

    fn on_callable(&mut self, path: &[u64], value: Callable) -> Result<()> {
        self.put(path, Value::Callable(value))
    }

    fn on_array(&mut self, path: &[u64], shape: &ArrayShape, _array: &Cdts) -> Result<bool> {
        self.shapes.push((SmallVec::from_slice(path), *shape));
        self.put(path, Value::Array(vec![Value::Null; shape.length as usize]))?;
        Ok(true)
    }
}
