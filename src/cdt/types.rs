//! Type tags and signature descriptors
//!
//! Tag values are a wire contract shared with every other runtime plugin.

use core::ffi::c_char;
use core::fmt;
use core::str::FromStr;
use std::ffi::{CStr, CString};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MarshalError, Result, XllrError};

/// Dimension sentinel: ragged, mixed or not known
pub const MIXED_OR_UNKNOWN_DIMENSIONS: i64 = -1;

/// Wire type tag: one base kind bit, optionally OR'ed with `ARRAY`
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeTag(pub u64);

impl TypeTag {
    pub const FLOAT64: Self = Self(1);
    pub const FLOAT32: Self = Self(2);
    pub const INT8: Self = Self(4);
    pub const INT16: Self = Self(8);
    pub const INT32: Self = Self(16);
    pub const INT64: Self = Self(32);
    pub const UINT8: Self = Self(64);
    pub const UINT16: Self = Self(128);
    pub const UINT32: Self = Self(256);
    pub const UINT64: Self = Self(512);
    pub const BOOL: Self = Self(1024);
    pub const STRING8: Self = Self(4096);
    pub const STRING16: Self = Self(8192);
    pub const STRING32: Self = Self(16384);
    pub const HANDLE: Self = Self(32768);
    pub const ARRAY: Self = Self(65536);
    pub const SIZE: Self = Self(262144);
    pub const CHAR8: Self = Self(524288);
    pub const CHAR16: Self = Self(1048576);
    pub const CHAR32: Self = Self(2097152);
    pub const ANY: Self = Self(4194304);
    pub const NULL: Self = Self(8388608);
    pub const CALLABLE: Self = Self(16777216);

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_array(self) -> bool {
        self.0 & Self::ARRAY.0 != 0
    }

    /// Tag with the array bit cleared
    #[inline]
    pub const fn base(self) -> Self {
        Self(self.0 & !Self::ARRAY.0)
    }

    #[inline]
    pub const fn with_array(self) -> Self {
        Self(self.0 | Self::ARRAY.0)
    }

    /// Exactly `any`; an `any` array is a resolved array of unknown elements
    #[inline]
    pub const fn is_any(self) -> bool {
        self.0 == Self::ANY.0
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::FLOAT64
                | Self::FLOAT32
                | Self::INT8
                | Self::INT16
                | Self::INT32
                | Self::INT64
                | Self::UINT8
                | Self::UINT16
                | Self::UINT32
                | Self::UINT64
                | Self::SIZE
        )
    }

    pub fn is_string(self) -> bool {
        matches!(self, Self::STRING8 | Self::STRING16 | Self::STRING32)
    }

    pub fn is_char(self) -> bool {
        matches!(self, Self::CHAR8 | Self::CHAR16 | Self::CHAR32)
    }

    /// Base kinds carried inline in the cell payload
    pub fn is_scalar(self) -> bool {
        self.is_numeric() || self.is_char() || self == Self::BOOL
    }

    /// Whether the base kind is one this engine understands
    pub fn is_known(self) -> bool {
        let base = self.base();
        (self.is_array() && base.0 == 0) || base.name().is_some()
    }

    /// Name of the base kind
    pub fn name(self) -> Option<&'static str> {
        BASE_NAMES
            .iter()
            .find(|(tag, _)| *tag == self.base())
            .map(|(_, name)| *name)
    }
}

const BASE_NAMES: &[(TypeTag, &str)] = &[
    (TypeTag::FLOAT64, "float64"),
    (TypeTag::FLOAT32, "float32"),
    (TypeTag::INT8, "int8"),
    (TypeTag::INT16, "int16"),
    (TypeTag::INT32, "int32"),
    (TypeTag::INT64, "int64"),
    (TypeTag::UINT8, "uint8"),
    (TypeTag::UINT16, "uint16"),
    (TypeTag::UINT32, "uint32"),
    (TypeTag::UINT64, "uint64"),
    (TypeTag::BOOL, "bool"),
    (TypeTag::STRING8, "string8"),
    (TypeTag::STRING16, "string16"),
    (TypeTag::STRING32, "string32"),
    (TypeTag::HANDLE, "handle"),
    (TypeTag::SIZE, "size"),
    (TypeTag::CHAR8, "char8"),
    (TypeTag::CHAR16, "char16"),
    (TypeTag::CHAR32, "char32"),
    (TypeTag::ANY, "any"),
    (TypeTag::NULL, "null"),
    (TypeTag::CALLABLE, "callable"),
];

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.name(), self.is_array()) {
            (Some(name), true) => write!(f, "{}_array", name),
            (Some(name), false) => write!(f, "{}", name),
            (None, true) if self.base().0 == 0 => write!(f, "array"),
            _ => write!(f, "unknown({})", self.0),
        }
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self)
    }
}

impl FromStr for TypeTag {
    type Err = XllrError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s == "array" {
            return Ok(Self::ARRAY);
        }
        let (base, array) = match s.strip_suffix("_array") {
            Some(base) => (base, true),
            None => (s.as_str(), false),
        };
        let base = match base {
            "string" => Self::STRING8,
            "float" => Self::FLOAT64,
            "int" => Self::INT64,
            other => BASE_NAMES
                .iter()
                .find(|(_, name)| *name == other)
                .map(|(tag, _)| *tag)
                .ok_or_else(|| XllrError::Config(format!("unknown type name '{}'", s)))?,
        };
        Ok(if array { base.with_array() } else { base })
    }
}

impl Serialize for TypeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypeTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bits(u64),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bits(bits) => Ok(TypeTag(bits)),
            Repr::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Declared type of one parameter or return value
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeInfo {
    #[serde(rename = "type")]
    pub tag: TypeTag,
    /// Language-specific name; metadata only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub dimensions: i64,
}

impl TypeInfo {
    pub fn new(tag: TypeTag) -> Self {
        Self {
            tag,
            alias: None,
            dimensions: 0,
        }
    }

    pub fn any() -> Self {
        Self::new(TypeTag::ANY)
    }

    /// `dimensions`-deep array of `base`
    pub fn array(base: TypeTag, dimensions: i64) -> Self {
        Self {
            tag: base.with_array(),
            alias: None,
            dimensions,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_dimensions(mut self, dimensions: i64) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Declared as `any` (or absent)
    pub fn is_any(&self) -> bool {
        self.tag.is_any()
    }

    /// Tag and dimensions agree; the alias is ignored
    pub fn signature_matches(&self, other: &TypeInfo) -> bool {
        self.tag == other.tag && self.dimensions == other.dimensions
    }
}

impl From<TypeTag> for TypeInfo {
    fn from(tag: TypeTag) -> Self {
        Self::new(tag)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag)?;
        if self.dimensions != 0 {
            write!(f, "[{}]", self.dimensions)?;
        }
        if let Some(alias) = &self.alias {
            write!(f, " ({})", alias)?;
        }
        Ok(())
    }
}

/// Positional signature equality
pub fn signatures_match(expected: &[TypeInfo], requested: &[TypeInfo]) -> bool {
    expected.len() == requested.len()
        && expected
            .iter()
            .zip(requested)
            .all(|(a, b)| a.signature_matches(b))
}

pub fn format_signature(types: &[TypeInfo]) -> String {
    let parts: Vec<String> = types.iter().map(|t| t.to_string()).collect();
    format!("({})", parts.join(", "))
}

/// Parse a `[{"type": "int64_array", "dimensions": 2}, ...]` descriptor list
pub fn signature_from_json(json: &str) -> Result<Vec<TypeInfo>> {
    serde_json::from_str(json)
        .map_err(|e| XllrError::Config(format!("invalid signature descriptor: {}", e)))
}

/// Signature length as the `i8` count carried on the wire
pub fn signature_count(len: usize) -> core::result::Result<i8, MarshalError> {
    i8::try_from(len).map_err(|_| MarshalError::SignatureTooLong { len })
}

/// C mirror of [`TypeInfo`]
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CTypeInfo {
    pub type_: u64,
    pub alias: *mut c_char,
    pub is_free_alias: u8,
    pub fixed_dimensions: i64,
}

impl CTypeInfo {
    /// # Safety
    /// `alias` must be null or a valid NUL-terminated string.
    pub unsafe fn to_type_info(&self) -> TypeInfo {
        let tag = TypeTag(self.type_);
        let alias = if self.alias.is_null() {
            None
        } else {
            Some(CStr::from_ptr(self.alias).to_string_lossy().into_owned())
        };
        // Scalars are commonly declared with the sentinel
        let dimensions = if !tag.is_array() && self.fixed_dimensions < 0 {
            0
        } else {
            self.fixed_dimensions
        };
        TypeInfo {
            tag,
            alias,
            dimensions,
        }
    }
}

/// Read `count` descriptors from a C array
///
/// # Safety
/// `ptr` must point to `count` valid [`CTypeInfo`] entries when `count > 0`.
pub unsafe fn type_infos_from_raw(ptr: *const CTypeInfo, count: i8) -> Vec<TypeInfo> {
    if ptr.is_null() || count <= 0 {
        return Vec::new();
    }
    core::slice::from_raw_parts(ptr, count as usize)
        .iter()
        .map(|t| t.to_type_info())
        .collect()
}

/// Owned C descriptor array (keeps alias strings alive)
pub struct CTypeInfoArray {
    entries: Vec<CTypeInfo>,
    count: i8,
    _aliases: Vec<CString>,
}

impl CTypeInfoArray {
    pub fn new(types: &[TypeInfo]) -> core::result::Result<Self, MarshalError> {
        let count = signature_count(types.len())?;
        let mut aliases = Vec::new();
        let entries = types
            .iter()
            .map(|t| {
                let alias = match t.alias.as_deref().and_then(|a| CString::new(a).ok()) {
                    Some(alias) => {
                        let ptr = alias.as_ptr() as *mut c_char;
                        aliases.push(alias);
                        ptr
                    }
                    None => core::ptr::null_mut(),
                };
                CTypeInfo {
                    type_: t.tag.bits(),
                    alias,
                    is_free_alias: 0,
                    fixed_dimensions: t.dimensions,
                }
            })
            .collect();
        Ok(Self {
            entries,
            count,
            _aliases: aliases,
        })
    }

    pub fn as_mut_ptr(&mut self) -> *mut CTypeInfo {
        if self.entries.is_empty() {
            core::ptr::null_mut()
        } else {
            self.entries.as_mut_ptr()
        }
    }

    pub fn len(&self) -> i8 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
