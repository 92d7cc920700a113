//! Error types shared by every layer of the engine
//!
//! Internally everything returns `Result<_, XllrError>`. Errors are only
//! flattened into C strings at the ABI boundary (see `ffi::write_error`).

use core::fmt;

use crate::cdt::TypeTag;

/// Render an index path as `[0][2]`, or `<root>` for the empty path.
pub fn format_path(path: &[u64]) -> String {
    if path.is_empty() {
        return "<root>".to_string();
    }
    path.iter().map(|i| format!("[{}]", i)).collect()
}

/// Violations detected while moving values across the wire representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// A value's type was still `any` after inspection
    UnresolvedAny { path: String },
    /// Tag outside the known set
    UnknownType { tag: u64, path: String },
    /// Array cell whose nested array pointer is null
    NullArray { path: String },
    /// Callable cell whose record or xcall pointer is null
    NullCallable { path: String },
    /// Element of a declared 1-D array is itself an array
    NestedArrayIn1D { path: String },
    /// Native value cannot be represented as the requested tag
    TypeMismatch { path: String, expected: String, found: String },
    /// Numeric value does not fit the requested width
    OutOfRange { path: String, target: TypeTag },
    /// String contains an interior NUL and cannot be NUL-terminated
    InteriorNul { path: String },
    /// Invalid character encoding in a char cell
    InvalidChar { path: String },
    /// Invalid string encoding in a string cell
    InvalidString { path: String, tag: TypeTag },
    /// Signature has more entries than the `i8` wire count can carry
    SignatureTooLong { len: usize },
    /// Array marked for bulk filling by a source that cannot fill it
    BulkArrayUnsupported { path: String },
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedAny { path } => {
                write!(f, "type of value at {} is still 'any' after inspection", path)
            }
            Self::UnknownType { tag, path } => {
                write!(f, "unknown type tag {} at {}", tag, path)
            }
            Self::NullArray { path } => write!(f, "Array value is null at {}", path),
            Self::NullCallable { path } => write!(f, "Callable value is null at {}", path),
            Self::NestedArrayIn1D { path } => {
                write!(f, "1D array cannot contain another array (at {})", path)
            }
            Self::TypeMismatch { path, expected, found } => write!(
                f,
                "cannot marshal {} as {} at {}",
                found, expected, path
            ),
            Self::OutOfRange { path, target } => {
                write!(f, "value at {} does not fit in {}", path, target)
            }
            Self::InteriorNul { path } => {
                write!(f, "string at {} contains an interior NUL", path)
            }
            Self::InvalidChar { path } => write!(f, "invalid character encoding at {}", path),
            Self::InvalidString { path, tag } => {
                write!(f, "invalid {} encoding at {}", tag, path)
            }
            Self::SignatureTooLong { len } => write!(
                f,
                "signature has {} entries, at most {} are supported",
                len,
                i8::MAX
            ),
            Self::BulkArrayUnsupported { path } => {
                write!(f, "array at {} is marked for bulk filling but the source cannot fill it", path)
            }
        }
    }
}

impl std::error::Error for MarshalError {}

/// Handle table failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleError {
    /// No live object registered under this id
    NotFound(u64),
    /// A foreign handle was released twice
    AlreadyReleased,
    /// A foreign handle carries no release callback
    NoReleaser { runtime_id: u64 },
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "Handle {} not found in objects table", id),
            Self::AlreadyReleased => write!(f, "Foreign handle already released"),
            Self::NoReleaser { runtime_id } => write!(
                f,
                "Foreign handle of runtime {} has no release function",
                runtime_id
            ),
        }
    }
}

impl std::error::Error for HandleError {}

/// Top-level engine error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XllrError {
    /// `XLLR_HOME` is not set and no home was configured
    HomeNotSet,
    /// Plugin library file does not exist
    PluginNotFound { name: String, path: String },
    /// Plugin library exists but could not be loaded or initialized
    PluginLoad { name: String, reason: String },
    /// Operation on a plugin that was never loaded (or already freed)
    PluginNotLoaded(String),
    /// Plugin does not export a required symbol
    SymbolMissing { plugin: String, symbol: String },
    EntityNotFound { module: String, entity: String },
    /// Plugin reported an error while resolving an entity
    EntityResolution { plugin: String, module: String, entity: String, reason: String },
    SignatureMismatch { entity: String, expected: String, found: String },
    InvalidEntityPath(String),
    /// Error reported through the out-of-band error channel
    Invocation(String),
    ArgCountMismatch { expected: usize, got: usize },
    ThreadAffinity { entity: String },
    Marshal(MarshalError),
    Handle(HandleError),
    Allocation(String),
    Config(String),
}

impl fmt::Display for XllrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HomeNotSet => write!(f, "XLLR_HOME is not set"),
            Self::PluginNotFound { name, path } => {
                write!(f, "Runtime plugin '{}' not found at {}", name, path)
            }
            Self::PluginLoad { name, reason } => {
                write!(f, "Failed to load runtime plugin '{}': {}", name, reason)
            }
            Self::PluginNotLoaded(name) => write!(f, "Runtime plugin '{}' is not loaded", name),
            Self::SymbolMissing { plugin, symbol } => {
                write!(f, "Runtime plugin '{}' does not export '{}'", plugin, symbol)
            }
            Self::EntityNotFound { module, entity } => {
                write!(f, "Entity '{}' not found in module '{}'", entity, module)
            }
            Self::EntityResolution { plugin, module, entity, reason } => write!(
                f,
                "Runtime plugin '{}' failed to resolve '{}' in module '{}': {}",
                plugin, entity, module, reason
            ),
            Self::SignatureMismatch { entity, expected, found } => write!(
                f,
                "Signature mismatch for '{}': expected {}, requested {}",
                entity, expected, found
            ),
            Self::InvalidEntityPath(msg) => write!(f, "Invalid entity path: {}", msg),
            Self::Invocation(msg) => write!(f, "{}", msg),
            Self::ArgCountMismatch { expected, got } => write!(
                f,
                "Argument count mismatch: expected {}, got {}",
                expected, got
            ),
            Self::ThreadAffinity { entity } => write!(
                f,
                "Entity '{}' must be invoked on the thread that loaded it",
                entity
            ),
            Self::Marshal(err) => write!(f, "{}", err),
            Self::Handle(err) => write!(f, "{}", err),
            Self::Allocation(msg) => write!(f, "Allocation failed: {}", msg),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for XllrError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Marshal(err) => Some(err),
            Self::Handle(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MarshalError> for XllrError {
    fn from(err: MarshalError) -> Self {
        Self::Marshal(err)
    }
}

impl From<HandleError> for XllrError {
    fn from(err: HandleError) -> Self {
        Self::Handle(err)
    }
}

pub type Result<T, E = XllrError> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_path() {
        assert_eq!(format_path(&[]), "<root>");
        assert_eq!(format_path(&[0, 2]), "[0][2]");
    }

    #[test]
    fn test_messages_are_descriptive() {
        let err = XllrError::from(MarshalError::NestedArrayIn1D { path: "[1]".into() });
        assert!(err.to_string().contains("1D array cannot contain another array"));

        let err = XllrError::from(HandleError::NotFound(7));
        assert_eq!(err.to_string(), "Handle 7 not found in objects table");
        assert!(std::error::Error::source(&err).is_some());

        let err = XllrError::PluginNotFound {
            name: "go".into(),
            path: "/opt/xllr/xllr.go.so".into(),
        };
        assert!(err.to_string().contains("xllr.go.so"));
    }
}
