//! Value Array → native

use core::any::TypeId;

use super::{handle_type_samples, ArrayShape, HandleValue, IndexPath, Scalar, TraverseSink};
use crate::callable;
use crate::cdt::{Cdt, Cdts, TypeTag};
use crate::error::{format_path, MarshalError, Result};
use crate::handles::{resolve_local, ForeignHandle, RUST_RUNTIME_ID};
use crate::logging::log_marshal_error;

/// Feed every top-level cell of `cdts` to `sink`
pub fn traverse_cdts<T: TraverseSink>(cdts: &Cdts, sink: &mut T) -> Result<()> {
    let mut path = IndexPath::new();
    for i in 0..cdts.length {
        path.push(i);
        traverse_cdt(cdts.cell_at(i), sink, &mut path)?;
        path.pop();
    }
    Ok(())
}

/// Decode `cell` (and its nested arrays, depth-first) into `sink`
pub fn traverse_cdt<T: TraverseSink>(cell: &Cdt, sink: &mut T, path: &mut IndexPath) -> Result<()> {
    let result = traverse_inner(cell, sink, path);
    if let Err(err) = &result {
        log_marshal_error("traverse", cell.tag(), &err.to_string());
    }
    result
}

fn traverse_inner<T: TraverseSink>(cell: &Cdt, sink: &mut T, path: &mut IndexPath) -> Result<()> {
    let tag = cell.tag();
    if tag.is_any() {
        return Err(MarshalError::UnresolvedAny {
            path: format_path(path),
        }
        .into());
    }

    if tag.is_array() {
        let array = cell.as_array().ok_or_else(|| MarshalError::NullArray {
            path: format_path(path),
        })?;
        let common_type = common_element_type(array);
        let common_native = if common_type == TypeTag::HANDLE {
            sink.expected_handle_type(path)
                .or_else(|| sample_handle_types(array, handle_type_samples()))
        } else {
            None
        };
        let shape = ArrayShape {
            length: array.length,
            fixed_dimensions: array.fixed_dimensions,
            common_type,
            common_native,
        };
        if !sink.on_array(path, &shape, array)? {
            return Ok(());
        }

        for i in 0..array.length {
            path.push(i);
            traverse_inner(array.cell_at(i), sink, path)?;
            path.pop();
        }
        return Ok(());
    }

    match tag {
        TypeTag::NULL => sink.on_null(path),
        _ if tag.is_scalar() => {
            let value = Scalar::read(cell).ok_or_else(|| MarshalError::InvalidChar {
                path: format_path(path),
            })?;
            sink.on_scalar(path, value)
        }
        TypeTag::STRING8 | TypeTag::STRING16 | TypeTag::STRING32 => {
            let value = cell.as_string().ok_or_else(|| MarshalError::InvalidString {
                path: format_path(path),
                tag,
            })?;
            sink.on_string(path, tag, value)
        }
        TypeTag::HANDLE => match cell.as_handle() {
            None => sink.on_null(path),
            Some(record) if record.handle.is_null() => sink.on_null(path),
            Some(record) if record.runtime_id == RUST_RUNTIME_ID => {
                let object = resolve_local(record)?;
                sink.on_handle(path, HandleValue::Local(object))
            }
            Some(record) => sink.on_handle(path, HandleValue::Foreign(ForeignHandle::new(*record))),
        },
        TypeTag::CALLABLE => {
            let record = cell.as_callable().ok_or_else(|| MarshalError::NullCallable {
                path: format_path(path),
            })?;
            let function = unsafe { callable::from_record(record) }.ok_or_else(|| {
                MarshalError::NullCallable {
                    path: format_path(path),
                }
            })?;
            sink.on_callable(path, function)
        }
        _ => Err(MarshalError::UnknownType {
            tag: tag.bits(),
            path: format_path(path),
        }
        .into()),
    }
}

/// Tag shared by every cell, `ANY` when they disagree or the array is empty
pub fn common_element_type(array: &Cdts) -> TypeTag {
    let mut cells = array.cells().iter().map(Cdt::tag);
    match cells.next() {
        Some(first) if cells.all(|tag| tag == first) => first,
        _ => TypeTag::ANY,
    }
}

/// Native type shared by the first `samples` local handles, in index order
///
/// Degrades to `None` on the first mismatch, foreign handle or dangling id.
pub fn sample_handle_types(array: &Cdts, samples: usize) -> Option<TypeId> {
    let mut common = None;
    for cell in array.cells().iter().take(samples) {
        let record = cell.as_handle()?;
        if record.runtime_id != RUST_RUNTIME_ID {
            return None;
        }
        let type_id = resolve_local(record).ok()?.value_type_id();
        match common {
            None => common = Some(type_id),
            Some(found) if found == type_id => {}
            Some(_) => return None,
        }
    }
    common
}
