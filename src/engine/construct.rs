//! Native → Value Array

use smallvec::SmallVec;

use super::{ConstructSource, HandleSource, IndexPath};
use crate::callable;
use crate::cdt::{Cdt, Cdts, TypeInfo, TypeTag, MIXED_OR_UNKNOWN_DIMENSIONS};
use crate::error::{format_path, MarshalError, Result};
use crate::handles::local_handle;
use crate::logging::log_marshal_error;

/// Lengths of every level of a rectangular array, outermost first
type LevelLengths = SmallVec<[u64; 4]>;

/// Running agreement on the full shape of array elements
#[derive(Debug, Clone, PartialEq, Eq)]
enum FoundDims {
    Open,
    Common(LevelLengths),
    Ragged,
}

impl FoundDims {
    /// Fold in one element; `None` is a ragged element
    fn merge(self, levels: Option<LevelLengths>) -> Self {
        match (self, levels) {
            (_, None) | (Self::Ragged, _) => Self::Ragged,
            (Self::Open, Some(levels)) => Self::Common(levels),
            (Self::Common(found), Some(levels)) if found == levels => Self::Common(found),
            _ => Self::Ragged,
        }
    }

    fn dimensions(&self) -> i64 {
        match self {
            Self::Open => 1,
            Self::Common(levels) => levels.len() as i64 + 1,
            Self::Ragged => MIXED_OR_UNKNOWN_DIMENSIONS,
        }
    }
}

/// Per-level lengths of a constructed array, `None` when it is ragged
fn level_lengths(array: &Cdts) -> Option<LevelLengths> {
    if array.fixed_dimensions == MIXED_OR_UNKNOWN_DIMENSIONS {
        return None;
    }
    let mut levels = LevelLengths::new();
    levels.push(array.length);
    // Rectangular, so the first element at each level speaks for all
    let mut current = array;
    for _ in 1..array.fixed_dimensions {
        let Some(next) = current.cells().first().and_then(Cdt::as_array) else {
            break;
        };
        levels.push(next.length);
        current = next;
    }
    Some(levels)
}

/// Populate every cell of `cdts` from the top-level positions of `source`
///
/// Position `i` uses `declared[i]`; missing entries are inspected.
pub fn construct_cdts<S: ConstructSource>(
    cdts: &mut Cdts,
    source: &mut S,
    declared: &[TypeInfo],
) -> Result<()> {
    let mut path = IndexPath::new();
    for i in 0..cdts.length {
        path.push(i);
        construct_cdt(cdts.cell_at_mut(i), source, &mut path, declared.get(i as usize))?;
        path.pop();
    }
    Ok(())
}

/// Populate one cell (and its nested arrays) from the value at `path`
pub fn construct_cdt<S: ConstructSource>(
    cell: &mut Cdt,
    source: &mut S,
    path: &mut IndexPath,
    declared: Option<&TypeInfo>,
) -> Result<()> {
    let mut info = match declared {
        Some(info) if !info.is_any() => info.clone(),
        _ => source.type_info(path)?,
    };

    let result = construct_resolved(cell, source, path, &mut info);
    if let Err(err) = &result {
        log_marshal_error("construct", info.tag, &err.to_string());
    }
    result
}

fn construct_resolved<S: ConstructSource>(
    cell: &mut Cdt,
    source: &mut S,
    path: &mut IndexPath,
    info: &mut TypeInfo,
) -> Result<()> {
    if info.tag.is_any() {
        return Err(MarshalError::UnresolvedAny {
            path: format_path(path),
        }
        .into());
    }
    if info.dimensions > 0 {
        info.tag = info.tag.with_array();
    }
    if !info.tag.is_known() {
        return Err(MarshalError::UnknownType {
            tag: info.tag.bits(),
            path: format_path(path),
        }
        .into());
    }

    if info.tag.is_array() {
        return construct_array(cell, source, path, info);
    }

    let tag = info.tag;
    match tag {
        TypeTag::NULL => cell.set_null(),
        _ if tag.is_scalar() => {
            let scalar = source.scalar(path, tag)?;
            if scalar.tag() != tag {
                return Err(MarshalError::TypeMismatch {
                    path: format_path(path),
                    expected: tag.to_string(),
                    found: scalar.tag().to_string(),
                }
                .into());
            }
            scalar.write(cell);
        }
        TypeTag::STRING8 | TypeTag::STRING16 | TypeTag::STRING32 => {
            let value = source.string(path, tag)?;
            let written = match tag {
                TypeTag::STRING8 => cell.set_string8(&value),
                TypeTag::STRING16 => cell.set_string16(&value),
                _ => cell.set_string32(&value),
            };
            written.map_err(|_| MarshalError::InteriorNul {
                path: format_path(path),
            })?;
        }
        TypeTag::HANDLE => {
            let record = match source.handle(path)? {
                HandleSource::Record(record) => record,
                HandleSource::Foreign(foreign) => foreign.record(),
                HandleSource::Local(object) => local_handle(object),
            };
            cell.set_handle(record);
        }
        TypeTag::CALLABLE => {
            let function = source.callable(path)?;
            cell.set_callable(callable::to_record(&function)?);
        }
        _ => {
            return Err(MarshalError::UnknownType {
                tag: tag.bits(),
                path: format_path(path),
            }
            .into())
        }
    }
    Ok(())
}

fn construct_array<S: ConstructSource>(
    cell: &mut Cdt,
    source: &mut S,
    path: &mut IndexPath,
    info: &TypeInfo,
) -> Result<()> {
    let meta = source.array_metadata(path, info)?;
    let common = if meta.common_type.bits() == 0 || !meta.common_type.is_known() {
        TypeTag::ANY
    } else {
        meta.common_type.base()
    };

    // Owned by the cell from here on, so a failure below is released with
    // the enclosing buffer
    cell.set_array(Cdts::alloc(meta.length, MIXED_OR_UNKNOWN_DIMENSIONS), common);
    let Some(array) = cell.as_array_mut() else {
        return Err(MarshalError::NullArray {
            path: format_path(path),
        }
        .into());
    };

    if meta.manual {
        source.construct_array(path, array)?;
        if meta.is_1d {
            array.fixed_dimensions = 1;
        }
        return Ok(());
    }

    let mut found = FoundDims::Open;
    for i in 0..meta.length {
        path.push(i);
        let element = array.cell_at_mut(i);
        construct_cdt(element, source, path, None)?;

        let element_is_array = element.tag().is_array();
        if meta.is_1d {
            if element_is_array {
                return Err(MarshalError::NestedArrayIn1D {
                    path: format_path(path),
                }
                .into());
            }
        } else {
            found = found.merge(element.as_array().and_then(level_lengths));
        }
        path.pop();
    }

    array.fixed_dimensions = if meta.is_1d { 1 } else { found.dimensions() };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use smallvec::smallvec;

    #[test]
    fn test_found_dims_merge() {
        let first = FoundDims::Open.merge(Some(smallvec![2]));
        assert_eq!(first, FoundDims::Common(smallvec![2]));
        assert_eq!(first.dimensions(), 2);
        assert_eq!(first.clone().merge(Some(smallvec![2])), first);
        assert_eq!(first.clone().merge(Some(smallvec![2, 2])), FoundDims::Ragged);
        assert_eq!(first.merge(Some(smallvec![3])), FoundDims::Ragged);
        assert_eq!(FoundDims::Open.merge(None), FoundDims::Ragged);
        assert_eq!(FoundDims::Ragged.merge(Some(smallvec![2])).dimensions(), MIXED_OR_UNKNOWN_DIMENSIONS);
        assert_eq!(FoundDims::Open.dimensions(), 1);
    }

    #[test]
    fn test_agreement_checks_every_level() {
        let a = FoundDims::Open.merge(Some(smallvec![2, 2]));
        assert_eq!(a.dimensions(), 3);
        assert_eq!(a.merge(Some(smallvec![2, 1])), FoundDims::Ragged);
    }
}
