//! Handle table - keeps Rust objects alive while another runtime holds them
//!
//! Design: One table-wide `RwLock`; `register`/`release` take it exclusively,
//! `resolve` shares it. Ids are monotonic per table, start at 1 and are
//! never reused, so a stale handle can never alias a newer object.
//!
//! Foreign handles (another runtime's id) are never dereferenced here; they
//! are wrapped in [`ForeignHandle`] and released through their own callback.

use core::any::{Any, TypeId};
use core::ffi::c_void;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::cdt::CdtHandle;
use crate::error::HandleError;
use crate::logging::{log_handle_error, log_handle_registered, log_handle_released};

/// Runtime id stamped on every handle minted by this engine
pub const RUST_RUNTIME_ID: u64 = 0x5255_5354;

/// Global objects table used by the marshaling engine and the callable bridge
static OBJECTS: Lazy<HandleTable> = Lazy::new(HandleTable::new);

pub fn objects() -> &'static HandleTable {
    &OBJECTS
}

/// Type-erased shared Rust object
#[derive(Clone)]
pub struct Object {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Object {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            inner: value,
            type_name: core::any::type_name::<T>(),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Type id of the wrapped value (not of the `Arc`)
    pub fn value_type_id(&self) -> TypeId {
        (*self.inner).type_id()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object<{}>", self.type_name)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

struct TableInner {
    objects: HashMap<u64, Object>,
    next_id: u64,
}

/// Id → object map guarded by a single reader-writer lock
pub struct HandleTable {
    inner: RwLock<TableInner>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TableInner {
                objects: HashMap::with_capacity(64),
                next_id: 1,
            }),
        }
    }

    /// Store `object` under a fresh id; the same object registered twice
    /// gets two ids
    pub fn register(&self, object: Object) -> u64 {
        let type_name = object.type_name();
        let id = {
            let mut table = self.inner.write();
            let id = table.next_id;
            table.next_id += 1;
            table.objects.insert(id, object);
            id
        };
        log_handle_registered(id, type_name);
        id
    }

    pub fn resolve(&self, id: u64) -> Option<Object> {
        self.inner.read().objects.get(&id).cloned()
    }

    /// Remove the entry; the object is dropped once the last clone goes
    pub fn release(&self, id: u64) -> Result<Object, HandleError> {
        let removed = self.inner.write().objects.remove(&id);
        match removed {
            Some(object) => {
                log_handle_released(id);
                Ok(object)
            }
            None => Err(HandleError::NotFound(id)),
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.inner.read().objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Register `object` in the global table and build its wire record
pub fn local_handle(object: Object) -> CdtHandle {
    let id = objects().register(object);
    CdtHandle {
        handle: id as usize as *mut c_void,
        runtime_id: RUST_RUNTIME_ID,
        release: Some(release_local_handle),
    }
}

/// Resolve a wire record minted by [`local_handle`]
pub fn resolve_local(record: &CdtHandle) -> Result<Object, HandleError> {
    let id = record.handle as usize as u64;
    objects().resolve(id).ok_or(HandleError::NotFound(id))
}

/// Release callback for handles minted by this engine
///
/// # Safety
/// `record` must be null or point to a readable handle record.
pub unsafe extern "C" fn release_local_handle(record: *mut CdtHandle) {
    let Some(record) = record.as_ref() else {
        return;
    };
    let id = record.handle as usize as u64;
    if let Err(err) = objects().release(id) {
        log_handle_error(id, &err.to_string());
    }
}

struct ForeignInner {
    record: CdtHandle,
    released: AtomicBool,
}

// Safety: the pointer is opaque here and only handed back to its owner
unsafe impl Send for ForeignInner {}
unsafe impl Sync for ForeignInner {}

/// Opaque handle owned by another runtime
///
/// Clones share release state so the owner's callback runs at most once.
#[derive(Clone)]
pub struct ForeignHandle(Arc<ForeignInner>);

impl ForeignHandle {
    pub fn new(record: CdtHandle) -> Self {
        Self(Arc::new(ForeignInner {
            record,
            released: AtomicBool::new(false),
        }))
    }

    pub fn handle(&self) -> *mut c_void {
        self.0.record.handle
    }

    pub fn runtime_id(&self) -> u64 {
        self.0.record.runtime_id
    }

    /// Wire record to forward unchanged
    pub fn record(&self) -> CdtHandle {
        self.0.record
    }

    pub fn is_released(&self) -> bool {
        self.0.released.load(Ordering::Acquire)
    }

    /// Invoke the owner's release callback
    pub fn release(&self) -> Result<(), HandleError> {
        let release = self.0.record.release.ok_or(HandleError::NoReleaser {
            runtime_id: self.runtime_id(),
        })?;
        if self.0.released.swap(true, Ordering::AcqRel) {
            return Err(HandleError::AlreadyReleased);
        }
        let mut record = self.0.record;
        unsafe { release(&mut record) };
        Ok(())
    }
}

impl fmt::Debug for ForeignHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignHandle")
            .field("handle", &self.handle())
            .field("runtime_id", &self.runtime_id())
            .field("released", &self.is_released())
            .finish()
    }
}

impl PartialEq for ForeignHandle {
    fn eq(&self, other: &Self) -> bool {
        self.handle() == other.handle() && self.runtime_id() == other.runtime_id()
    }
}

#[cfg(test)]
mod tests;
