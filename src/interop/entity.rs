//! Resolved entities

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use super::buffer::CallBuffer;
use super::registry::LoadedPlugin;
use super::xcall::{CallShape, XCallInvoker};
use crate::cdt::{TypeInfo, XCall};
use crate::error::{Result, XllrError};
use crate::logging::warn;
use crate::value::Value;

/// Entity resolved by a runtime plugin and bound to its signature
///
/// The xcall is released through the owning plugin when the handle is
/// freed or dropped.
pub struct EntityHandle {
    plugin: Arc<LoadedPlugin>,
    module_path: String,
    entity_path: String,
    xcall: *mut XCall,
    invoker: XCallInvoker,
    owner: Option<ThreadId>,
}

// Safety: thread-affine entities check the calling thread before invoking
unsafe impl Send for EntityHandle {}
unsafe impl Sync for EntityHandle {}

impl EntityHandle {
    /// # Safety
    /// `xcall` must be a live, non-null xcall returned by `plugin`.
    pub(crate) unsafe fn new(
        plugin: Arc<LoadedPlugin>,
        module_path: &str,
        entity_path: &str,
        xcall: *mut XCall,
        params: Vec<TypeInfo>,
        retvals: Vec<TypeInfo>,
    ) -> Self {
        let owner = plugin
            .plugin()
            .requires_thread_affinity()
            .then(|| thread::current().id());
        plugin.live_entities.fetch_add(1, Ordering::AcqRel);
        Self {
            invoker: XCallInvoker::new(*xcall, params, retvals),
            plugin,
            module_path: module_path.to_string(),
            entity_path: entity_path.to_string(),
            xcall,
            owner,
        }
    }

    pub fn plugin_name(&self) -> &str {
        self.plugin.plugin().name()
    }

    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    pub fn entity_path(&self) -> &str {
        &self.entity_path
    }

    pub fn params(&self) -> &[TypeInfo] {
        self.invoker.params()
    }

    pub fn retvals(&self) -> &[TypeInfo] {
        self.invoker.retvals()
    }

    pub fn shape(&self) -> CallShape {
        self.invoker.shape()
    }

    pub fn xcall(&self) -> *mut XCall {
        self.xcall
    }

    /// Thread the entity is bound to, for thread-affine plugins
    pub fn owner_thread(&self) -> Option<ThreadId> {
        self.owner
    }

    fn check_thread(&self) -> Result<()> {
        match self.owner {
            Some(owner) if owner != thread::current().id() => Err(XllrError::ThreadAffinity {
                entity: self.entity_path.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Marshal `args`, invoke, and return the unmarshaled results
    pub fn call(&self, args: Vec<Value>) -> Result<Vec<Value>> {
        self.check_thread()?;
        self.invoker.invoke(args)
    }

    /// Buffer pair sized for this entity
    pub fn buffer(&self) -> CallBuffer {
        self.invoker.buffer()
    }

    /// Invoke with a caller-populated buffer
    pub fn invoke(&self, buffer: &mut CallBuffer) -> Result<()> {
        self.check_thread()?;
        self.invoker.invoke_raw(buffer)
    }

    /// Release the entity through its plugin
    pub fn free(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.xcall.is_null() {
            return Ok(());
        }
        let xcall = core::mem::replace(&mut self.xcall, core::ptr::null_mut());
        self.plugin.live_entities.fetch_sub(1, Ordering::AcqRel);
        self.plugin.plugin().free_xcall(xcall)
    }
}

impl Drop for EntityHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(
                target: "xllr::plugin",
                entity = %self.entity_path,
                error = %e,
                "Failed to free entity"
            );
        }
    }
}

impl core::fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EntityHandle")
            .field("plugin", &self.plugin_name())
            .field("module_path", &self.module_path)
            .field("entity_path", &self.entity_path)
            .field("shape", &self.shape())
            .finish()
    }
}
