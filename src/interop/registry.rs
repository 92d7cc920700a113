//! Runtime plugin registry and entity resolution
//!
//! Plugins are loaded on first use and stay loaded until freed. The
//! in-process Rust runtime is always available as plugin `rust`; other
//! names are resolved to `$XLLR_HOME/xllr.<name>.<ext>`.

use core::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::entity::EntityHandle;
use super::local::{local_runtime, LOCAL_RUNTIME_NAME};
use super::plugin::{DylibPlugin, RuntimePlugin};
use crate::cdt::{self, TypeInfo, XCall};
use crate::config::XllrConfig;
use crate::engine;
use crate::error::{Result, XllrError};
use crate::logging::{info, log_engine_init, log_engine_shutdown, log_plugin_freed, log_plugin_loaded, warn};

/// A started plugin and the number of entities resolved through it
pub struct LoadedPlugin {
    plugin: Arc<dyn RuntimePlugin>,
    pub(crate) live_entities: AtomicUsize,
}

impl LoadedPlugin {
    fn new(plugin: Arc<dyn RuntimePlugin>) -> Self {
        Self {
            plugin,
            live_entities: AtomicUsize::new(0),
        }
    }

    pub fn plugin(&self) -> &dyn RuntimePlugin {
        self.plugin.as_ref()
    }

    pub fn live_entities(&self) -> usize {
        self.live_entities.load(Ordering::Acquire)
    }
}

impl core::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("name", &self.plugin.name())
            .field("live_entities", &self.live_entities())
            .finish()
    }
}

static XLLR: Lazy<Xllr> = Lazy::new(|| {
    let config = XllrConfig::from_env().unwrap_or_else(|e| {
        warn!(target: "xllr::plugin", error = %e, "Ignoring invalid configuration");
        XllrConfig::default()
    });
    Xllr::new(config)
});

/// Process-wide engine used by the C ABI
pub fn xllr() -> &'static Xllr {
    &XLLR
}

pub struct Xllr {
    config: RwLock<XllrConfig>,
    plugins: DashMap<String, Arc<LoadedPlugin>>,
    builtins: DashMap<String, Arc<dyn RuntimePlugin>>,
    flags: DashSet<String>,
}

impl Xllr {
    pub fn new(config: XllrConfig) -> Self {
        let builtins: DashMap<String, Arc<dyn RuntimePlugin>> = DashMap::new();
        builtins.insert(
            LOCAL_RUNTIME_NAME.to_string(),
            local_runtime().clone() as Arc<dyn RuntimePlugin>,
        );
        Self {
            config: RwLock::new(config),
            plugins: DashMap::new(),
            builtins,
            flags: DashSet::new(),
        }
    }

    pub fn config(&self) -> XllrConfig {
        self.config.read().clone()
    }

    /// Apply `config`: cache sizes, flags and preloaded plugins
    pub fn init(&self, config: XllrConfig) -> Result<()> {
        log_engine_init(config.home.as_deref());
        cdt::alloc::set_cache_capacity(config.cdt_cache_size);
        engine::set_handle_type_samples(config.handle_type_samples);
        for flag in &config.flags {
            self.set_runtime_flag(flag);
        }
        let preload = config.preload.clone();
        *self.config.write() = config;
        for name in &preload {
            self.load_runtime_plugin(name)?;
        }
        Ok(())
    }

    /// Make `plugin` loadable under its name without a shared library
    pub fn register_builtin(&self, plugin: Arc<dyn RuntimePlugin>) {
        self.builtins.insert(plugin.name().to_string(), plugin);
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn loaded_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn open_plugin(&self, name: &str) -> Result<(Arc<dyn RuntimePlugin>, String)> {
        if let Some(builtin) = self.builtins.get(name) {
            return Ok((builtin.value().clone(), "builtin".to_string()));
        }
        let config = self.config.read();
        let path = config.plugin_path(name)?;
        if !path.is_file() {
            return Err(XllrError::PluginNotFound {
                name: name.to_string(),
                path: path.display().to_string(),
            });
        }
        let plugin = DylibPlugin::open(name, &path)?.with_thread_affinity(config.requires_thread_affinity(name));
        Ok((Arc::new(plugin), path.display().to_string()))
    }

    /// Locate, map and start plugin `name`; loading twice is a no-op
    pub fn load_runtime_plugin(&self, name: &str) -> Result<Arc<LoadedPlugin>> {
        if let Some(loaded) = self.plugins.get(name) {
            return Ok(loaded.value().clone());
        }

        let (plugin, origin) = self.open_plugin(name)?;
        plugin.load_runtime()?;
        let loaded = Arc::new(LoadedPlugin::new(plugin));

        // Loads race outside the map lock; the loser stops its copy
        let winner = self
            .plugins
            .entry(name.to_string())
            .or_insert_with(|| loaded.clone())
            .value()
            .clone();
        if Arc::ptr_eq(&winner, &loaded) {
            super::record_plugin_loaded();
            log_plugin_loaded(name, &origin);
        } else if !Arc::ptr_eq(&winner.plugin, &loaded.plugin) {
            loaded.plugin().free_runtime()?;
        }
        Ok(winner)
    }

    /// Stop and unregister plugin `name`
    pub fn free_runtime_plugin(&self, name: &str) -> Result<()> {
        let (_, loaded) = self
            .plugins
            .remove(name)
            .ok_or_else(|| XllrError::PluginNotLoaded(name.to_string()))?;
        let live = loaded.live_entities();
        if live > 0 {
            warn!(
                target: "xllr::plugin",
                plugin = name,
                live_entities = live,
                "Freeing runtime plugin with live entities"
            );
        }
        loaded.plugin().free_runtime()?;
        log_plugin_freed(name);
        Ok(())
    }

    /// Resolve an entity, loading its plugin if needed
    pub fn load_entity(
        &self,
        plugin: &str,
        module_path: &str,
        entity_path: &str,
        params: &[TypeInfo],
        retvals: &[TypeInfo],
    ) -> Result<EntityHandle> {
        let loaded = self.load_runtime_plugin(plugin)?;
        let xcall = loaded.plugin().load_entity(module_path, entity_path, params, retvals)?;
        if xcall.is_null() {
            return Err(XllrError::EntityNotFound {
                module: module_path.to_string(),
                entity: entity_path.to_string(),
            });
        }
        Ok(unsafe {
            EntityHandle::new(
                loaded,
                module_path,
                entity_path,
                xcall,
                params.to_vec(),
                retvals.to_vec(),
            )
        })
    }

    /// Release an entity; equivalent to [`EntityHandle::free`]
    pub fn free_entity(&self, entity: EntityHandle) -> Result<()> {
        entity.free()
    }

    /// Resolve an entity and hand its xcall to the caller
    pub fn load_entity_raw(
        &self,
        plugin: &str,
        module_path: &str,
        entity_path: &str,
        params: &[TypeInfo],
        retvals: &[TypeInfo],
    ) -> Result<*mut XCall> {
        let loaded = self.load_runtime_plugin(plugin)?;
        let xcall = loaded.plugin().load_entity(module_path, entity_path, params, retvals)?;
        if xcall.is_null() {
            return Err(XllrError::EntityNotFound {
                module: module_path.to_string(),
                entity: entity_path.to_string(),
            });
        }
        loaded.live_entities.fetch_add(1, Ordering::AcqRel);
        Ok(xcall)
    }

    /// Wrap a runtime-specific function context as an xcall, loading the
    /// plugin if needed
    ///
    /// Release the xcall with [`Xllr::free_xcall_raw`].
    pub fn make_callable(
        &self,
        plugin: &str,
        context: *mut c_void,
        params: &[TypeInfo],
        retvals: &[TypeInfo],
    ) -> Result<*mut XCall> {
        let loaded = self.load_runtime_plugin(plugin)?;
        let xcall = loaded.plugin().make_callable(context, params, retvals)?;
        loaded.live_entities.fetch_add(1, Ordering::AcqRel);
        Ok(xcall)
    }

    /// Release an xcall from [`Xllr::load_entity_raw`] or [`Xllr::make_callable`]
    pub fn free_xcall_raw(&self, plugin: &str, xcall: *mut XCall) -> Result<()> {
        let loaded = self
            .plugins
            .get(plugin)
            .map(|e| e.value().clone())
            .ok_or_else(|| XllrError::PluginNotLoaded(plugin.to_string()))?;
        loaded.plugin().free_xcall(xcall)?;
        let _ = loaded
            .live_entities
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        Ok(())
    }

    pub fn set_runtime_flag(&self, flag: &str) {
        self.flags.insert(flag.to_string());
    }

    pub fn is_runtime_flag_set(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// Free every loaded plugin; errors are logged and the rest still freed
    pub fn shutdown(&self) {
        let names = self.loaded_plugins();
        log_engine_shutdown(names.len());
        for name in names {
            if let Err(e) = self.free_runtime_plugin(&name) {
                warn!(target: "xllr::plugin", plugin = %name, error = %e, "Failed to free runtime plugin");
            }
        }
        info!(target: "xllr::plugin", "Engine shut down");
    }
}

impl Default for Xllr {
    fn default() -> Self {
        Self::new(XllrConfig::default())
    }
}
