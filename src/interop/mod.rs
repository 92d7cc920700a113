//! Invocation protocol - plugins, entities and xcalls
//!
//! Design: Every cross-runtime call goes through an xcall pair invoked in
//! one of four fixed shapes over a parameter/return value buffer pair.
//!
//! Architecture:
//! - `xcall.rs` - call shapes and xcall invocation
//! - `buffer.rs` - buffer pair allocation and ownership
//! - `pin.rs` - thread pinning for a round trip
//! - `path.rs` - entity path parsing
//! - `library.rs` - shared library loading (dlopen/LoadLibrary)
//! - `plugin.rs` - `RuntimePlugin` trait and shared-library plugins
//! - `local.rs` - in-process Rust runtime
//! - `entity.rs` - resolved entity handles
//! - `registry.rs` - plugin registry and engine

mod buffer;
mod entity;
mod library;
mod local;
mod path;
mod pin;
mod plugin;
mod registry;
mod xcall;

use core::sync::atomic::{AtomicUsize, Ordering};

pub use buffer::{alloc_cdts_buffer, free_cdts_buffer, CallBuffer};
pub use entity::EntityHandle;
pub use library::{Library, LoadError, SymbolError};
pub use local::{local_runtime, LocalRuntime, LOCAL_RUNTIME_NAME};
pub use path::{expand_env, expand_env_with, EntityPath};
pub use pin::{is_pinned, pin_depth, ThreadPin};
pub use plugin::{DylibPlugin, RuntimePlugin};
pub use registry::{xllr, LoadedPlugin, Xllr};
pub use xcall::{call_dispatcher, invoke_xcall, take_error, CallShape, XCallInvoker};

static CALLS_MADE: AtomicUsize = AtomicUsize::new(0);
static CALL_ERRORS: AtomicUsize = AtomicUsize::new(0);
static PLUGINS_LOADED: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn record_call(failed: bool) {
    CALLS_MADE.fetch_add(1, Ordering::Relaxed);
    if failed {
        CALL_ERRORS.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) fn record_plugin_loaded() {
    PLUGINS_LOADED.fetch_add(1, Ordering::Relaxed);
}

/// Process-wide invocation counters
pub fn stats() -> InteropStats {
    InteropStats {
        calls_made: CALLS_MADE.load(Ordering::Relaxed),
        call_errors: CALL_ERRORS.load(Ordering::Relaxed),
        plugins_loaded: PLUGINS_LOADED.load(Ordering::Relaxed),
    }
}

/// Interop statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteropStats {
    pub calls_made: usize,
    pub call_errors: usize,
    pub plugins_loaded: usize,
}

#[cfg(test)]
mod tests;
