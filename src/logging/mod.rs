//! Logging infrastructure - structured tracing throughout the engine
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels per module
//! - Zero-cost when disabled
//! - Span-based performance tracking
//! - Console or daily-rotated file output

use std::io;
use std::path::Path;

use once_cell::sync::OnceCell;
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub use tracing::{debug, error, info, trace, warn};

use crate::cdt::TypeTag;

/// Global logging state; holds the file writer guard when logging to a file
static LOGGER_INITIALIZED: OnceCell<Option<WorkerGuard>> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Log file path; console when `None`
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
    /// Enable performance tracking
    pub track_performance: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: cfg!(debug_assertions),
        }
    }
}

/// Parse a level name, falling back to INFO
pub fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // XLLR_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("XLLR_LOG_LEVEL") {
            config.level = parse_level(&level_str);
        }

        // XLLR_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("XLLR_LOG_FILE") {
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("XLLR_LOG_JSON").is_ok();
        config.show_spans = std::env::var("XLLR_LOG_SPANS").is_ok();

        if let Ok(val) = std::env::var("XLLR_LOG_PERF") {
            config.track_performance = val == "1" || val.to_lowercase() == "true";
        }

        config
    }

    /// Minimal logging for hot call paths
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: false,
        }
    }

    /// Verbose logging to `xllr.log`
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            log_path: Some("xllr.log".to_string()),
            json_format: false,
            show_spans: true,
            track_performance: true,
        }
    }
}

/// Initialize logging with default configuration
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Only the first call installs a subscriber. If the host process already
/// installed one, ours is silently skipped.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_env("XLLR_LOG").unwrap_or_else(|_| {
            EnvFilter::new(format!("xllr={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let (writer, guard) = match config.log_path.as_deref() {
            Some(path) => {
                let path = Path::new(path);
                let directory = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let prefix = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "xllr.log".to_string());
                let (w, g) = tracing_appender::non_blocking(rolling::daily(directory, prefix));
                (w, Some(g))
            }
            None => {
                let (w, g) = tracing_appender::non_blocking(io::stderr());
                (w, Some(g))
            }
        };

        let layer = if config.json_format {
            fmt::layer()
                .with_writer(writer)
                .json()
                .with_span_events(span_events)
                .with_target(true)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(writer)
                .with_span_events(span_events)
                .with_target(true)
                .with_thread_ids(cfg!(debug_assertions))
                .with_line_number(cfg!(debug_assertions))
                .boxed()
        };

        match tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
        {
            Ok(()) => guard,
            Err(_) => None,
        }
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Engine-specific logging functions
// ============================================================================

/// Log runtime plugin load
pub fn log_plugin_loaded(name: &str, origin: &str) {
    info!(
        target: "xllr::plugin",
        event = "plugin_loaded",
        plugin = name,
        origin = origin,
        "Runtime plugin loaded"
    );
}

/// Log runtime plugin release
pub fn log_plugin_freed(name: &str) {
    info!(
        target: "xllr::plugin",
        event = "plugin_freed",
        plugin = name,
        "Runtime plugin freed"
    );
}

/// Log entity resolution
pub fn log_entity_loaded(plugin: &str, module: &str, entity: &str) {
    debug!(
        target: "xllr::plugin",
        event = "entity_loaded",
        plugin = plugin,
        module = module,
        entity = entity,
        "Entity resolved"
    );
}

/// Log a cross-runtime call
#[inline]
pub fn log_xcall(shape: &str, params: usize, retvals: usize) {
    trace!(
        target: "xllr::xcall",
        event = "xcall",
        shape = shape,
        params = params,
        retvals = retvals,
        "Cross-runtime call"
    );
}

/// Log an error raised through the error channel
pub fn log_xcall_error(shape: &str, error: &str) {
    debug!(
        target: "xllr::xcall",
        event = "xcall_error",
        shape = shape,
        error = error,
        "Cross-runtime call failed"
    );
}

/// Log a panic caught at a dispatcher
pub fn log_xcall_panic(message: &str) {
    error!(
        target: "xllr::xcall",
        event = "xcall_panic",
        panic = message,
        "Panic caught at cross-runtime boundary"
    );
}

#[inline]
pub fn log_handle_registered(id: u64, type_name: &str) {
    trace!(
        target: "xllr::handles",
        event = "handle_registered",
        handle = id,
        object_type = type_name,
        "Object registered"
    );
}

#[inline]
pub fn log_handle_released(id: u64) {
    trace!(
        target: "xllr::handles",
        event = "handle_released",
        handle = id,
        "Object released"
    );
}

/// Log a failed release (unknown or already released handle)
pub fn log_handle_error(id: u64, error: &str) {
    warn!(
        target: "xllr::handles",
        event = "handle_error",
        handle = id,
        error = error,
        "Handle release failed"
    );
}

/// Log a marshaling failure
pub fn log_marshal_error(direction: &str, tag: TypeTag, error: &str) {
    debug!(
        target: "xllr::marshal",
        event = "marshal_error",
        direction = direction,
        tag = %tag,
        error = error,
        "Marshaling failed"
    );
}

/// Log engine initialization
pub fn log_engine_init(home: Option<&Path>) {
    info!(
        event = "engine_init",
        home = ?home,
        "xllr initializing"
    );
}

/// Log engine shutdown
pub fn log_engine_shutdown(plugins: usize) {
    info!(
        event = "engine_shutdown",
        plugins = plugins,
        "xllr shutting down"
    );
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            let elapsed = self.start.elapsed();
            debug!(
                target: "xllr::perf",
                operation = self.operation,
                duration_us = elapsed.as_micros() as u64,
                "operation completed"
            );
        }
    }
}
