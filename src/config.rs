//! Engine configuration (`xllr.toml`)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, XllrError};
use crate::logging::{parse_level, LogConfig};

/// Environment variable locating the engine home
pub const HOME_ENV: &str = "XLLR_HOME";

/// Configuration file name looked up under the home directory
pub const CONFIG_FILE: &str = "xllr.toml";

#[cfg(target_os = "windows")]
pub const DYLIB_EXTENSION: &str = "dll";
#[cfg(target_os = "macos")]
pub const DYLIB_EXTENSION: &str = "dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const DYLIB_EXTENSION: &str = "so";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XllrConfig {
    /// Directory holding the runtime plugins
    #[serde(default)]
    pub home: Option<PathBuf>,

    #[serde(default = "default_plugin_prefix")]
    pub plugin_prefix: String,

    /// Cells per thread in the call buffer cache
    #[serde(default = "default_cache_size")]
    pub cdt_cache_size: usize,

    #[serde(default = "default_handle_samples")]
    pub handle_type_samples: usize,

    /// Plugins loaded by `Xllr::init`
    #[serde(default)]
    pub preload: Vec<String>,

    /// Runtime flags set by `Xllr::init`
    #[serde(default)]
    pub flags: Vec<String>,

    /// Plugins whose entities are bound to the resolving thread
    #[serde(default)]
    pub thread_affinity: Vec<String>,

    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogSection {
    #[serde(default)]
    pub level: Option<String>,

    #[serde(default)]
    pub file: Option<String>,

    #[serde(default)]
    pub json: bool,
}

impl Default for XllrConfig {
    fn default() -> Self {
        Self {
            home: None,
            plugin_prefix: default_plugin_prefix(),
            cdt_cache_size: default_cache_size(),
            handle_type_samples: default_handle_samples(),
            preload: Vec::new(),
            flags: Vec::new(),
            thread_affinity: Vec::new(),
            log: LogSection::default(),
        }
    }
}

fn default_plugin_prefix() -> String { "xllr.".to_string() }
fn default_cache_size() -> usize { 100 }
fn default_handle_samples() -> usize { 3 }

impl XllrConfig {
    /// Load from `$XLLR_HOME/xllr.toml` when present, else defaults
    ///
    /// `XLLR_HOME` always overrides `home`.
    pub fn from_env() -> Result<Self> {
        let env_home = std::env::var_os(HOME_ENV).map(PathBuf::from);
        let mut config = match &env_home {
            Some(home) if home.join(CONFIG_FILE).is_file() => Self::load(&home.join(CONFIG_FILE))?,
            _ => Self::default(),
        };
        if env_home.is_some() {
            config.home = env_home;
        }
        Ok(config)
    }

    /// Load from an explicit file; `XLLR_HOME` still overrides `home`
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| XllrError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let mut config = Self::parse(&content)?;
        if let Some(home) = std::env::var_os(HOME_ENV) {
            config.home = Some(PathBuf::from(home));
        }
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| XllrError::Config(format!("failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| XllrError::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(path, content)
            .map_err(|e| XllrError::Config(format!("failed to write {}: {}", path.display(), e)))
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// File name of a plugin, e.g. `xllr.python3.so`
    pub fn plugin_file_name(&self, name: &str) -> String {
        format!("{}{}.{}", self.plugin_prefix, name, DYLIB_EXTENSION)
    }

    /// Conventional location of plugin `name`
    pub fn plugin_path(&self, name: &str) -> Result<PathBuf> {
        let home = self.home.as_ref().ok_or(XllrError::HomeNotSet)?;
        Ok(home.join(self.plugin_file_name(name)))
    }

    pub fn requires_thread_affinity(&self, plugin: &str) -> bool {
        self.thread_affinity.iter().any(|p| p == plugin)
    }

    /// Logging settings, starting from the environment
    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::from_env();
        if let Some(level) = &self.log.level {
            config.level = parse_level(level);
        }
        if self.log.file.is_some() {
            config.log_path = self.log.file.clone();
        }
        config.json_format |= self.log.json;
        config
    }
}
