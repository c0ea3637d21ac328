//! Configuration module.
//!
//! Layered configuration:
//! - Default values
//! - TOML configuration file (`.vigil/settings.toml`, searched upwards from the
//!   current directory)
//! - Environment variable overrides
//! - CLI argument overrides (applied by the binary)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `VIGIL_` and use double
//! underscores to separate nested levels:
//! - `VIGIL_WATCH__POLL_INTERVAL_MS=100` sets `watch.poll_interval_ms`
//! - `VIGIL_WATCH__STRATEGY=interval` sets `watch.strategy`
//! - `VIGIL_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::watcher::WatchError;

const CONFIG_DIR: &str = ".vigil";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "VIGIL_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Watch loop settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How watch loops wait for the kernel.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PollStrategyKind {
    /// Blocking wait bounded by `poll_interval_ms`
    #[default]
    Blocking,
    /// Non-blocking poll, then sleep `poll_interval_ms` when idle
    Interval,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Directory whose entries are watched when no paths are given
    #[serde(default = "default_root")]
    pub root: PathBuf,

    #[serde(default)]
    pub strategy: PollStrategyKind,

    /// Wait timeout (blocking) or idle delay (interval)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on events fetched per wait
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Also report attribute changes
    #[serde(default)]
    pub include_attributes: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `port = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_root() -> PathBuf {
    PathBuf::from("./test")
}
fn default_poll_interval_ms() -> u64 {
    250
}
fn default_max_events() -> usize {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            strategy: PollStrategyKind::default(),
            poll_interval_ms: default_poll_interval_ms(),
            max_events: default_max_events(),
            include_attributes: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nesting; single underscores stay in field names
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
            .extract()
            .map_err(Box::new)
    }

    /// Find `.vigil/settings.toml` in the current directory or an ancestor
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(CONFIG_FILE));
            }
        }

        None
    }

    /// Reject values the watch loops cannot run with
    pub fn validate(&self) -> Result<(), WatchError> {
        if self.watch.poll_interval_ms == 0 {
            return Err(WatchError::ConfigError {
                reason: "watch.poll_interval_ms must be greater than zero".to_string(),
            });
        }
        if self.watch.max_events == 0 {
            return Err(WatchError::ConfigError {
                reason: "watch.max_events must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file under the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);
        Self::init_config_at(&config_path, force)?;
        Ok(config_path)
    }

    /// Write default settings to `path` unless it exists and `force` is false
    pub fn init_config_at(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
        if !force && path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }
        Settings::default().save(path)
    }
}
