//! Engine configuration (~/.config/Nethercore/script.toml)
//!
//! Settings are stored in TOML format in the platform-specific config directory.
//! Every field has a default, so partial or empty files are valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EngineError;

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "script.toml";

/// Default execution budget between two activity refreshes (10 seconds)
pub const DEFAULT_TIMEOUT_NS: i64 = 10_000_000_000;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Script execution settings
    #[serde(default)]
    pub script: ScriptConfig,
    /// Debugger timing settings
    #[serde(default)]
    pub debug: DebugConfig,
}

/// Script execution configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Target update rate of the script loop in Hz (default: 60)
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Execution budget in nanoseconds, -1 disables it (default: 10s)
    #[serde(default = "default_timeout_ns")]
    pub timeout_ns: i64,
    /// Run scripts on a dedicated thread (default: true)
    #[serde(default = "default_true")]
    pub threaded: bool,
    /// Extension stripped from module names (default: "lua")
    #[serde(default = "default_script_extension")]
    pub script_extension: String,
}

/// Debugger timing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Upper bound between wake-up checks while paused (default: 16ms)
    #[serde(default = "default_wait_interval_ms")]
    pub wait_interval_ms: u64,
    /// Upper bound between wake-up checks while blocked in sync (default: 1ms)
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    /// Delay before the script thread starts executing (default: 16ms)
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
}

fn default_frame_rate() -> u32 {
    60
}
fn default_timeout_ns() -> i64 {
    DEFAULT_TIMEOUT_NS
}
fn default_true() -> bool {
    true
}
fn default_script_extension() -> String {
    "lua".to_string()
}

fn default_wait_interval_ms() -> u64 {
    16
}
fn default_sync_interval_ms() -> u64 {
    1
}
fn default_startup_delay_ms() -> u64 {
    16
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            timeout_ns: default_timeout_ns(),
            threaded: default_true(),
            script_extension: default_script_extension(),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            wait_interval_ms: default_wait_interval_ms(),
            sync_interval_ms: default_sync_interval_ms(),
            startup_delay_ms: default_startup_delay_ms(),
        }
    }
}

impl ScriptConfig {
    /// Duration of one script frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1) as f64)
    }
}

impl DebugConfig {
    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms.max(1))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

/// Returns the platform-specific configuration directory.
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.nethercore", "", "Nethercore")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads the configuration from the platform config directory.
///
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> EngineConfig {
    match config_dir() {
        Some(dir) => load_from(&dir.join(CONFIG_FILE_NAME)).unwrap_or_else(|e| {
            warn!("Using default script config: {:#}", e);
            EngineConfig::default()
        }),
        None => EngineConfig::default(),
    }
}

/// Loads the configuration from an explicit path.
///
/// A missing file yields the defaults; a malformed file is an error.
pub fn load_from(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config = toml::from_str(&content).map_err(EngineError::from)?;
    Ok(config)
}

/// Saves the configuration to the platform config directory.
///
/// Creates the directory if it doesn't exist.
pub fn save(config: &EngineConfig) -> Result<()> {
    if let Some(dir) = config_dir() {
        save_to(config, &dir.join(CONFIG_FILE_NAME))?;
    }
    Ok(())
}

/// Saves the configuration to an explicit path.
pub fn save_to(config: &EngineConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config).map_err(EngineError::from)?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
