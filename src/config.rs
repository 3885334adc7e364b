//! Configuration management for hidhostd
//!
//! Handles loading, validation, and hot-reload of JSON configuration files.
//! Configuration is stored at `~/.config/hidhostd/config.json`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::{ReconnectPolicy, DEFAULT_RECONNECT_TIMEOUT_MS};

// ============================================================================
// Constants
// ============================================================================

/// Default config directory name
const CONFIG_DIR: &str = "hidhostd";

/// Default config file name
const CONFIG_FILE: &str = "config.json";

/// Shortest accepted reconnect deadline
pub const MIN_RECONNECT_TIMEOUT_MS: u64 = 500;

/// Longest accepted reconnect deadline
pub const MAX_RECONNECT_TIMEOUT_MS: u64 = 60_000;

// ============================================================================
// Sections
// ============================================================================

/// Reconnect behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Deadline for one connect attempt in milliseconds (default: 8000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Connect to the default host when registration comes up
    #[serde(default = "default_true")]
    pub on_register: bool,
}

fn default_true() -> bool { true }
fn default_timeout_ms() -> u64 { DEFAULT_RECONNECT_TIMEOUT_MS }

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_RECONNECT_TIMEOUT_MS,
            on_register: true,
        }
    }
}

impl ReconnectConfig {
    /// Clamp the deadline into the accepted range
    pub fn validate(&mut self) {
        self.timeout_ms = self
            .timeout_ms
            .clamp(MIN_RECONNECT_TIMEOUT_MS, MAX_RECONNECT_TIMEOUT_MS);
    }

    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            on_register: self.on_register,
        }
    }
}

/// New-host adoption
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Start with host monitoring armed
    #[serde(default)]
    pub armed: bool,
}

/// Host store location
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Override for the hosts file (default: `~/.local/share/hidhostd/hosts.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// User alerts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Raise an alert when a report arrives with no foreground session
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub alerts: AlertConfig,

    /// Configuration file path (not serialized)
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Config {
    /// Get the default config directory path
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Load configuration from the default location
    ///
    /// Returns default config if file doesn't exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_config_path() {
            Some(path) => Self::load(&path),
            None => {
                tracing::warn!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from file path
    ///
    /// Returns default config if file doesn't exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let contents = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let mut config: Config =
            serde_json::from_str(&contents).map_err(ConfigError::ParseError)?;

        config.validate();
        config.config_path = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            timeout_ms = config.reconnect.timeout_ms,
            monitoring = config.monitoring.armed,
            alerts = config.alerts.enabled,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Clamp out-of-range values
    pub fn validate(&mut self) {
        let requested = self.reconnect.timeout_ms;
        self.reconnect.validate();
        if requested != self.reconnect.timeout_ms {
            tracing::warn!(
                requested,
                clamped = self.reconnect.timeout_ms,
                "Reconnect timeout out of range"
            );
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = match &self.config_path {
            Some(p) => p.clone(),
            None => Self::default_config_path()
                .ok_or_else(|| ConfigError::ValidationError("No config path".to_string()))?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }

        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::ParseError)?;
        fs::write(&path, contents).map_err(ConfigError::IoError)?;

        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Re-read the file this config was loaded from
    pub fn reload(&self) -> Result<Self, ConfigError> {
        match &self.config_path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        }
    }
}

// ============================================================================
// Shared Config (for hot-reload)
// ============================================================================

use std::sync::{Arc, PoisonError, RwLock};

/// Thread-safe shared configuration for hot-reload support
pub type SharedConfig = Arc<RwLock<Config>>;

/// Create a new shared config with defaults
pub fn new_shared_config() -> SharedConfig {
    Arc::new(RwLock::new(Config::default()))
}

/// Re-read the shared config from its file and store the result
///
/// `force_arm` keeps monitoring armed regardless of the file (the `--arm`
/// command line override). On error the shared config is left untouched.
pub fn reload_shared_config(shared: &SharedConfig, force_arm: bool) -> Result<Config, ConfigError> {
    let current = shared.read().unwrap_or_else(PoisonError::into_inner).clone();
    let mut fresh = current.reload()?;
    if force_arm {
        fresh.monitoring.armed = true;
    }
    *shared.write().unwrap_or_else(PoisonError::into_inner) = fresh.clone();
    Ok(fresh)
}

/// Create a new shared config from file (or defaults if file doesn't exist)
pub fn load_shared_config(path: Option<&Path>) -> Result<SharedConfig, ConfigError> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    Ok(Arc::new(RwLock::new(config)))
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration error type
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading/writing file
    IoError(std::io::Error),
    /// JSON parsing error
    ParseError(serde_json::Error),
    /// Validation error
    ValidationError(String),
    /// File watcher could not be set up
    WatchError(notify::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ConfigError::WatchError(e) => write!(f, "Watch error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(e) => Some(e),
            ConfigError::WatchError(e) => Some(e),
            ConfigError::ValidationError(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
