//! Configuration management
//!
//! This module handles loading, validation, and management of the hub
//! configuration. Configuration is stored in TOML format at
//! ~/.cpos-hub/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory, modules root
//! - **server**: Bind address and port of the local daemon
//! - **packaging**: Archive size limit, unsigned development mode, output directory
//! - **signing**: Developer key directory and trusted-key store
//! - **sync**: Drain interval, batch size, delivery timeout, retry policy
//! - **cloud**: Control-plane base URL and hub identity
//!
//! The cloud token is never part of this file. It is read from the
//! `HUB_CLOUD_TOKEN` environment variable or the OS keychain.
//!
//! # Path Expansion
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Creates the data directory and modules root if they don't exist
//!
//! # Examples
//!
//! ```no_run
//! use hub_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Modules root: {:?}", config.core.modules_dir);
//! println!("Cloud: {}", config.cloud.base_url);
//! # Ok(())
//! # }
//! ```

use sdk::errors::HubError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
///
/// Every section has defaults, so an empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core hub settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Local daemon settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Archive building
    #[serde(default)]
    pub packaging: PackagingConfig,

    /// Key locations
    #[serde(default)]
    pub signing: SigningConfig,

    /// Outbound queue
    #[serde(default)]
    pub sync: SyncConfig,

    /// Control-plane connection
    #[serde(default)]
    pub cloud: CloudConfig,
}

/// Core hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory holding `<id>` and `_<id>` module folders (supports ~ expansion)
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Packaging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagingConfig {
    /// Maximum archive size in MiB
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,

    /// Accept modules without `.signature` (development only)
    #[serde(default)]
    pub allow_unsigned: bool,

    /// Where `hub package` writes archives (supports ~ expansion)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl PackagingConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Signing key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Developer key directory, never inside a module (supports ~ expansion)
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,

    /// Directory of pinned `*.pem` public keys (supports ~ expansion)
    #[serde(default = "default_trusted_keys_dir")]
    pub trusted_keys_dir: PathBuf,
}

/// Sync queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Run the background drain worker in `hub serve`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between drain passes
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Rows claimed per drain pass
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Per-request delivery timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts before a row becomes `failed`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Upper bound for the exponential backoff delay
    #[serde(default = "default_max_backoff_minutes")]
    pub max_backoff_minutes: u64,
}

/// Control-plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Base URL that relative queue endpoints are joined to
    #[serde(default = "default_cloud_base_url")]
    pub base_url: String,

    /// Identity of this hub, sent as `X-Hub-Id` when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_id: Option<String>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.cpos-hub")
}

fn default_modules_dir() -> PathBuf {
    PathBuf::from("~/.cpos-hub/modules")
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_max_size_mb() -> u64 {
    50
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("~/.cpos-hub/dist")
}

fn default_key_dir() -> PathBuf {
    PathBuf::from("~/.cpos-hub/keys")
}

fn default_trusted_keys_dir() -> PathBuf {
    PathBuf::from("~/.cpos-hub/trusted_keys")
}

fn default_interval_secs() -> u64 {
    60
}

fn default_batch_size() -> u32 {
    20
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_max_backoff_minutes() -> u64 {
    60
}

fn default_cloud_base_url() -> String {
    "https://cloud.cpos.app/api".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            modules_dir: default_modules_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            max_size_mb: default_max_size_mb(),
            allow_unsigned: false,
            output_dir: default_output_dir(),
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            key_dir: default_key_dir(),
            trusted_keys_dir: default_trusted_keys_dir(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            max_backoff_minutes: default_max_backoff_minutes(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: default_cloud_base_url(),
            hub_id: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.cpos-hub/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, HubError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Same as [`Config::load_or_create`] for an explicit file
    pub fn load_or_create_at(path: &Path) -> Result<Self, HubError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, HubError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| HubError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| HubError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, HubError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                HubError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Serialize before processing so the file keeps the portable ~ paths
        let config = Self::default_config();
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| HubError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| HubError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.cpos-hub/config.toml)
    pub fn default_config_path() -> Result<PathBuf, HubError> {
        let home = dirs::home_dir()
            .ok_or_else(|| HubError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".cpos-hub").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            server: ServerConfig::default(),
            packaging: PackagingConfig::default(),
            signing: SigningConfig::default(),
            sync: SyncConfig::default(),
            cloud: CloudConfig::default(),
        }
    }

    /// Configuration rooted entirely under `root`, used by tests and `--data-dir` style setups
    pub fn rooted_at(root: &Path) -> Self {
        let mut config = Self::default_config();
        config.core.data_dir = root.to_path_buf();
        config.core.modules_dir = root.join("modules");
        config.packaging.output_dir = root.join("dist");
        config.signing.key_dir = root.join("keys");
        config.signing.trusted_keys_dir = root.join("trusted_keys");
        config
    }

    /// SQLite file inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("hub.db")
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates the log level, limits and cloud URL
    /// - Expands ~ in paths
    /// - Creates the data directory and modules root
    pub fn validate_and_process(&mut self) -> Result<(), HubError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(HubError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.packaging.max_size_mb == 0 {
            return Err(HubError::Config(
                "packaging.max_size_mb must be greater than 0".to_string(),
            ));
        }

        let positive = [
            ("sync.interval_secs", self.sync.interval_secs),
            ("sync.batch_size", u64::from(self.sync.batch_size)),
            ("sync.timeout_secs", self.sync.timeout_secs),
            ("sync.max_retries", u64::from(self.sync.max_retries)),
            ("sync.max_backoff_minutes", self.sync.max_backoff_minutes),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(HubError::Config(format!("{} must be greater than 0", name)));
            }
        }

        let base_url = self.cloud.base_url.as_str();
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(HubError::Config(format!(
                "cloud.base_url must start with http:// or https://, got '{}'",
                base_url
            )));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        self.core.modules_dir = expand_path(&self.core.modules_dir)?;
        self.packaging.output_dir = expand_path(&self.packaging.output_dir)?;
        self.signing.key_dir = expand_path(&self.signing.key_dir)?;
        self.signing.trusted_keys_dir = expand_path(&self.signing.trusted_keys_dir)?;

        for dir in [&self.core.data_dir, &self.core.modules_dir] {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| {
                    HubError::Config(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }

        if !self.core.modules_dir.is_dir() {
            return Err(HubError::Config(format!(
                "Modules path is not a directory: {:?}",
                self.core.modules_dir
            )));
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf, HubError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| HubError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| HubError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| HubError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
