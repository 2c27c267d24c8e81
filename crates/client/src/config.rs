//! Configuration management for the FileDeck client.
//!
//! TOML configuration loading, plus saving for `filedeck config init`.
//! The default configuration path is `~/.config/filedeck/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("base_url must be an absolute http:// or https:// URL, got {0}")]
    InvalidBaseUrl(String),

    #[error("request_timeout_secs must be between 1 and 3600, got {0}")]
    InvalidRequestTimeout(u64),

    #[error("connect_timeout_secs must be between 1 and 300, got {0}")]
    InvalidConnectTimeout(u64),

    #[error("max_concurrent_uploads must be between 1 and 32, got {0}")]
    InvalidMaxConcurrentUploads(usize),

    #[error("chunk_size must be between 4096 and 8388608 bytes, got {0}")]
    InvalidChunkSize(usize),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const MIN_CHUNK_SIZE: usize = 4 * 1024;
const MAX_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Main configuration structure for the FileDeck client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Storage server connection.
    pub server: ServerConfig,

    /// Upload transfer behaviour.
    pub transfer: TransferConfig,

    /// Local persistence.
    pub storage: StorageConfig,

    /// Logging.
    pub log: LogConfig,
}

/// Storage server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the REST API.
    pub base_url: String,

    /// Whole-request timeout for non-streaming calls, in seconds.
    pub request_timeout_secs: u64,

    /// TCP connect timeout, in seconds.
    pub connect_timeout_secs: u64,
}

/// Upload transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum number of uploads streaming at once.
    pub max_concurrent_uploads: usize,

    /// Cancel an in-flight upload when its notification is dismissed.
    pub cancel_on_dismiss: bool,

    /// Read size for streamed upload bodies, in bytes.
    pub chunk_size: usize,
}

/// Where the persisted login lives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// SQLite database under `data_dir`.
    #[default]
    Database,
    /// The OS keychain.
    Keychain,
}

/// Local persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the client database.
    pub data_dir: PathBuf,

    /// Backend used to persist the login.
    pub session_backend: SessionBackend,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 3,
            cancel_on_dismiss: true,
            chunk_size: 64 * 1024,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            session_backend: SessionBackend::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filedeck")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filedeck")
}

impl StorageConfig {
    /// Path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("filedeck.db")
    }
}

impl ClientConfig {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - FILEDECK_SERVER_URL: Override the server base URL
    /// - FILEDECK_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - FILEDECK_MAX_UPLOADS: Override max_concurrent_uploads
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("FILEDECK_SERVER_URL") {
            if !url.is_empty() {
                tracing::info!("Overriding base_url from environment: {}", url);
                self.server.base_url = url;
            }
        }

        if let Ok(level) = std::env::var("FILEDECK_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log level from environment: {}", level);
                self.log.level = level;
            }
        }

        if let Ok(raw) = std::env::var("FILEDECK_MAX_UPLOADS") {
            match raw.parse::<usize>() {
                Ok(n) => {
                    tracing::info!("Overriding max_concurrent_uploads from environment: {}", n);
                    self.transfer.max_concurrent_uploads = n;
                }
                Err(_) if raw.is_empty() => {}
                Err(e) => {
                    tracing::warn!("Ignoring FILEDECK_MAX_UPLOADS={:?}: {}", raw, e);
                }
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match url::Url::parse(&self.server.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
            _ => {
                return Err(ConfigError::InvalidBaseUrl(self.server.base_url.clone()));
            }
        }

        if !(1..=3600).contains(&self.server.request_timeout_secs) {
            return Err(ConfigError::InvalidRequestTimeout(
                self.server.request_timeout_secs,
            ));
        }

        if !(1..=300).contains(&self.server.connect_timeout_secs) {
            return Err(ConfigError::InvalidConnectTimeout(
                self.server.connect_timeout_secs,
            ));
        }

        if !(1..=32).contains(&self.transfer.max_concurrent_uploads) {
            return Err(ConfigError::InvalidMaxConcurrentUploads(
                self.transfer.max_concurrent_uploads,
            ));
        }

        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.transfer.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(self.transfer.chunk_size));
        }

        let level = self.log.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log.level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();

        assert_eq!(config.server.base_url, "http://localhost:8080");
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.server.connect_timeout_secs, 10);
        assert_eq!(config.transfer.max_concurrent_uploads, 3);
        assert!(config.transfer.cancel_on_dismiss);
        assert_eq!(config.transfer.chunk_size, 64 * 1024);
        assert_eq!(config.storage.session_backend, SessionBackend::Database);
        assert_eq!(config.log.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_storage_paths() {
        let config = StorageConfig::default();
        assert!(config.data_dir.to_string_lossy().contains("filedeck"));
        assert!(config.database_path().ends_with("filedeck.db"));
    }

    #[test]
    fn test_from_toml_empty() {
        let config = ClientConfig::from_toml("").unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
base_url = "https://files.example.com/api"

[transfer]
max_concurrent_uploads = 1
"#;
        let config = ClientConfig::from_toml(toml).unwrap();

        assert_eq!(config.server.base_url, "https://files.example.com/api");
        assert_eq!(config.transfer.max_concurrent_uploads, 1);
        // Other values should be defaults
        assert_eq!(config.server.request_timeout_secs, 30);
        assert!(config.transfer.cancel_on_dismiss);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[server]
base_url = "http://10.0.0.2:9000"
request_timeout_secs = 5
connect_timeout_secs = 2

[transfer]
max_concurrent_uploads = 8
cancel_on_dismiss = false
chunk_size = 131072

[storage]
data_dir = "/custom/data"
session_backend = "keychain"

[log]
level = "trace"
"#;
        let config = ClientConfig::from_toml(toml).unwrap();

        assert_eq!(config.server.base_url, "http://10.0.0.2:9000");
        assert_eq!(config.server.request_timeout_secs, 5);
        assert_eq!(config.server.connect_timeout_secs, 2);
        assert_eq!(config.transfer.max_concurrent_uploads, 8);
        assert!(!config.transfer.cancel_on_dismiss);
        assert_eq!(config.transfer.chunk_size, 131072);
        assert_eq!(config.storage.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.storage.session_backend, SessionBackend::Keychain);
        assert_eq!(config.log.level, "trace");
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = ClientConfig::from_toml("[server\nbase_url = \"x\"");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_unknown_backend() {
        let toml = r#"
[storage]
session_backend = "cloud"
"#;
        assert!(ClientConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = ClientConfig::default();
        original.server.base_url = "https://example.org".to_string();
        original.transfer.cancel_on_dismiss = false;
        original.storage.session_backend = SessionBackend::Keychain;

        let toml = original.to_toml().unwrap();
        let loaded = ClientConfig::from_toml(&toml).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let config = ClientConfig::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = ClientConfig::default();
        original.log.level = "debug".to_string();
        original.transfer.max_concurrent_uploads = 5;

        original.save(&config_path).unwrap();
        let loaded = ClientConfig::load(&config_path).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = ClientConfig::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("filedeck"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_validate_base_url() {
        let mut config = ClientConfig::default();
        config.server.base_url = "ftp://files.example.com".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBaseUrl("ftp://files.example.com".to_string()))
        );

        config.server.base_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn test_validate_timeouts() {
        let mut config = ClientConfig::default();
        config.server.request_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidRequestTimeout(0)));

        let mut config = ClientConfig::default();
        config.server.connect_timeout_secs = 301;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidConnectTimeout(301))
        );
    }

    #[test]
    fn test_validate_max_concurrent_uploads() {
        let mut config = ClientConfig::default();

        config.transfer.max_concurrent_uploads = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidMaxConcurrentUploads(0))
        );

        config.transfer.max_concurrent_uploads = 33;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidMaxConcurrentUploads(33))
        );

        config.transfer.max_concurrent_uploads = 32;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_chunk_size() {
        let mut config = ClientConfig::default();

        config.transfer.chunk_size = 1024;
        assert_eq!(config.validate(), Err(ConfigError::InvalidChunkSize(1024)));

        config.transfer.chunk_size = MAX_CHUNK_SIZE + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChunkSize(_))
        ));

        config.transfer.chunk_size = MIN_CHUNK_SIZE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = ClientConfig::default();
        config.log.level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );

        config.log.level = "WARN".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_override_server_url() {
        std::env::set_var("FILEDECK_SERVER_URL", "https://env.example.com");

        let mut config = ClientConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.server.base_url, "https://env.example.com");

        std::env::remove_var("FILEDECK_SERVER_URL");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("FILEDECK_SERVER_URL", "");
        std::env::set_var("FILEDECK_LOG_LEVEL", "");

        let mut config = ClientConfig::default();
        config.apply_env_overrides();
        assert_eq!(config, ClientConfig::default());

        std::env::remove_var("FILEDECK_SERVER_URL");
        std::env::remove_var("FILEDECK_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::set_var("FILEDECK_LOG_LEVEL", "debug");

        let mut config = ClientConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.log.level, "debug");

        std::env::remove_var("FILEDECK_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_max_uploads() {
        std::env::set_var("FILEDECK_MAX_UPLOADS", "7");
        let mut config = ClientConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.transfer.max_concurrent_uploads, 7);

        std::env::set_var("FILEDECK_MAX_UPLOADS", "many");
        let mut config = ClientConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.transfer.max_concurrent_uploads, 3);

        std::env::remove_var("FILEDECK_MAX_UPLOADS");
    }
}
