use promptetheus_core::{CacheConfig, DEFAULT_SYNC_INTERVAL};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Replay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Drain the queue on a timer while `sync watch` runs
    pub auto_sync: bool,
    /// Timer period in milliseconds
    pub interval_ms: u64,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: true,
            interval_ms: DEFAULT_SYNC_INTERVAL.as_millis() as u64,
            request_timeout_secs: 30,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Response cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Precache generation version, e.g. "v1" for `promptetheus-v1`
    pub version: String,
    pub api_prefix: String,
    pub precache_manifest: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            version: CacheConfig::DEFAULT_VERSION.to_string(),
            api_prefix: defaults.api_prefix,
            precache_manifest: defaults.precache_manifest,
        }
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            api_prefix: self.api_prefix.clone(),
            precache_manifest: self.precache_manifest.clone(),
            ..CacheConfig::for_version(&self.version)
        }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database holding the queue, drafts and cache
    pub database_path: ConfigValue<PathBuf>,
    /// Origin of the Promptetheus server
    pub server_url: ConfigValue<String>,
    /// Bearer token sent with API requests
    #[serde(skip_serializing)]
    pub api_token: Option<ConfigValue<String>>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub sync: SyncConfig,
    pub cache: CacheSettings,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    server_url: Option<String>,
    api_token: Option<String>,
    sync: Option<SyncConfig>,
    cache: Option<CacheSettings>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let default_db_path = Self::default_data_dir().join("promptetheus.db");

        // Start with defaults
        let mut database_path = ConfigValue::new(default_db_path, ConfigSource::Default);
        let mut server_url =
            ConfigValue::new(DEFAULT_SERVER_URL.to_string(), ConfigSource::Default);
        let mut api_token = None;
        let mut config_file = None;
        let mut sync = SyncConfig::default();
        let mut cache = CacheSettings::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(url) = file_config.server_url {
                server_url = ConfigValue::new(url, ConfigSource::File);
            }
            if let Some(token) = file_config.api_token {
                api_token = Some(ConfigValue::new(token, ConfigSource::File));
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
            if let Some(cache_config) = file_config.cache {
                cache = cache_config;
            }
        }

        // Apply environment variable overrides
        if let Ok(db_path) = std::env::var("PROMPTETHEUS_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("PROMPTETHEUS_SERVER_URL") {
            server_url = ConfigValue::new(url, ConfigSource::Environment);
        }
        if let Ok(token) = std::env::var("PROMPTETHEUS_API_TOKEN") {
            api_token = Some(ConfigValue::new(token, ConfigSource::Environment));
        }

        Ok(Self {
            database_path,
            server_url,
            api_token,
            config_file,
            sync,
            cache,
        })
    }

    /// Server origin without a trailing slash
    pub fn origin(&self) -> &str {
        self.server_url.value.trim_end_matches('/')
    }

    /// Base URL that queued operation endpoints are relative to
    pub fn api_base_url(&self) -> String {
        format!(
            "{}/{}",
            self.origin(),
            self.cache.api_prefix.trim_matches('/')
        )
    }

    pub fn api_token(&self) -> Option<&str> {
        self.api_token.as_ref().map(|t| t.value.as_str())
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/promptetheus/
    /// - macOS: ~/Library/Application Support/promptetheus/
    /// - Windows: %APPDATA%/promptetheus/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("promptetheus")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/promptetheus/
    /// - macOS: ~/Library/Application Support/promptetheus/
    /// - Windows: %APPDATA%/promptetheus/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("promptetheus")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
