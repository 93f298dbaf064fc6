use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const MB: u64 = 1 << 20;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub share: ShareConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root of the two size tiers (`small/` and `large/`)
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
    /// Blobs strictly larger than this many MB go to the large tier
    #[serde(default = "default_split_size")]
    pub split_size_mb: u64,
    #[serde(default = "default_max_upload")]
    pub max_upload_mb: u64,
    #[serde(default = "default_request_delete_log_path")]
    pub request_delete_log_path: String,
    #[serde(default = "default_clear_log_path")]
    pub clear_log_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShareConfig {
    #[serde(default = "default_token_length")]
    pub token_length: usize,
    #[serde(default = "default_pagination_limit")]
    pub pagination_limit: i64,
    #[serde(default = "default_expiry_days")]
    pub expiry_days: i64,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "data/data.db".to_string()
}

fn default_upload_path() -> String {
    "uploads".to_string()
}

fn default_split_size() -> u64 {
    10
}

fn default_max_upload() -> u64 {
    50
}

fn default_request_delete_log_path() -> String {
    "logs/delete/request".to_string()
}

fn default_clear_log_path() -> String {
    "logs/delete/clear".to_string()
}

fn default_token_length() -> usize {
    10
}

fn default_pagination_limit() -> i64 {
    20
}

fn default_expiry_days() -> i64 {
    7
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_path: default_upload_path(),
            split_size_mb: default_split_size(),
            max_upload_mb: default_max_upload(),
            request_delete_log_path: default_request_delete_log_path(),
            clear_log_path: default_clear_log_path(),
        }
    }
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            token_length: default_token_length(),
            pagination_limit: default_pagination_limit(),
            expiry_days: default_expiry_days(),
        }
    }
}

impl StorageConfig {
    /// Tier threshold in bytes
    pub fn split_threshold(&self) -> u64 {
        self.split_size_mb * MB
    }

    /// Upload cap in bytes
    pub fn max_upload(&self) -> u64 {
        self.max_upload_mb * MB
    }

    pub fn small_path(&self) -> PathBuf {
        Path::new(&self.upload_path).join("small")
    }

    pub fn large_path(&self) -> PathBuf {
        Path::new(&self.upload_path).join("large")
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.validate()?;
        config.ensure_directories()?;
        tracing::info!(
            "Storage config: upload_path={}, split={}MB, max_upload={}MB",
            config.storage.upload_path,
            config.storage.split_size_mb,
            config.storage.max_upload_mb
        );
        Ok(config)
    }

    /// Load configuration from config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: FS_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(val) = env::var("FS_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("FS_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }

        // Database overrides
        if let Ok(val) = env::var("FS_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        // Storage overrides
        if let Ok(val) = env::var("FS_CONF_STORAGE_UPLOAD_PATH") {
            self.storage.upload_path = val;
        }
        if let Ok(val) = env::var("FS_CONF_STORAGE_SPLIT_SIZE_MB") {
            if let Ok(mb) = val.parse() {
                self.storage.split_size_mb = mb;
            }
        }
        if let Ok(val) = env::var("FS_CONF_STORAGE_MAX_UPLOAD_MB") {
            if let Ok(mb) = val.parse() {
                self.storage.max_upload_mb = mb;
            }
        }
        if let Ok(val) = env::var("FS_CONF_STORAGE_REQUEST_DELETE_LOG_PATH") {
            self.storage.request_delete_log_path = val;
        }
        if let Ok(val) = env::var("FS_CONF_STORAGE_CLEAR_LOG_PATH") {
            self.storage.clear_log_path = val;
        }

        // Share overrides
        if let Ok(val) = env::var("FS_CONF_SHARE_TOKEN_LENGTH") {
            if let Ok(len) = val.parse() {
                self.share.token_length = len;
            }
        }
        if let Ok(val) = env::var("FS_CONF_SHARE_PAGINATION_LIMIT") {
            if let Ok(limit) = val.parse() {
                self.share.pagination_limit = limit;
            }
        }
        if let Ok(val) = env::var("FS_CONF_SHARE_EXPIRY_DAYS") {
            if let Ok(days) = val.parse() {
                self.share.expiry_days = days;
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.share.token_length == 0 {
            anyhow::bail!("share.token_length must be positive");
        }
        if self.share.pagination_limit <= 0 {
            anyhow::bail!("share.pagination_limit must be positive");
        }
        if self.share.expiry_days <= 0 {
            anyhow::bail!("share.expiry_days must be positive");
        }
        if self.storage.max_upload_mb == 0 {
            anyhow::bail!("storage.max_upload_mb must be positive");
        }
        Ok(())
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        // Ensure database directory exists
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }

        fs::create_dir_all(self.storage.small_path())?;
        fs::create_dir_all(self.storage.large_path())?;

        Ok(())
    }
}
