use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Watched directory and ingestion behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// How long a file's size must stay unchanged before it is reported
    #[serde(default = "default_stability_threshold_ms")]
    pub stability_threshold_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub delete_after_upload: bool,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            debounce_ms: default_debounce_ms(),
            stability_threshold_ms: default_stability_threshold_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            delete_after_upload: false,
            stats_interval_secs: default_stats_interval_secs(),
            log_level: default_log_level(),
        }
    }
}

/// Which object storage implementation receives uploads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Gcs,
    Local,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Name of the environment variable holding an OAuth bearer token
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Send no credentials at all, for storage emulators
    #[serde(default)]
    pub anonymous: bool,
    /// Root directory for the `local` backend
    #[serde(default)]
    pub local_root: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            bucket: String::new(),
            project_id: None,
            access_token_env: default_access_token_env(),
            endpoint: default_endpoint(),
            anonymous: false,
            local_root: None,
        }
    }
}

/// Upload record store configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub db_path: PathBuf,
}

fn default_watch_dir() -> PathBuf {
    PathBuf::from("/watch-dir")
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_stability_threshold_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_stats_interval_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_access_token_env() -> String {
    "GCS_ACCESS_TOKEN".to_string()
}

fn default_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

impl Config {
    /// Load configuration
    ///
    /// Loads environment variables from .env file (if present), then reads the
    /// TOML file named by CAMWATCH_CONFIG, or ./config.toml when it exists.
    /// Without a file the built-in defaults apply. Environment variables used by
    /// the container deployment (WATCH_DIR, GCS_BUCKET, ...) override the file.
    pub fn load() -> Result<Self> {
        // Optional file
        let _ = dotenv::dotenv();

        let explicit = std::env::var("CAMWATCH_CONFIG").ok().map(PathBuf::from);
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = Path::new("config.toml");
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Config::default()
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML config file without applying overrides or validation
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("WATCH_DIR") {
            self.watcher.watch_dir = PathBuf::from(dir);
        }
        if let Some(bucket) = lookup("GCS_BUCKET") {
            self.storage.bucket = bucket;
        }
        if let Some(project) = lookup("GOOGLE_CLOUD_PROJECT") {
            self.storage.project_id = Some(project).filter(|p| !p.is_empty());
        }
        if let Some(flag) = lookup("DELETE_AFTER_UPLOAD") {
            self.watcher.delete_after_upload = flag == "true";
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.watcher.log_level = level;
        }
        if let Some(ms) = lookup("DEBOUNCE_TIME") {
            self.watcher.debounce_ms = ms
                .trim()
                .parse()
                .with_context(|| format!("DEBOUNCE_TIME must be a number of milliseconds, got {:?}", ms))?;
        }
        if let Some(path) = lookup("DB_PATH") {
            self.database.db_path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.storage.bucket.trim().is_empty() {
            anyhow::bail!("storage.bucket is required (set GCS_BUCKET)");
        }

        if self.watcher.watch_dir.as_os_str().is_empty() {
            anyhow::bail!("watcher.watch_dir is required (set WATCH_DIR)");
        }

        if self.database.db_path.as_os_str().is_empty() {
            anyhow::bail!("database.db_path is required (set DB_PATH)");
        }

        if self.watcher.debounce_ms == 0 {
            anyhow::bail!("watcher.debounce_ms must be greater than 0");
        }

        if self.watcher.poll_interval_ms == 0 {
            anyhow::bail!("watcher.poll_interval_ms must be greater than 0");
        }

        if self.watcher.stats_interval_secs == 0 {
            anyhow::bail!("watcher.stats_interval_secs must be greater than 0");
        }

        if self.storage.backend == StorageBackend::Local && self.storage.local_root.is_none() {
            anyhow::bail!("storage.local_root is required for the local storage backend");
        }

        Ok(())
    }

    /// Get the watched directory
    pub fn watch_dir(&self) -> &Path {
        &self.watcher.watch_dir
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.database.db_path
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watcher.debounce_ms)
    }

    pub fn stability_threshold(&self) -> Duration {
        Duration::from_millis(self.watcher.stability_threshold_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.watcher.poll_interval_ms)
    }
}
