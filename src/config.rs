use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "pageviews.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub load: LoadConfig,
    pub store: StoreConfig,
    /// Directory for the NDJSON run journal
    pub journal_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub data_dir: PathBuf,
    pub lookback_hours: i64,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub project: String,
    pub batch_size: usize,
    pub skip_loaded_windows: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub sqlite_path: PathBuf,
    /// Remote libSQL database, only honoured with the `db` feature
    pub libsql_url: Option<String>,
    pub libsql_auth_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            load: LoadConfig::default(),
            store: StoreConfig::default(),
            journal_dir: PathBuf::from("data/runs"),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: crate::constants::DEFAULT_BASE_URL.to_string(),
            data_dir: PathBuf::from("data"),
            lookback_hours: crate::constants::DEFAULT_LOOKBACK_HOURS,
            http_timeout_secs: 300,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            project: crate::constants::DEFAULT_PROJECT.to_string(),
            batch_size: 5000,
            skip_loaded_windows: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/pageviews.db"),
            libsql_url: None,
            libsql_auth_token: None,
        }
    }
}

impl SourceConfig {
    pub fn http_timeout(&self) -> Option<Duration> {
        (self.http_timeout_secs > 0).then(|| Duration::from_secs(self.http_timeout_secs))
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.lookback_hours)
    }
}

impl Config {
    /// Load configuration from an explicit path, `PAGEVIEWS_CONFIG`, or
    /// `pageviews.toml` in the working directory, then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var("PAGEVIEWS_CONFIG").ok().map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PAGEVIEWS_BASE_URL") {
            self.source.base_url = v;
        }
        if let Some(v) = lookup("PAGEVIEWS_DATA_DIR") {
            self.source.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PAGEVIEWS_DATABASE_PATH") {
            self.store.sqlite_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PAGEVIEWS_HTTP_TIMEOUT_SECS") {
            self.source.http_timeout_secs = v.parse().map_err(|e| ConfigError::Invalid {
                key: "PAGEVIEWS_HTTP_TIMEOUT_SECS".to_string(),
                message: format!("{e}"),
            })?;
        }
        if let Some(v) = lookup("LIBSQL_URL") {
            self.store.libsql_url = Some(v);
        }
        if let Some(v) = lookup("LIBSQL_AUTH_TOKEN") {
            self.store.libsql_auth_token = Some(v);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.source.lookback_hours < 0 {
            return Err(ConfigError::Invalid {
                key: "source.lookback_hours".to_string(),
                message: "must not be negative".to_string(),
            });
        }
        if self.load.project.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "load.project".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
