//! Metadata service configuration
//!
//! Database connection (SQLite or PostgreSQL) plus service-level knobs,
//! loaded from YAML.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Region used when a request leaves it empty.
pub const DEFAULT_REGION: &str = "cn-bj-1";

/// Upper bound on one list-dir-files page.
pub const MAX_LIST_PAGE_SIZE: u64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,

    #[serde(default)]
    pub service: ServiceConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(flatten)]
    pub db_config: DatabaseType,
}

/// Database type enumeration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DatabaseType {
    #[serde(rename = "sqlite")]
    Sqlite {
        #[serde(default = "default_sqlite_url")]
        url: String,
    },
    #[serde(rename = "postgres")]
    Postgres { url: String },
}

fn default_sqlite_url() -> String {
    "sqlite:///tmp/yigfs/metadata.db?mode=rwc".to_string()
}

/// Request handling knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_region")]
    pub default_region: String,

    /// Page size used when a list request asks for 0 or more than the cap.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: u64,

    /// Attempts for an operation that keeps losing optimistic races.
    #[serde(default = "default_max_retries")]
    pub max_retries: u64,

    /// Deadline for one block write transaction (in seconds)
    #[serde(default = "default_txn_timeout", with = "duration_serde")]
    pub txn_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_region: default_region(),
            list_page_size: default_list_page_size(),
            max_retries: default_max_retries(),
            txn_timeout: default_txn_timeout(),
        }
    }
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_list_page_size() -> u64 {
    MAX_LIST_PAGE_SIZE
}

fn default_max_retries() -> u64 {
    8
}

fn default_txn_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Config {
    /// A config for `db_config` with default service settings.
    pub fn with_database(db_config: DatabaseType) -> Self {
        Self {
            database: DatabaseConfig { db_config },
            service: ServiceConfig::default(),
        }
    }

    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::IoError)?;

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Load configuration from path, fallback to default paths
    pub fn from_path(backend_path: &Path) -> Result<Self, ConfigError> {
        let config_file = backend_path.join("yigfs-meta.yml");
        if config_file.exists() {
            return Self::from_file(&config_file);
        }

        Self::from_default_path()
    }

    /// Load configuration from default paths
    pub fn from_default_path() -> Result<Self, ConfigError> {
        let possible_paths = [
            "yigfs-meta.yml",
            "yigfs-meta.yaml",
            "config.yml",
            "config.yaml",
            "/etc/yigfs/meta.yml",
        ];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Err(ConfigError::ConfigNotFound)
    }
}

impl DatabaseConfig {
    /// Get database type string
    pub fn db_type_str(&self) -> &'static str {
        match &self.db_config {
            DatabaseType::Sqlite { .. } => "sqlite",
            DatabaseType::Postgres { .. } => "postgres",
        }
    }
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Config file not found in default locations")]
    ConfigNotFound,
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        if !value.is_finite() || value < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_service_defaults_apply() {
        let config: Config = serde_yaml::from_str("database:\n  type: sqlite\n").unwrap();
        assert!(matches!(
            config.database.db_config,
            DatabaseType::Sqlite { ref url } if url.starts_with("sqlite://")
        ));
        assert_eq!(config.service.default_region, DEFAULT_REGION);
        assert_eq!(config.service.list_page_size, MAX_LIST_PAGE_SIZE);
        assert_eq!(config.service.txn_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_from_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(
            file,
            "database:\n  type: postgres\n  url: postgres://meta@localhost/yig\nservice:\n  default_region: us-east-1\n  max_retries: 3\n  txn_timeout: 1.5\n"
        )?;

        let config = Config::from_file(file.path())?;
        assert_eq!(config.database.db_type_str(), "postgres");
        assert_eq!(config.service.default_region, "us-east-1");
        assert_eq!(config.service.max_retries, 3);
        assert_eq!(config.service.list_page_size, MAX_LIST_PAGE_SIZE);
        assert_eq!(config.service.txn_timeout, Duration::from_millis(1500));
        Ok(())
    }

    #[test]
    fn test_from_path_prefers_backend_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join("yigfs-meta.yml"),
            "database:\n  type: sqlite\n  url: sqlite::memory:\n",
        )?;
        let config = Config::from_path(dir.path())?;
        assert!(matches!(
            config.database.db_config,
            DatabaseType::Sqlite { ref url } if url == "sqlite::memory:"
        ));
        Ok(())
    }
}
