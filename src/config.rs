use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HoardConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub memory: MemoryConfig,
    pub duplicates: DuplicatesConfig,
    pub worker: WorkerConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

/// Timeouts and retry budgets for the write path.
///
/// `busy_timeout_ms` is SQLite's own internal retry budget; `lock_timeout_ms`
/// bounds a single acquisition of the cross-process write lock; the retry
/// budget/backoff pair governs how long the coordinator keeps re-attempting a
/// timed-out lock acquisition before surfacing the failure to the submitter.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub busy_timeout_ms: u64,
    pub lock_timeout_ms: u64,
    pub retry_budget_ms: u64,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    pub default_ttl_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DuplicatesConfig {
    /// Cosine similarity at or above this value marks a pair as duplicates.
    pub threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub lease_ttl_ms: u64,
    pub poll_interval_ms: u64,
    pub job_timeout_ms: u64,
    pub job_retention_days: i64,
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimensions: usize,
}

impl Default for HoardConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
            memory: MemoryConfig::default(),
            duplicates: DuplicatesConfig::default(),
            worker: WorkerConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 19850,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_hoard_dir()
            .join("hoard.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
            lock_timeout_ms: 30_000,
            retry_budget_ms: 30_000,
            retry_backoff_ms: 50,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { default_ttl_days: 30 }
    }
}

impl Default for DuplicatesConfig {
    fn default() -> Self {
        Self { threshold: 0.85 }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: 60_000,
            poll_interval_ms: 1000,
            job_timeout_ms: 60_000,
            job_retention_days: 7,
            max_retries: 3,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "hash-64".into(),
            dimensions: 64,
        }
    }
}

/// Returns `~/.hoard/`
pub fn default_hoard_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".hoard")
}

/// Returns the default config file path: `~/.hoard/config.toml`
pub fn default_config_path() -> PathBuf {
    default_hoard_dir().join("config.toml")
}

impl HoardConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            HoardConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (HOARD_DB, HOARD_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HOARD_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("HOARD_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = HoardConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 19850);
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.database.lock_timeout_ms, 30_000);
        assert_eq!(config.database.retry_budget_ms, 30_000);
        assert_eq!(config.database.retry_backoff_ms, 50);
        assert!((config.duplicates.threshold - 0.85).abs() < f64::EPSILON);
        assert_eq!(config.memory.default_ttl_days, 30);
        assert!(config.storage.db_path.ends_with("hoard.db"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[storage]
db_path = "/tmp/test.db"

[database]
lock_timeout_ms = 1000

[duplicates]
threshold = 0.9
"#;
        let config: HoardConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.database.lock_timeout_ms, 1000);
        assert!((config.duplicates.threshold - 0.9).abs() < f64::EPSILON);
        // defaults still apply for unset fields
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.worker.lease_ttl_ms, 60_000);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = HoardConfig::default();
        std::env::set_var("HOARD_DB", "/tmp/override.db");
        std::env::set_var("HOARD_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.server.log_level, "trace");

        // Clean up
        std::env::remove_var("HOARD_DB");
        std::env::remove_var("HOARD_LOG_LEVEL");
    }
}
