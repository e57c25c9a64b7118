use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for erp-flow
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ErpFlowConfig {
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// Inventory ledger settings
    pub ledger: LedgerConfig,
    /// Role resolution and user lookup
    pub directory: DirectoryConfig,
    /// Push notification delivery
    pub notifications: NotificationConfig,
    /// Database settings (optional, needs the `database` feature)
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Attempts per atomic unit before giving up on write contention
    pub max_attempts: u32,
    /// First retry delay
    pub base_delay_ms: u64,
    /// Upper bound for a single retry delay
    pub max_delay_ms: u64,
    /// Identity recorded on transactions written by background reactions
    pub system_user_id: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 20,
            max_delay_ms: 1_000,
            system_user_id: "system".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Roles per `in` query (capped at the store limit)
    pub in_query_batch_size: usize,
    /// Display-name cache TTL
    pub name_cache_ttl_seconds: u64,
    /// Display-name cache capacity
    pub name_cache_capacity: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            in_query_batch_size: crate::store::IN_QUERY_LIMIT,
            name_cache_ttl_seconds: 300,
            name_cache_capacity: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Send push notifications at all
    pub enabled: bool,
    /// Sustained deliveries per second
    pub per_second: u32,
    /// Burst capacity
    pub burst: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_second: 20,
            burst: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite database URL
    pub url: String,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl ErpFlowConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (erp-flow.toml, .erp-flow-rc)
    /// 3. Environment variables (prefixed with ERP_FLOW_, `__` between sections)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`ErpFlowConfig::load`] with config files looked up in `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder();

        let main_file = dir.join("erp-flow.toml");
        if main_file.exists() {
            builder = builder.add_source(File::from(main_file));
        }

        let rc_file = dir.join(".erp-flow-rc");
        if rc_file.exists() {
            builder = builder.add_source(File::from(rc_file).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("ERP_FLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<ErpFlowConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = ErpFlowConfig::load_env_file();
        ErpFlowConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static ErpFlowConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = ErpFlowConfig::load_from(dir.path()).unwrap();

        assert_eq!(config.ledger.max_attempts, 5);
        assert_eq!(config.ledger.system_user_id, "system");
        assert_eq!(config.directory.in_query_batch_size, crate::store::IN_QUERY_LIMIT);
        assert!(config.database.is_none());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("erp-flow.toml"),
            "[ledger]\nmax_attempts = 9\n\n[notifications]\nenabled = false\n",
        )
        .unwrap();

        let config = ErpFlowConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.ledger.max_attempts, 9);
        assert_eq!(config.ledger.base_delay_ms, 20);
        assert!(!config.notifications.enabled);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ErpFlowConfig::default();
        config.directory.name_cache_ttl_seconds = 42;
        config.save_to_file(dir.path().join("erp-flow.toml")).unwrap();

        let reloaded = ErpFlowConfig::load_from(dir.path()).unwrap();
        assert_eq!(reloaded.directory.name_cache_ttl_seconds, 42);
    }
}
