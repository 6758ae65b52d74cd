//! Hierarchical configuration for a process hosting this runtime (SPEC_FULL's ambient
//! config-layer expansion). Grounded on the teacher's `infrastructure/config/loader.rs`
//! figment-merge shape (defaults → project file → project-local override → env), retargeted
//! from the teacher's agent-swarm `Config` to this runtime's database/logging/durable knobs.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::super::logging::LogConfig;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to extract configuration: {0}")]
    Extract(#[from] figment::Error),
    #[error("database path cannot be empty")]
    EmptyDatabasePath,
    #[error("invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),
    #[error("invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
    #[error("invalid default_max_attempts: {0}. Must be at least 1")]
    InvalidMaxAttempts(u32),
    #[error("invalid poll_interval_ms: {0}. Must be positive")]
    InvalidPollInterval(u64),
    #[error("invalid claim_ttl_ms: {0}. Must be positive")]
    InvalidClaimTtl(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://.weft/weft.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Durable engine runtime knobs (SPEC_FULL §4.6, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableRuntimeConfig {
    pub default_max_attempts: u32,
    pub base_retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub claim_ttl_ms: i64,
    pub audit_enabled: bool,
}

impl Default for DurableRuntimeConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            base_retry_delay_ms: 200,
            poll_interval_ms: 1_000,
            claim_ttl_ms: 30_000,
            audit_enabled: true,
        }
    }
}

/// Top-level configuration for a process embedding this runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub durable: DurableRuntimeConfig,
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.weft/config.yaml` (project config)
    /// 3. `.weft/local.yaml` (project-local overrides, optional)
    /// 4. Environment variables (`WEFT_` prefix, highest priority)
    pub fn load() -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".weft/config.yaml"))
            .merge(Yaml::file(".weft/local.yaml"))
            .merge(Env::prefixed("WEFT_").split("__"))
            .extract()?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.url.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.durable.default_max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(config.durable.default_max_attempts));
        }
        if config.durable.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(config.durable.poll_interval_ms));
        }
        if config.durable.claim_ttl_ms <= 0 {
            return Err(ConfigError::InvalidClaimTtl(config.durable.claim_ttl_ms));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn yaml_parsing_overrides_defaults() {
        let yaml = r"
database:
  url: sqlite:///custom/path.db
  max_connections: 10
logging:
  level: debug
  format: pretty
durable:
  default_max_attempts: 5
  poll_interval_ms: 2000
  claim_ttl_ms: 60000
  audit_enabled: false
";
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::string(yaml))
            .extract()
            .expect("yaml should parse");

        assert_eq!(config.database.url, "sqlite:///custom/path.db");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.durable.default_max_attempts, 5);
        assert!(!config.durable.audit_enabled);
        ConfigLoader::validate(&config).expect("parsed config should be valid");
    }

    #[test]
    fn validate_rejects_zero_max_connections() {
        let mut config = Config::default();
        config.database.max_connections = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxConnections(0))));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogLevel(_))));
    }

    #[test]
    fn validate_rejects_zero_max_attempts() {
        let mut config = Config::default();
        config.durable.default_max_attempts = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxAttempts(0))));
    }

    #[test]
    fn env_override_takes_precedence() {
        temp_env::with_var("WEFT_LOGGING__LEVEL", Some("debug"), || {
            let config: Config = Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Env::prefixed("WEFT_").split("__"))
                .extract()
                .expect("env override should parse");
            assert_eq!(config.logging.level, "debug");
        });
    }

    #[test]
    fn hierarchical_merging_prefers_later_sources() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(base_file, "database:\n  max_connections: 5\nlogging:\n  level: info").unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "database:\n  max_connections: 15").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.database.max_connections, 15, "override should win");
        assert_eq!(config.logging.level, "info", "base value should persist when not overridden");
    }
}
