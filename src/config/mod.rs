//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::storage::{ReducePolicy, StorageConfig};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "CASKEEP_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "CASKEEP";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "CASKEEP_LOG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Aggregate actor and supervision settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Bounded mailbox size per aggregate.
    pub mailbox_capacity: usize,
    /// Consecutive crashes tolerated before a key is given up.
    pub max_restarts: u32,
    /// Pause before respawning a crashed actor.
    #[serde(with = "crate::utils::millis", rename = "restart_delay_ms")]
    pub restart_delay: Duration,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            max_restarts: 3,
            restart_delay: Duration::from_millis(100),
        }
    }
}

/// Saga settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SagaConfig {
    /// How long a saga waits for an aggregate reply.
    #[serde(with = "crate::utils::millis", rename = "reply_timeout_ms")]
    pub reply_timeout: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(5),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Key-value store connection.
    pub storage: StorageConfig,
    /// CAS retry bounds for commits.
    pub commit: ReducePolicy,
    /// Actor mailboxes and restarts.
    pub actor: ActorConfig,
    /// Saga timeouts.
    pub saga: SagaConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Create config for testing: in-memory store, short delays.
    pub fn for_test() -> Self {
        Self {
            commit: ReducePolicy {
                max_retries: 5,
                retry_delay: Duration::from_millis(1),
            },
            actor: ActorConfig {
                restart_delay: Duration::from_millis(5),
                ..ActorConfig::default()
            },
            saga: SagaConfig {
                reply_timeout: Duration::from_secs(2),
            },
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.commit.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "commit.max_retries must be at least 1".to_string(),
            ));
        }
        if self.actor.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "actor.mailbox_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
