//! Application configuration.
//!
//! Loaded from YAML files and environment variables into a single
//! [`Config`]; the queue section is validated by publishers and
//! subscribers before any backend is contacted.

mod queue;

pub use queue::{ConfigError, PollingConfig, QueueConfig, MAX_BATCH_SIZE, MAX_WAIT_TIME_SECS};

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "SQS_MQ_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "SQS_MQ";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "SQS_MQ_LOG";

/// Backend type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Amazon SQS (requires the `sqs` feature).
    #[default]
    Sqs,
    /// In-process queues, no external broker.
    Memory,
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which queue backend to use.
    pub backend: BackendType,
    /// Queue target and polling options.
    pub queue: QueueConfig,
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

        Ok(config.try_deserialize()?)
    }

    /// Create an in-memory config for testing.
    pub fn for_test(queue_url: impl Into<String>) -> Self {
        Self {
            backend: BackendType::Memory,
            queue: QueueConfig::new(queue_url),
        }
    }
}
