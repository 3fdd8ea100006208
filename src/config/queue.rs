//! Queue target and polling configuration.

use serde::Deserialize;

/// Largest batch SQS accepts for `SendMessageBatch` and `ReceiveMessage`.
pub const MAX_BATCH_SIZE: usize = 10;

/// Longest long-polling wait SQS accepts, in seconds.
pub const MAX_WAIT_TIME_SECS: i32 = 20;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No {field} found in config")]
    MissingField { field: &'static str },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Polling options for the receive loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Max number of messages to receive in one poll (1..=10).
    pub max_messages: i32,
    /// Long polling wait in seconds (0..=20).
    pub wait_time_secs: i32,
    /// Visibility timeout applied to received messages. Queue default if unset.
    pub visibility_timeout_secs: Option<i32>,
    /// Delay between two polls, in milliseconds.
    pub poll_delay_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time_secs: MAX_WAIT_TIME_SECS,
            visibility_timeout_secs: None,
            poll_delay_ms: 0,
        }
    }
}

/// Configuration shared by publishers and subscribers.
///
/// `queue_url` is the only required field; everything else has a default
/// or falls back to the AWS provider chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// URL (or in-memory name) of the destination queue.
    pub queue_url: Option<String>,
    /// AWS region (e.g., "us-east-1"). Uses default provider chain if not set.
    pub region: Option<String>,
    /// Custom endpoint URL (for LocalStack or testing).
    pub endpoint_url: Option<String>,
    /// Envelopes per `SendMessageBatch` call (1..=10).
    pub batch_size: usize,
    /// Receive loop options.
    pub polling: PollingConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_url: None,
            region: None,
            endpoint_url: None,
            batch_size: MAX_BATCH_SIZE,
            polling: PollingConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Create config targeting a queue.
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue_url: Some(queue_url.into()),
            ..Self::default()
        }
    }

    /// Set AWS region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set custom endpoint URL (for LocalStack or testing).
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    /// Set the publish batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set receive loop polling options.
    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// The validated queue target.
    pub fn queue_url(&self) -> Result<&str, ConfigError> {
        match self.queue_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(url),
            _ => Err(ConfigError::MissingField { field: "queue_url" }),
        }
    }

    /// Check that the config resolves to a usable queue target.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue_url()?;

        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: format!("must be between 1 and {MAX_BATCH_SIZE}, got {}", self.batch_size),
            });
        }

        let max_messages = self.polling.max_messages;
        if !(1..=MAX_BATCH_SIZE as i32).contains(&max_messages) {
            return Err(ConfigError::Invalid {
                field: "polling.max_messages",
                reason: format!("must be between 1 and {MAX_BATCH_SIZE}, got {max_messages}"),
            });
        }

        let wait = self.polling.wait_time_secs;
        if !(0..=MAX_WAIT_TIME_SECS).contains(&wait) {
            return Err(ConfigError::Invalid {
                field: "polling.wait_time_secs",
                reason: format!("must be between 0 and {MAX_WAIT_TIME_SECS}, got {wait}"),
            });
        }

        if let Some(timeout) = self.polling.visibility_timeout_secs {
            if timeout < 0 {
                return Err(ConfigError::Invalid {
                    field: "polling.visibility_timeout_secs",
                    reason: format!("must not be negative, got {timeout}"),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_queue_url() {
        let err = QueueConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "queue_url" }));
        assert_eq!(err.to_string(), "No queue_url found in config");
    }

    #[test]
    fn test_blank_queue_url_is_missing() {
        let err = QueueConfig::new("  ").validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn test_defaults() {
        let config = QueueConfig::new("test-queue");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.polling.max_messages, 10);
        assert_eq!(config.polling.wait_time_secs, 20);
        assert!(config.polling.visibility_timeout_secs.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_batch_size_bounds() {
        assert!(QueueConfig::new("q").with_batch_size(0).validate().is_err());
        assert!(QueueConfig::new("q").with_batch_size(11).validate().is_err());
        assert!(QueueConfig::new("q").with_batch_size(1).validate().is_ok());
    }

    #[test]
    fn test_polling_bounds() {
        let polling = PollingConfig {
            wait_time_secs: 21,
            ..PollingConfig::default()
        };
        let err = QueueConfig::new("q").with_polling(polling).validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "polling.wait_time_secs",
                ..
            }
        ));

        let polling = PollingConfig {
            max_messages: 0,
            ..PollingConfig::default()
        };
        assert!(QueueConfig::new("q").with_polling(polling).validate().is_err());
    }

    #[test]
    fn test_endpoint_config() {
        let config = QueueConfig::new("q")
            .with_region("us-west-2")
            .with_endpoint("http://localhost:4566");
        assert_eq!(config.region, Some("us-west-2".to_string()));
        assert_eq!(config.endpoint_url, Some("http://localhost:4566".to_string()));
    }
}
