//! Channel publisher.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, error};

use super::Message;
use crate::bus::{Envelope, QueueProducer, Result};
use crate::config::QueueConfig;

/// Publishes messages to the configured queue.
///
/// Publishing is fire-and-forget: envelopes are sent on a spawned task and
/// backend failures are logged, never returned.
pub struct Publisher {
    producer: Arc<dyn QueueProducer>,
    queue_url: String,
}

impl Publisher {
    /// Create a publisher over an existing producer.
    ///
    /// Fails with a configuration error when the queue target is missing.
    pub fn new(config: &QueueConfig, producer: Arc<dyn QueueProducer>) -> Result<Self> {
        config.validate()?;
        Self::validated(config, producer)
    }

    pub(crate) fn validated(config: &QueueConfig, producer: Arc<dyn QueueProducer>) -> Result<Self> {
        Ok(Self {
            producer,
            queue_url: config.queue_url()?.to_string(),
        })
    }

    /// Validate the config, then open an SQS producer for it.
    #[cfg(feature = "sqs")]
    pub async fn connect(config: &QueueConfig) -> Result<Self> {
        config.validate()?;
        Self::connect_validated(config).await
    }

    #[cfg(feature = "sqs")]
    pub(crate) async fn connect_validated(config: &QueueConfig) -> Result<Self> {
        let backend = crate::bus::SqsBackend::connect(config).await;
        let producer = backend.producer_for(config)?;
        Self::validated(config, Arc::new(producer))
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Build the envelopes `publish` would send for `message`.
    pub fn envelopes(message: impl Into<Message>) -> Vec<Envelope> {
        message.into().into_envelopes()
    }

    /// Publish a message (or a batch) on `channel`.
    ///
    /// The channel is only used for logging; it is not part of the
    /// envelopes. Never fails: send errors, including payloads the backend
    /// rejects, are logged once the send completes.
    pub fn publish(&self, channel: &str, message: impl Into<Message>) {
        let envelopes = Self::envelopes(message);
        if envelopes.is_empty() {
            debug!(channel = %channel, "Empty batch, nothing to publish");
            return;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(channel = %channel, error = %e, "Cannot publish outside a tokio runtime");
                return;
            }
        };

        let producer = Arc::clone(&self.producer);
        let channel = channel.to_string();
        let queue_url = self.queue_url.clone();
        let count = envelopes.len();

        runtime.spawn(async move {
            match producer.send(envelopes).await {
                Ok(()) => debug!(
                    channel = %channel,
                    queue_url = %queue_url,
                    count = count,
                    "Published messages"
                ),
                Err(e) => error!(
                    channel = %channel,
                    queue_url = %queue_url,
                    error = %e,
                    "Failed to publish messages"
                ),
            }
        });
    }
}
