//! Channel publish/subscribe over a queue backend.
//!
//! - `Publisher`: turns a publish request into one backend send
//! - `Subscriber`: runs the receive loop and routes deliveries to listeners
//! - `SubscriptionRegistry`: the process-wide channel → handler mapping
//! - `create_publisher` / `create_subscriber`: build either from `Config`

use std::sync::Arc;

use tracing::info;

use crate::bus::{InMemoryBroker, Result};
use crate::config::{BackendType, Config};

mod message;
mod publisher;
mod registry;
mod subscriber;

pub use message::Message;
pub use publisher::Publisher;
pub use registry::SubscriptionRegistry;
pub use subscriber::{Delivery, Subscriber};

/// Create a publisher for the configured backend.
///
/// The queue config is validated before any backend is contacted.
pub async fn create_publisher(config: &Config) -> Result<Publisher> {
    config.queue.validate()?;

    let publisher = match config.backend {
        BackendType::Memory => {
            let producer = InMemoryBroker::global().producer(&config.queue)?;
            Publisher::validated(&config.queue, Arc::new(producer))?
        }
        BackendType::Sqs => sqs_publisher(config).await?,
    };

    info!(backend = ?config.backend, queue_url = %publisher.queue_url(), "Publisher initialized");
    Ok(publisher)
}

/// Create a subscriber for the configured backend, sharing the global registry.
///
/// The queue config is validated before any backend is contacted.
pub async fn create_subscriber(config: &Config) -> Result<Subscriber> {
    config.queue.validate()?;

    let subscriber = match config.backend {
        BackendType::Memory => Subscriber::validated(
            config.queue.clone(),
            Arc::new(InMemoryBroker::global().consumer_factory()),
            SubscriptionRegistry::global(),
        ),
        BackendType::Sqs => sqs_subscriber(config).await?,
    };

    info!(backend = ?config.backend, queue_url = ?config.queue.queue_url, "Subscriber initialized");
    Ok(subscriber)
}

#[cfg(feature = "sqs")]
async fn sqs_publisher(config: &Config) -> Result<Publisher> {
    Publisher::connect_validated(&config.queue).await
}

#[cfg(feature = "sqs")]
async fn sqs_subscriber(config: &Config) -> Result<Subscriber> {
    Ok(Subscriber::connect_validated(config.queue.clone()).await)
}

#[cfg(not(feature = "sqs"))]
async fn sqs_publisher(_config: &Config) -> Result<Publisher> {
    Err(sqs_disabled())
}

#[cfg(not(feature = "sqs"))]
async fn sqs_subscriber(_config: &Config) -> Result<Subscriber> {
    Err(sqs_disabled())
}

#[cfg(not(feature = "sqs"))]
fn sqs_disabled() -> crate::bus::BusError {
    crate::config::ConfigError::Invalid {
        field: "backend",
        reason: "SQS support requires the 'sqs' feature. Rebuild with --features sqs".to_string(),
    }
    .into()
}
