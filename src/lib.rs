//! sqs-mq - channel publish/subscribe over Amazon SQS.
//!
//! A `Publisher` sends messages (single or batched) to a queue; a
//! `Subscriber` polls the queue and re-emits every message tagged with the
//! channel it subscribed to. Subscriptions are tracked in one registry
//! shared by the whole process.

pub mod bus;
pub mod config;
pub mod mq;
pub mod utils;

pub use bus::{BusError, Envelope, Result};
pub use config::{BackendType, Config, ConfigError, PollingConfig, QueueConfig};
pub use mq::{
    create_publisher, create_subscriber, Delivery, Message, Publisher, Subscriber,
    SubscriptionRegistry,
};
