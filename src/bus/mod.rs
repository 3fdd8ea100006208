//! Queue backend abstraction.
//!
//! This module contains:
//! - `QueueProducer` trait: sends envelopes to a queue
//! - `ConsumerFactory` / `ReceiveLoop` traits: poll a queue and hand each
//!   message to a delivery handler
//! - `Envelope`, `ReceivedMessage`, `Completion`: the values crossing the seam
//! - Implementations: SQS, in-memory channel queues, Mock

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::config::{ConfigError, QueueConfig};

// Implementation modules
pub mod channel;
pub mod mock;
#[cfg(feature = "sqs")]
pub mod sqs;

// Re-exports
pub use channel::{InMemoryBroker, InMemoryConsumerFactory, InMemoryProducer};
pub use mock::{MockConsumerFactory, MockProducer};
#[cfg(feature = "sqs")]
pub use sqs::{SqsBackend, SqsConsumerFactory, SqsProducer};

/// Message reported when an envelope lacks its id or body.
pub const MISSING_ID_OR_BODY: &str = "Object messages must have 'id' and 'body' props";

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Invalid payload: {0}")]
    Payload(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),
}

/// A single outbound message as handed to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Batch-local identifier (`"0"`, `"1"`, ...).
    pub id: String,
    /// Message body. `None` when the caller published nothing.
    pub body: Option<Value>,
}

impl Envelope {
    pub fn new(id: impl Into<String>, body: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            body: Some(body.into()),
        }
    }

    /// Body as sent over the wire: strings raw, anything else as JSON text.
    pub fn body_text(&self) -> Option<String> {
        match self.body.as_ref()? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Reject envelopes a queue cannot accept.
///
/// Every envelope needs a non-empty id and a body; ids must be distinct
/// within one send.
pub fn validate_envelopes(envelopes: &[Envelope]) -> Result<()> {
    if envelopes.is_empty() {
        return Err(BusError::Payload("no messages to send".to_string()));
    }

    let mut seen = HashSet::with_capacity(envelopes.len());
    for envelope in envelopes {
        if envelope.id.is_empty() || envelope.body.is_none() {
            return Err(BusError::Payload(MISSING_ID_OR_BODY.to_string()));
        }
        if !seen.insert(envelope.id.as_str()) {
            return Err(BusError::Payload(format!(
                "duplicate message id '{}' in batch",
                envelope.id
            )));
        }
    }
    Ok(())
}

/// A message handed over by a receive loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Backend-assigned message id.
    pub message_id: Option<String>,
    /// Raw message body.
    pub body: Option<String>,
    /// How many times this message has been handed out, this one included.
    pub receive_count: u32,
}

impl ReceivedMessage {
    pub fn with_body(body: impl Into<String>) -> Self {
        Self {
            message_id: None,
            body: Some(body.into()),
            receive_count: 1,
        }
    }
}

/// Acknowledgement token for one delivered message.
///
/// Calling [`Completion::complete`] tells the receive loop the message was
/// processed and may be deleted. Dropping it leaves the message on the queue
/// for redelivery.
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<()>,
}

impl Completion {
    /// Create a token and the receiver the receive loop waits on.
    pub fn pair() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Acknowledge the delivery.
    pub fn complete(self) {
        // Receiver gone means the loop already gave up on this message.
        let _ = self.tx.send(());
    }
}

/// Callback invoked once per delivered message.
pub type DeliveryHandler = Arc<dyn Fn(ReceivedMessage, Completion) + Send + Sync>;

/// Interface for sending envelopes to a queue.
///
/// Implementations:
/// - `SqsProducer`: Amazon SQS `SendMessageBatch`
/// - `InMemoryProducer`: in-process queues
/// - `MockProducer`: records sends for testing
#[async_trait]
pub trait QueueProducer: Send + Sync {
    /// Send one or more envelopes.
    ///
    /// Fails with `BusError::Payload` when an envelope lacks its id or body,
    /// and with `BusError::Delivery` when the transport fails.
    async fn send(&self, envelopes: Vec<Envelope>) -> Result<()>;
}

/// A running (or stoppable) poll/delivery process.
pub trait ReceiveLoop: Send {
    /// Start polling. Starting a running loop does nothing.
    fn start(&mut self);

    /// Stop polling. Stopping a stopped loop does nothing. Messages already
    /// handed to the delivery handler still complete.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Creates receive loops bound to a delivery handler.
pub trait ConsumerFactory: Send + Sync {
    /// Build a loop for the queue in `config` that calls `handler` per message.
    /// The loop is returned stopped.
    fn create(&self, config: &QueueConfig, handler: DeliveryHandler) -> Result<Box<dyn ReceiveLoop>>;
}

impl fmt::Debug for dyn ReceiveLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiveLoop")
            .field("running", &self.is_running())
            .finish()
    }
}
