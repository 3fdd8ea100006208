//! In-memory queue backend for standalone mode.
//!
//! Named queues live in an `InMemoryBroker`; producers push onto them and
//! receive loops drain them on tokio tasks. Delivery is at-least-once: a
//! message whose `Completion` is dropped goes back on the queue.
//! Ideal for local development and testing without external dependencies.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use super::{
    validate_envelopes, BusError, Completion, ConsumerFactory, DeliveryHandler, Envelope,
    QueueProducer, ReceiveLoop, ReceivedMessage, Result,
};
use crate::config::QueueConfig;

/// Minimum delay before an unacknowledged message becomes visible again.
const REDELIVERY_DELAY: Duration = Duration::from_millis(10);

static GLOBAL_BROKER: LazyLock<InMemoryBroker> = LazyLock::new(InMemoryBroker::new);

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    receive_count: u32,
}

#[derive(Default)]
struct InMemoryQueue {
    messages: Mutex<VecDeque<StoredMessage>>,
    notify: Notify,
    next_id: AtomicU64,
}

impl InMemoryQueue {
    fn push(&self, message: StoredMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(message);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<StoredMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Registry of named in-process queues.
///
/// Clones share the same queues. `InMemoryBroker::global()` is the broker
/// used when the memory backend is selected through configuration.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    queues: Arc<Mutex<HashMap<String, Arc<InMemoryQueue>>>>,
}

impl InMemoryBroker {
    /// Create an isolated broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide broker.
    pub fn global() -> Self {
        GLOBAL_BROKER.clone()
    }

    fn queue(&self, name: &str) -> Arc<InMemoryQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(queues.entry(name.to_string()).or_default())
    }

    /// Number of messages waiting on a queue.
    pub fn depth(&self, name: &str) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Create a producer for the queue named by `config.queue_url`.
    pub fn producer(&self, config: &QueueConfig) -> Result<InMemoryProducer> {
        let queue_url = config.queue_url()?.to_string();
        Ok(InMemoryProducer {
            queue: self.queue(&queue_url),
            queue_url,
        })
    }

    pub fn consumer_factory(&self) -> InMemoryConsumerFactory {
        InMemoryConsumerFactory {
            broker: self.clone(),
        }
    }
}

/// Producer pushing onto an in-memory queue.
pub struct InMemoryProducer {
    queue: Arc<InMemoryQueue>,
    queue_url: String,
}

#[async_trait]
impl QueueProducer for InMemoryProducer {
    async fn send(&self, envelopes: Vec<Envelope>) -> Result<()> {
        validate_envelopes(&envelopes)?;

        for envelope in &envelopes {
            let body = envelope.body_text().ok_or_else(|| {
                BusError::Payload(super::MISSING_ID_OR_BODY.to_string())
            })?;
            let id = self.queue.next_id.fetch_add(1, Ordering::Relaxed);
            self.queue.push(StoredMessage {
                message_id: format!("{}-{}", self.queue_url, id),
                body,
                receive_count: 0,
            });
        }

        debug!(
            queue = %self.queue_url,
            count = envelopes.len(),
            "Enqueued messages"
        );
        Ok(())
    }
}

/// Creates receive loops draining in-memory queues.
#[derive(Clone)]
pub struct InMemoryConsumerFactory {
    broker: InMemoryBroker,
}

impl ConsumerFactory for InMemoryConsumerFactory {
    fn create(&self, config: &QueueConfig, handler: DeliveryHandler) -> Result<Box<dyn ReceiveLoop>> {
        let queue_url = config.queue_url()?.to_string();
        let runtime = Handle::try_current()
            .map_err(|e| BusError::Subscribe(format!("No tokio runtime: {}", e)))?;
        let redelivery_delay = config
            .polling
            .visibility_timeout_secs
            .map(|secs| Duration::from_secs(secs.max(0) as u64))
            .unwrap_or(REDELIVERY_DELAY)
            .max(REDELIVERY_DELAY);

        Ok(Box::new(InMemoryReceiveLoop {
            queue: self.broker.queue(&queue_url),
            queue_url,
            handler,
            runtime,
            redelivery_delay,
            shutdown: None,
        }))
    }
}

struct InMemoryReceiveLoop {
    queue: Arc<InMemoryQueue>,
    queue_url: String,
    handler: DeliveryHandler,
    runtime: Handle,
    redelivery_delay: Duration,
    shutdown: Option<watch::Sender<bool>>,
}

impl ReceiveLoop for InMemoryReceiveLoop {
    fn start(&mut self) {
        if self.shutdown.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);

        let queue = Arc::clone(&self.queue);
        let queue_url = self.queue_url.clone();
        let handler = Arc::clone(&self.handler);
        let redelivery_delay = self.redelivery_delay;

        self.runtime.spawn(async move {
            info!(queue = %queue_url, "Starting in-memory consumer");
            consume(queue, &queue_url, handler, redelivery_delay, shutdown_rx).await;
            info!(queue = %queue_url, "In-memory consumer stopped");
        });
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
    }

    fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }
}

impl Drop for InMemoryReceiveLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn consume(
    queue: Arc<InMemoryQueue>,
    queue_url: &str,
    handler: DeliveryHandler,
    redelivery_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            // Hand a wakeup we may have consumed to another loop on this queue
            if queue.len() > 0 {
                queue.notify.notify_one();
            }
            return;
        }

        let mut stored = match queue.pop() {
            Some(stored) => stored,
            None => {
                // Shutdown first: a dropped `Notified` forwards its permit
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => return,
                    _ = queue.notify.notified() => {}
                }
                continue;
            }
        };

        stored.receive_count += 1;
        let message = ReceivedMessage {
            message_id: Some(stored.message_id.clone()),
            body: Some(stored.body.clone()),
            receive_count: stored.receive_count,
        };

        let (completion, acked) = Completion::pair();
        handler(message, completion);

        match acked.await {
            Ok(()) => {
                debug!(
                    queue = %queue_url,
                    message_id = %stored.message_id,
                    "Message processed"
                );
            }
            Err(_) => {
                warn!(
                    queue = %queue_url,
                    message_id = %stored.message_id,
                    receive_count = stored.receive_count,
                    "Message not acknowledged, will be redelivered"
                );
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    tokio::time::sleep(redelivery_delay).await;
                    queue.push(stored);
                });
            }
        }
    }
}
