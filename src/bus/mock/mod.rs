//! Mock queue backend for testing.
//!
//! `MockProducer` records every send; `MockConsumerFactory` records every
//! receive loop it creates and lets tests push deliveries through them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    validate_envelopes, BusError, Completion, ConsumerFactory, DeliveryHandler, Envelope,
    QueueProducer, ReceiveLoop, ReceivedMessage, Result,
};
use crate::config::QueueConfig;

/// Mock producer for testing.
///
/// Validates payloads like a real queue would, so invalid envelopes fail
/// with `BusError::Payload`.
#[derive(Default)]
pub struct MockProducer {
    sent: RwLock<Vec<Vec<Envelope>>>,
    fail_on_send: RwLock<bool>,
}

impl MockProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_send(&self, fail: bool) {
        *self.fail_on_send.write().await = fail;
    }

    /// Number of `send` calls so far, failed ones included.
    pub async fn send_count(&self) -> usize {
        self.sent.read().await.len()
    }

    /// Envelopes of every `send` call, in call order.
    pub async fn sent(&self) -> Vec<Vec<Envelope>> {
        self.sent.read().await.clone()
    }

    pub async fn take_sent(&self) -> Vec<Vec<Envelope>> {
        std::mem::take(&mut *self.sent.write().await)
    }

    /// Wait until at least `count` sends were made. Returns false on timeout.
    pub async fn wait_for_sends(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.send_count().await < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl QueueProducer for MockProducer {
    async fn send(&self, envelopes: Vec<Envelope>) -> Result<()> {
        self.sent.write().await.push(envelopes.clone());
        validate_envelopes(&envelopes)?;
        if *self.fail_on_send.read().await {
            return Err(BusError::Delivery("Mock send failure".to_string()));
        }
        Ok(())
    }
}

/// Observable state of one mock receive loop.
pub struct MockLoopState {
    queue_url: String,
    handler: DeliveryHandler,
    running: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl MockLoopState {
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Hand a message to the loop's handler, as the backend would.
    ///
    /// Returns whether the handler acknowledged it.
    pub fn deliver(&self, message: ReceivedMessage) -> bool {
        let (completion, mut acked) = Completion::pair();
        (self.handler)(message, completion);
        acked.try_recv().is_ok()
    }
}

struct MockReceiveLoop {
    state: Arc<MockLoopState>,
}

impl ReceiveLoop for MockReceiveLoop {
    fn start(&mut self) {
        if !self.state.running.swap(true, Ordering::SeqCst) {
            self.state.starts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn stop(&mut self) {
        if self.state.running.swap(false, Ordering::SeqCst) {
            self.state.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_running(&self) -> bool {
        self.state.is_running()
    }
}

/// Mock consumer factory for testing.
///
/// Clones share the same record of created loops.
#[derive(Clone, Default)]
pub struct MockConsumerFactory {
    loops: Arc<Mutex<Vec<Arc<MockLoopState>>>>,
    fail_on_create: Arc<AtomicBool>,
}

impl MockConsumerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_create(&self, fail: bool) {
        self.fail_on_create.store(fail, Ordering::SeqCst);
    }

    /// Every loop created so far, oldest first.
    pub fn loops(&self) -> Vec<Arc<MockLoopState>> {
        self.loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn loop_count(&self) -> usize {
        self.loops().len()
    }

    pub fn running_count(&self) -> usize {
        self.loops().iter().filter(|l| l.is_running()).count()
    }

    /// Deliver a body through the most recently created running loop.
    ///
    /// Returns `None` when no loop is running, otherwise whether the
    /// message was acknowledged.
    pub fn deliver(&self, body: &str) -> Option<bool> {
        let target = self.loops().into_iter().rev().find(|l| l.is_running())?;
        Some(target.deliver(ReceivedMessage::with_body(body)))
    }
}

impl ConsumerFactory for MockConsumerFactory {
    fn create(&self, config: &QueueConfig, handler: DeliveryHandler) -> Result<Box<dyn ReceiveLoop>> {
        if self.fail_on_create.load(Ordering::SeqCst) {
            return Err(BusError::Subscribe("Mock create failure".to_string()));
        }

        let queue_url = config.queue_url()?.to_string();
        let state = Arc::new(MockLoopState {
            queue_url,
            handler,
            running: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        self.loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&state));

        Ok(Box::new(MockReceiveLoop { state }))
    }
}
