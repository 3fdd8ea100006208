//! Channel subscriber: owns the receive loop and routes deliveries.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::SubscriptionRegistry;
use crate::bus::{Completion, ConsumerFactory, DeliveryHandler, ReceiveLoop, ReceivedMessage, Result};
use crate::config::QueueConfig;

/// A message delivered on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: String,
    pub body: Option<String>,
}

type Listeners = Mutex<Vec<mpsc::UnboundedSender<Delivery>>>;

enum SubscriberState {
    Idle,
    Subscribed {
        channel: String,
        receive_loop: Box<dyn ReceiveLoop>,
    },
}

/// Subscribes to a channel and re-emits its messages as [`Delivery`] events.
///
/// Each instance runs at most one receive loop. The channel → handler
/// mapping lives in a [`SubscriptionRegistry`] shared by every subscriber
/// of the process unless one is injected with [`Subscriber::with_registry`].
pub struct Subscriber {
    config: QueueConfig,
    consumers: Arc<dyn ConsumerFactory>,
    registry: Arc<SubscriptionRegistry>,
    listeners: Arc<Listeners>,
    state: Mutex<SubscriberState>,
}

impl Subscriber {
    /// Create an idle subscriber using the process-wide registry.
    ///
    /// Fails with a configuration error when the queue target is missing,
    /// before `consumers` is used.
    pub fn new(config: QueueConfig, consumers: Arc<dyn ConsumerFactory>) -> Result<Self> {
        Self::with_registry(config, consumers, SubscriptionRegistry::global())
    }

    /// Create an idle subscriber sharing `registry`.
    pub fn with_registry(
        config: QueueConfig,
        consumers: Arc<dyn ConsumerFactory>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::validated(config, consumers, registry))
    }

    pub(crate) fn validated(
        config: QueueConfig,
        consumers: Arc<dyn ConsumerFactory>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            config,
            consumers,
            registry,
            listeners: Arc::default(),
            state: Mutex::new(SubscriberState::Idle),
        }
    }

    /// Validate the config, then build an SQS consumer factory for it.
    #[cfg(feature = "sqs")]
    pub async fn connect(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::connect_validated(config).await)
    }

    #[cfg(feature = "sqs")]
    pub(crate) async fn connect_validated(config: QueueConfig) -> Self {
        let backend = crate::bus::SqsBackend::connect(&config).await;
        Self::validated(
            config,
            Arc::new(backend.consumer_factory()),
            SubscriptionRegistry::global(),
        )
    }

    fn state(&self) -> MutexGuard<'_, SubscriberState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive every delivery this subscriber routes from now on.
    ///
    /// Each listener gets its own unbounded queue, so a slow listener never
    /// misses a message that was acknowledged. Dropping the receiver
    /// unregisters it on the next delivery.
    pub fn listen(&self) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.listeners).push(tx);
        rx
    }

    /// Start routing `channel`.
    ///
    /// Any loop this instance is running is stopped first, and a stale
    /// registration for `channel` is dropped. Registrations of other
    /// channels are left alone.
    pub fn subscribe(&self, channel: &str) -> Result<()> {
        let mut state = self.state();
        self.leave(&mut state, channel);

        let handler = self.delivery_handler(channel);
        let mut receive_loop = self.consumers.create(&self.config, Arc::clone(&handler))?;
        receive_loop.start();

        *state = SubscriberState::Subscribed {
            channel: channel.to_string(),
            receive_loop,
        };
        self.registry.register(channel, handler);

        info!(
            channel = %channel,
            queue_url = ?self.config.queue_url,
            "Subscribed"
        );
        Ok(())
    }

    /// Stop this instance's receive loop and forget `channel`.
    ///
    /// Safe to call for channels that were never subscribed.
    pub fn unsubscribe(&self, channel: &str) {
        let mut state = self.state();
        self.leave(&mut state, channel);
    }

    fn leave(&self, state: &mut SubscriberState, channel: &str) {
        if let SubscriberState::Subscribed {
            channel: active,
            mut receive_loop,
        } = std::mem::replace(state, SubscriberState::Idle)
        {
            receive_loop.stop();
            debug!(channel = %active, "Stopped receive loop");
        }

        if self.registry.remove(channel).is_none() {
            debug!(channel = %channel, "No channel to unsubscribe from");
            return;
        }
        debug!(channel = %channel, "Unsubscribed");
    }

    /// Handler tagging each message with `channel`, then acknowledging it.
    fn delivery_handler(&self, channel: &str) -> DeliveryHandler {
        let listeners: Weak<Listeners> = Arc::downgrade(&self.listeners);
        let channel = channel.to_string();

        Arc::new(move |message: ReceivedMessage, completion: Completion| {
            let delivery = Delivery {
                channel: channel.clone(),
                body: message.body,
            };
            let delivered = listeners
                .upgrade()
                .map(|listeners| dispatch(&listeners, &delivery))
                .unwrap_or(0);
            if delivered == 0 {
                debug!(channel = %channel, "No listeners for delivered message");
            }
            completion.complete();
        })
    }

    /// Channel of the running receive loop, if any.
    pub fn active_channel(&self) -> Option<String> {
        match &*self.state() {
            SubscriberState::Idle => None,
            SubscriberState::Subscribed { channel, .. } => Some(channel.clone()),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        matches!(&*self.state(), SubscriberState::Subscribed { receive_loop, .. } if receive_loop.is_running())
    }

    /// Every channel registered in the shared registry, sorted.
    pub fn subscribed_channels(&self) -> Vec<String> {
        self.registry.channels()
    }

    pub fn shares_registry_with(&self, other: &Subscriber) -> bool {
        Arc::ptr_eq(&self.registry, &other.registry)
    }
}

fn lock(listeners: &Listeners) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<Delivery>>> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Queue `delivery` for every open listener, dropping closed ones.
/// Returns how many listeners received it.
fn dispatch(listeners: &Listeners, delivery: &Delivery) -> usize {
    let mut listeners = lock(listeners);
    listeners.retain(|tx| tx.send(delivery.clone()).is_ok());
    listeners.len()
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("queue_url", &self.config.queue_url)
            .field("active_channel", &self.active_channel())
            .finish()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let SubscriberState::Subscribed { receive_loop, .. } = state {
            receive_loop.stop();
        }
    }
}

#[cfg(test)]
mod tests;
