//! Process-wide channel subscription registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use crate::bus::DeliveryHandler;

static GLOBAL_REGISTRY: LazyLock<Arc<SubscriptionRegistry>> =
    LazyLock::new(|| Arc::new(SubscriptionRegistry::new()));

/// Mapping from channel name to the delivery handler currently routing it.
///
/// At most one handler is registered per channel; registering again
/// replaces the previous handler. Every [`Subscriber`](super::Subscriber)
/// built without an explicit registry shares [`SubscriptionRegistry::global`].
#[derive(Default)]
pub struct SubscriptionRegistry {
    handlers: Mutex<HashMap<String, DeliveryHandler>>,
}

impl SubscriptionRegistry {
    /// Create an isolated registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process. Never torn down.
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    fn handlers(&self) -> MutexGuard<'_, HashMap<String, DeliveryHandler>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for `channel`, returning the handler it replaced.
    pub(crate) fn register(&self, channel: &str, handler: DeliveryHandler) -> Option<DeliveryHandler> {
        self.handlers().insert(channel.to_string(), handler)
    }

    pub(crate) fn remove(&self, channel: &str) -> Option<DeliveryHandler> {
        self.handlers().remove(channel)
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.handlers().contains_key(channel)
    }

    /// Registered channel names, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.handlers().keys().cloned().collect();
        channels.sort();
        channels
    }

    pub fn len(&self) -> usize {
        self.handlers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers().is_empty()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("channels", &self.channels())
            .finish()
    }
}
