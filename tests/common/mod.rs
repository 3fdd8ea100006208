//! Shared utilities for integration tests.
//!
//! Provides a tracing layer that counts ERROR events, so tests can check
//! what fire-and-forget code logged.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Counts ERROR-level events seen while installed.
#[derive(Clone, Default)]
pub struct ErrorCounter {
    count: Arc<AtomicUsize>,
}

impl ErrorCounter {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Install an `ErrorCounter` as the thread's default subscriber.
///
/// Only sees events from the current thread, so use it from
/// current-thread tokio tests.
pub fn capture_errors() -> (ErrorCounter, DefaultGuard) {
    let counter = ErrorCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (counter, guard)
}

/// Time allowed for spawned tasks to settle.
pub const SETTLE: Duration = Duration::from_millis(50);

/// Generous upper bound for async deliveries.
pub const TIMEOUT: Duration = Duration::from_secs(5);
