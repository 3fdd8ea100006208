//! Retry utilities: backoff builders for queue polling.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff between failed `ReceiveMessage` calls.
///
/// - Min delay: 100ms
/// - Max delay: 10s
/// - Max attempts: 10 (callers fall back to the max delay afterwards)
/// - Jitter enabled
pub fn receive_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(10))
        .with_max_times(10)
        .with_jitter()
}
