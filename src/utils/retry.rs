//! Retry utilities: backoff builders for store access.
//!
//! Uses `backon`. CAS attempts are spaced by a fixed delay; hydration reads
//! back off exponentially with jitter.

use std::time::Duration;

use backon::{ConstantBuilder, ExponentialBuilder};

use crate::storage::ReducePolicy;

/// Fixed-delay backoff for compare-and-swap attempts.
///
/// `max_retries` bounds the total number of attempts, so the builder allows
/// `max_retries - 1` retries after the first one.
pub fn commit_backoff(policy: &ReducePolicy) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(policy.retry_delay)
        .with_max_times(policy.max_retries.saturating_sub(1) as usize)
}

/// Backoff for projection hydration reads after actor start.
///
/// - Min delay: 50ms
/// - Max delay: 2s
/// - Max attempts: 8
/// - Jitter enabled
pub fn hydration_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(8)
        .with_jitter()
}
