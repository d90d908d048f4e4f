//! Shared helpers: tracing bootstrap, backoff builders, serde adapters.

pub mod bootstrap;
pub mod retry;

/// Deserialize a [`std::time::Duration`] from an integer number of milliseconds.
///
/// Use with `#[serde(with = "crate::utils::millis")]` on `*_ms` config fields.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
