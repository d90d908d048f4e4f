//! caskeep: durable aggregates over a compare-and-swap key-value store.
//!
//! Small pieces of shared state (user accounts, the lobby directory, per-lobby
//! game snapshots) are each owned by a single-writer actor. Actors translate
//! commands into compare-and-swap writes, retry idempotently until the write
//! lands, and are restarted by a supervisor that rebuilds their projection from
//! the store. Sagas orchestrate the multi-step workflows on top.

pub mod aggregate;
pub mod config;
pub mod domains;
pub mod gateway;
pub mod saga;
pub mod storage;
pub mod supervisor;
pub mod utils;
