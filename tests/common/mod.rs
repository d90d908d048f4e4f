//! Shared utilities for integration tests.
//!
//! Starts a supervisor over a mock store with a channel notifier.

#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::mpsc;

use caskeep::config::Config;
use caskeep::saga::{ChannelNotifier, Notification};
use caskeep::storage::{KeyValueStore, MockKeyValueStore};
use caskeep::supervisor::Supervisor;

/// A running system plus its observable edges.
pub struct TestSystem {
    pub store: Arc<MockKeyValueStore>,
    pub supervisor: Supervisor,
    pub notifications: mpsc::UnboundedReceiver<(String, Notification)>,
}

impl TestSystem {
    pub fn start() -> Self {
        Self::on_store(Arc::new(MockKeyValueStore::new()))
    }

    /// Another node sharing `store`.
    pub fn on_store(store: Arc<MockKeyValueStore>) -> Self {
        Self::with_config(store, Config::for_test())
    }

    pub fn with_config(store: Arc<MockKeyValueStore>, config: Config) -> Self {
        let (notifier, notifications) = ChannelNotifier::new();
        let shared: Arc<dyn KeyValueStore> = store.clone();
        let supervisor = Supervisor::new(shared, &config, Arc::new(notifier));
        Self {
            store,
            supervisor,
            notifications,
        }
    }

    pub async fn create_account(&self, username: &str, password: &str) -> Notification {
        self.supervisor
            .create_account("test".to_string(), username.to_string(), password.into())
            .await
            .expect("saga task panicked")
    }

    pub async fn login(&self, username: &str, password: &str) -> Notification {
        self.supervisor
            .login("test".to_string(), username.to_string(), password.into())
            .await
            .expect("saga task panicked")
    }

    /// Run one JSON request line through the gateway.
    pub async fn request(&self, line: &str) -> Notification {
        let request = caskeep::gateway::parse_request(line).expect("valid request");
        caskeep::gateway::dispatch(&self.supervisor, request)
            .await
            .expect("saga task panicked")
    }
}
