//! Notification boundary: how saga outcomes reach a connection.

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::{mpsc, Mutex};

use super::Notification;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification channel closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Delivers a notification to the client behind `connection_id`.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, connection_id: &str, notification: &Notification)
        -> Result<(), NotifyError>;
}

/// Forwards notifications into an in-process channel.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<(String, Notification)>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, Notification)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(
        &self,
        connection_id: &str,
        notification: &Notification,
    ) -> Result<(), NotifyError> {
        self.tx
            .send((connection_id.to_string(), notification.clone()))
            .map_err(|_| NotifyError::Closed)
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    connection_id: &'a str,
    #[serde(flatten)]
    notification: &'a Notification,
}

/// Writes one JSON object per line to stdout.
pub struct StdoutNotifier {
    out: Mutex<Stdout>,
}

impl StdoutNotifier {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdoutNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON line for a notification, newline included.
pub fn encode_line(connection_id: &str, notification: &Notification) -> Result<Vec<u8>, NotifyError> {
    let mut line = serde_json::to_vec(&Envelope {
        connection_id,
        notification,
    })?;
    line.push(b'\n');
    Ok(line)
}

#[async_trait]
impl Notifier for StdoutNotifier {
    async fn notify(
        &self,
        connection_id: &str,
        notification: &Notification,
    ) -> Result<(), NotifyError> {
        let line = encode_line(connection_id, notification)?;
        let mut out = self.out.lock().await;
        out.write_all(&line).await?;
        out.flush().await?;
        Ok(())
    }
}
