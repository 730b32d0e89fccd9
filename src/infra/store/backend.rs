//! The seam to the backing key-value store.

use {
    async_trait::async_trait,
    std::{collections::HashMap, sync::Arc},
    tokio::sync::{mpsc, Mutex, RwLock},
};

#[derive(Debug, thiserror::Error)]
#[error("store backend error: {0}")]
pub struct BackendError(pub String);

/// A message received on a subscribed channel.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }

    /// The next published payload; `None` once the publisher side is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Get/set/del plus publish/subscribe over one key space.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;
    async fn set(&self, key: &str, value: String) -> Result<(), BackendError>;
    async fn del(&self, key: &str) -> Result<(), BackendError>;
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BackendError>;
    /// Subscriptions are served by a connection dedicated to subscribing;
    /// they never contend with reads and writes.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BackendError>;
}

/// An in-process backend. Serves the tests and single-process deployments;
/// production instances share state through the Redis backend instead.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), BackendError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), BackendError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<(), BackendError> {
        if let Some(subscribers) = self.subscribers.lock().await.get_mut(channel) {
            subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BackendError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }
}
