//! The Redis store backend.

use {
    super::backend::{Backend, BackendError, Subscription},
    async_trait::async_trait,
    futures::StreamExt,
    redis::{aio::ConnectionManager, AsyncCommands},
    tokio::sync::mpsc,
};

pub struct RedisBackend {
    client: redis::Client,
    /// Multiplexed connection for reads, writes and publishes. Cloning is
    /// cheap and clones share the underlying connection, so commands from
    /// concurrent workers interleave without serializing on a lock.
    connection: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(url).map_err(|err| BackendError(err.to_string()))?;
        let connection = ConnectionManager::new(client.clone())
            .await
            .map_err(|err| BackendError(err.to_string()))?;
        Ok(Self { client, connection })
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut connection = self.connection.clone();
        connection
            .get(key)
            .await
            .map_err(|err| BackendError(err.to_string()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), BackendError> {
        let mut connection = self.connection.clone();
        connection
            .set(key, value)
            .await
            .map_err(|err| BackendError(err.to_string()))
    }

    async fn del(&self, key: &str) -> Result<(), BackendError> {
        let mut connection = self.connection.clone();
        connection
            .del(key)
            .await
            .map_err(|err| BackendError(err.to_string()))
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<(), BackendError> {
        let mut connection = self.connection.clone();
        connection
            .publish(channel, payload)
            .await
            .map_err(|err| BackendError(err.to_string()))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BackendError> {
        // A subscribed Redis connection cannot serve regular commands, so
        // every subscription opens its own connection.
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|err| BackendError(err.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|err| BackendError(err.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(message) = messages.next().await {
                let Ok(payload) = message.get_payload::<String>() else {
                    continue;
                };
                if tx.send(payload).is_err() {
                    break;
                }
            }
        });
        Ok(Subscription::new(rx))
    }
}
