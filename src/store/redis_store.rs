//! Redis state store
//!
//! Lets separate processes share one persisted state the way browser tabs
//! share `localStorage`:
//! - Key: the namespaced key as given (e.g. `thriftease:cart.items`)
//! - Value: the raw string (JSON for structured state)
//! - Changes: announced as JSON envelopes on a pub/sub channel

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::traits::ChangeEnvelope;
use super::{StateStore, StorageEvents};
use crate::error::StoreError;

const EVENT_CAPACITY: usize = 256;

/// Default pub/sub channel used to announce changes
pub const DEFAULT_CHANNEL: &str = "thriftease:changes";

struct ListenerGuard(JoinHandle<()>);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Redis-backed state store
///
/// # Example
///
/// ```rust,ignore
/// use thriftease_session::RedisStore;
///
/// let client = redis::Client::open("redis://127.0.0.1/")?;
/// let store = RedisStore::new(client).await?;
/// ```
pub struct RedisStore {
    conn: Arc<ConnectionManager>,
    channel: String,
    origin: Uuid,
    events: broadcast::Sender<ChangeEnvelope>,
    _listener: Arc<ListenerGuard>,
}

impl RedisStore {
    /// Create a new Redis store on the default change channel
    pub async fn new(client: redis::Client) -> Result<Self, StoreError> {
        Self::with_channel(client, DEFAULT_CHANNEL).await
    }

    /// Create a new Redis store from a connection string
    pub async fn from_url(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Backend(format!("Failed to create Redis client: {}", e)))?;
        Self::new(client).await
    }

    /// Create a new Redis store announcing changes on a custom channel
    pub async fn with_channel(client: redis::Client, channel: &str) -> Result<Self, StoreError> {
        let conn = ConnectionManager::new(client.clone()).await?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let forward = events.clone();
        let listener = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!("Dropping unreadable change message: {}", e);
                        continue;
                    }
                };
                match serde_json::from_str::<ChangeEnvelope>(&payload) {
                    Ok(envelope) => {
                        let _ = forward.send(envelope);
                    }
                    Err(e) => tracing::warn!("Dropping malformed change message: {}", e),
                }
            }
            tracing::debug!("Redis change listener stopped");
        });

        Ok(Self {
            conn: Arc::new(conn),
            channel: channel.to_string(),
            origin: Uuid::new_v4(),
            events,
            _listener: Arc::new(ListenerGuard(listener)),
        })
    }

    async fn announce(&self, key: &str, new_value: Option<&str>) -> Result<(), StoreError> {
        let envelope = ChangeEnvelope {
            origin: self.origin,
            key: key.to_string(),
            new_value: new_value.map(str::to_string),
        };
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = (*self.conn).clone();
        conn.publish::<_, _, ()>(&self.channel, payload).await?;
        Ok(())
    }
}

impl Clone for RedisStore {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            channel: self.channel.clone(),
            origin: self.origin,
            events: self.events.clone(),
            _listener: Arc::clone(&self._listener),
        }
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = (*self.conn).clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = (*self.conn).clone();
        // GETSET-style swap so unchanged writes stay silent
        let previous: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("GET")
            .query_async(&mut conn)
            .await?;
        if previous.as_deref() != Some(value) {
            self.announce(key, Some(value)).await?;
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = (*self.conn).clone();
        let removed: usize = conn.del(key).await?;
        if removed > 0 {
            self.announce(key, None).await?;
        }
        Ok(())
    }

    fn subscribe(&self) -> StorageEvents {
        StorageEvents::new(self.events.subscribe(), self.origin)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = (*self.conn).clone();
        let keys: Vec<String> = redis::cmd("KEYS").arg("*").query_async(&mut conn).await?;
        Ok(keys)
    }
}
