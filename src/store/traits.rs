//! State store trait and change feed

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::StoreError;

/// Change observed on the shared store, as seen by another tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Key that changed
    pub key: String,
    /// New value, `None` when the key was removed
    pub new_value: Option<String>,
}

/// Change record as it travels between store handles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChangeEnvelope {
    pub origin: Uuid,
    pub key: String,
    pub new_value: Option<String>,
}

/// Stream of changes made by *other* handles of the same store.
///
/// Writes made through the subscribing handle are filtered out, matching
/// browser `storage` events which never fire in the tab that wrote.
pub struct StorageEvents {
    rx: broadcast::Receiver<ChangeEnvelope>,
    origin: Uuid,
}

impl StorageEvents {
    pub(crate) fn new(rx: broadcast::Receiver<ChangeEnvelope>, origin: Uuid) -> Self {
        Self { rx, origin }
    }

    /// Wait for the next foreign change. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if envelope.origin == self.origin => continue,
                Ok(envelope) => {
                    return Some(StorageEvent {
                        key: envelope.key,
                        new_value: envelope.new_value,
                    })
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "storage listener lagged, some changes were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) if envelope.origin == self.origin => continue,
                Ok(envelope) => {
                    return Some(StorageEvent {
                        key: envelope.key,
                        new_value: envelope.new_value,
                    })
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "storage listener lagged, some changes were dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

/// Trait for persisted key-value backends shared between tabs
///
/// Values are opaque strings (JSON for structured state), the same model as
/// browser `localStorage`. Every handle has its own origin; writes through one
/// handle are announced to subscribers on every other handle.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Get the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, notifying other handles if it changed
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`, notifying other handles if it existed
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Subscribe to changes made through other handles
    fn subscribe(&self) -> StorageEvents;

    /// List all keys (optional)
    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Backend("keys not implemented".to_string()))
    }

    /// Remove every key (optional)
    async fn clear(&self) -> Result<(), StoreError> {
        Err(StoreError::Backend("clear not implemented".to_string()))
    }
}
