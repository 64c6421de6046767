//! In-memory state store
//!
//! Plays the role of browser `localStorage` within one process. Handles
//! created with [`MemoryStore::open_tab`] share the same data and see each
//! other's writes as storage events.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::traits::ChangeEnvelope;
use super::{StateStore, StorageEvents};
use crate::error::StoreError;

const EVENT_CAPACITY: usize = 256;

/// In-memory state store
///
/// Data lives as long as any handle does; nothing survives the process.
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
    events: broadcast::Sender<ChangeEnvelope>,
    origin: Uuid,
}

impl MemoryStore {
    /// Create a new, empty store
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            events,
            origin: Uuid::new_v4(),
        }
    }

    /// Open another handle on the same data with its own origin, like a
    /// second browser tab on the same site
    pub fn open_tab(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            events: self.events.clone(),
            origin: Uuid::new_v4(),
        }
    }

    /// Write a raw value without announcing it, for seeding fixtures
    pub fn insert_raw<K: Into<String>, V: Into<String>>(&self, key: K, value: V) {
        self.entries.write().insert(key.into(), value.into());
    }

    fn announce(&self, key: &str, new_value: Option<&str>) {
        let envelope = ChangeEnvelope {
            origin: self.origin,
            key: key.to_string(),
            new_value: new_value.map(str::to_string),
        };
        // No subscribers is fine
        let _ = self.events.send(envelope);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            events: self.events.clone(),
            origin: self.origin,
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let previous = self
            .entries
            .write()
            .insert(key.to_string(), value.to_string());
        if previous.as_deref() != Some(value) {
            self.announce(key, Some(value));
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let previous = self.entries.write().remove(key);
        if previous.is_some() {
            self.announce(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> StorageEvents {
        StorageEvents::new(self.events.subscribe(), self.origin)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let removed: Vec<String> = self.entries.write().drain().map(|(k, _)| k).collect();
        for key in removed {
            self.announce(&key, None);
        }
        Ok(())
    }
}
