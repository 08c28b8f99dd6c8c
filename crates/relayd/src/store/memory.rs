//! In-process message store.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use relay_core::{ChatMessage, Identity, MessageId};
use tokio::sync::RwLock;

use super::{MessageStore, StoreError};

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    messages: Vec<ChatMessage>,
}

/// Keeps every message in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    pub async fn len(&self) -> usize {
        self.inner.read().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn record(&self, message: ChatMessage) -> Result<ChatMessage, StoreError> {
        let mut inner = self.inner.write().await;

        inner.next_id += 1;
        let timestamp = message.timestamp.unwrap_or_else(Utc::now);
        let stored = message
            .with_timestamp(timestamp)
            .with_id(MessageId::new(inner.next_id));

        inner.messages.push(stored.clone());
        Ok(stored)
    }

    async fn query_between(
        &self,
        a: &Identity,
        b: &Identity,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let inner = self.inner.read().await;

        let mut history: Vec<ChatMessage> = inner
            .messages
            .iter()
            .filter(|m| m.is_between(a, b))
            .cloned()
            .collect();
        history.sort_by_key(|m| (m.timestamp, m.id));

        Ok(history)
    }

    async fn list_peers(&self, identity: &Identity) -> Result<BTreeSet<Identity>, StoreError> {
        let inner = self.inner.read().await;

        Ok(inner
            .messages
            .iter()
            .filter_map(|m| m.counterpart(identity))
            .cloned()
            .collect())
    }
}
