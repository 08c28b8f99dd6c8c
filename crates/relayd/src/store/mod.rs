//! Message persistence.
//!
//! The hub never talks to a store. Reader paths hand stamped messages to the
//! [`Recorder`], whose background task writes them through a
//! [`MessageStore`]; the HTTP query surface reads through the same trait.
//!
//! Two implementations ship with the daemon:
//! - [`MemoryStore`] - process-local, lost on restart
//! - [`SqliteStore`] - a single SQLite file

use std::collections::BTreeSet;

use async_trait::async_trait;
use relay_core::{ChatMessage, Identity};
use thiserror::Error;

mod memory;
mod recorder;
mod sqlite;

pub use memory::MemoryStore;
pub use recorder::{spawn_recorder, Recorder, DEFAULT_RECORDER_CAPACITY};
pub use sqlite::SqliteStore;

/// Storage backend for chat history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a message and returns it with its store id.
    ///
    /// A message without a timestamp is stamped with the current time.
    async fn record(&self, message: ChatMessage) -> Result<ChatMessage, StoreError>;

    /// All messages exchanged between `a` and `b`, in either direction,
    /// ordered by ascending timestamp (ties broken by id).
    async fn query_between(&self, a: &Identity, b: &Identity)
        -> Result<Vec<ChatMessage>, StoreError>;

    /// Distinct identities that exchanged at least one message with
    /// `identity`, excluding `identity` itself.
    async fn list_peers(&self, identity: &Identity) -> Result<BTreeSet<Identity>, StoreError>;
}

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Blocking task failed: {0}")]
    Task(String),
}
