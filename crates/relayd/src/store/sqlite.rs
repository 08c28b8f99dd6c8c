//! SQLite-backed message store.
//!
//! rusqlite is synchronous, so the connection sits behind
//! `Arc<Mutex<Connection>>` and every query runs on the blocking pool.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use relay_core::{ChatMessage, Identity, MessageId};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use tracing::info;

use super::{MessageStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    sender      TEXT    NOT NULL,
    recipient   TEXT,
    content     TEXT    NOT NULL,
    sent_at     TEXT    NOT NULL,
    sent_at_us  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages (sender, recipient);
CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages (recipient);
";

/// Message store persisted to a single SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Creates the parent directory if needed, enables WAL and applies the
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), "SQLite store opened");
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&*conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let id: i64 = row.get(0)?;
    let sender: String = row.get(1)?;
    let recipient: Option<String> = row.get(2)?;
    let content: String = row.get(3)?;
    let sent_at: String = row.get(4)?;

    Ok(
        ChatMessage::new(Identity::new(sender), recipient.map(Identity::new), content)
            .with_timestamp(parse_timestamp(4, &sent_at)?)
            .with_id(MessageId::new(id)),
    )
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn record(&self, message: ChatMessage) -> Result<ChatMessage, StoreError> {
        self.with_conn(move |conn| {
            let timestamp = message.timestamp.unwrap_or_else(Utc::now);

            conn.execute(
                "INSERT INTO messages (sender, recipient, content, sent_at, sent_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.sender.as_str(),
                    message.recipient.as_ref().map(Identity::as_str),
                    message.content,
                    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                    timestamp.timestamp_micros(),
                ],
            )?;
            let id = conn.last_insert_rowid();

            Ok(message
                .with_timestamp(timestamp)
                .with_id(MessageId::new(id)))
        })
        .await
    }

    async fn query_between(
        &self,
        a: &Identity,
        b: &Identity,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let (a, b) = (a.as_str().to_owned(), b.as_str().to_owned());

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender, recipient, content, sent_at
                 FROM messages
                 WHERE (sender = ?1 AND recipient = ?2)
                    OR (sender = ?2 AND recipient = ?1)
                 ORDER BY sent_at_us ASC, id ASC",
            )?;

            let history = stmt
                .query_map(params![a, b], row_to_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(history)
        })
        .await
    }

    async fn list_peers(&self, identity: &Identity) -> Result<BTreeSet<Identity>, StoreError> {
        let me = identity.as_str().to_owned();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT sender FROM messages
                 WHERE recipient = ?1 AND sender <> ?1
                 UNION
                 SELECT recipient FROM messages
                 WHERE sender = ?1 AND recipient IS NOT NULL AND recipient <> ?1",
            )?;

            let peers = stmt
                .query_map(params![me], |row| row.get::<_, String>(0))?
                .map(|peer| peer.map(Identity::new))
                .collect::<Result<BTreeSet<_>, _>>()?;
            Ok(peers)
        })
        .await
    }
}

impl SqliteStore {
    /// Total number of stored messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count(&self) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let count =
                conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get::<_, i64>(0))?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
        .await
    }
}
