//! Chat message domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identity::Identity;

/// Store-assigned message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chat message as it moves through the relay.
///
/// Built by the reader path from an inbound frame, stamped once with the
/// sender (and a timestamp when it is going to be persisted), then treated
/// as immutable. `id` is only set on messages read back from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Option<MessageId>,
    pub sender: Identity,
    pub recipient: Option<Identity>,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Creates an unstamped message.
    pub fn new(sender: Identity, recipient: Option<Identity>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            sender,
            recipient,
            content: content.into(),
            timestamp: None,
        }
    }

    /// Returns the message with its timestamp set.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Returns the message with its store id set.
    #[must_use]
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Checks if this message was exchanged between `a` and `b`, in either direction.
    pub fn is_between(&self, a: &Identity, b: &Identity) -> bool {
        let to = match &self.recipient {
            Some(r) => r,
            None => return false,
        };
        (&self.sender == a && to == b) || (&self.sender == b && to == a)
    }

    /// Returns the other party of this message as seen from `identity`.
    ///
    /// `None` if `identity` took no part in the message, or if the message
    /// has no recipient (broadcast traffic has no counterpart).
    pub fn counterpart(&self, identity: &Identity) -> Option<&Identity> {
        let recipient = self.recipient.as_ref()?;
        if &self.sender == identity && recipient != identity {
            Some(recipient)
        } else if recipient == identity && &self.sender != identity {
            Some(&self.sender)
        } else {
            None
        }
    }
}
