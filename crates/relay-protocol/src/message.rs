//! Wire message types for client communication.

use chrono::{DateTime, Utc};
use relay_core::{ChatMessage, Identity, MessageId};
use serde::{Deserialize, Serialize};

/// The JSON object exchanged with browser clients.
///
/// Every field is optional on the wire. Absent fields are omitted on output
/// and unknown fields are ignored on input. `id` and `timestamp` are only
/// ever set by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            id: msg.id.map(MessageId::get),
            sender: Some(msg.sender.to_string()),
            recipient: msg.recipient.as_ref().map(ToString::to_string),
            content: (!msg.content.is_empty()).then(|| msg.content.clone()),
            timestamp: msg.timestamp,
        }
    }
}

/// Membership change announced to the room in broadcast mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerNotice {
    /// A peer connected
    Joined(Identity),
    /// A peer disconnected or was evicted
    Left(Identity),
}

impl PeerNotice {
    /// Human-readable announcement text.
    pub fn text(&self) -> String {
        match self {
            Self::Joined(id) => format!("{id} joined"),
            Self::Left(id) => format!("{id} left"),
        }
    }

    /// Builds the wire message carrying this notice.
    ///
    /// Notices have no sender so clients can tell them apart from chat.
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            content: Some(self.text()),
            ..WireMessage::default()
        }
    }
}

/// One entry of the `chats` response: a peer the user has talked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub username: Identity,
}

impl ChatSummary {
    pub fn new(username: Identity) -> Self {
        Self { username }
    }
}
