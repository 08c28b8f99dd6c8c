//! Hub actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `HubActor`:
//! - `HubCommand`: Requests sent to the control loop
//! - `HubError`: Errors that can occur while talking to the hub
//! - `HubEvent`: Membership changes published to subscribers
//!
//! All types are designed for async message passing and follow the panic-free policy.

use relay_core::{ChatMessage, ConnectionId, Identity};
use thiserror::Error;
use tokio::sync::oneshot;

use super::member::Member;

// ============================================================================
// Hub Commands
// ============================================================================

/// Commands sent to the hub actor.
///
/// Commands that need an answer carry a oneshot sender; `Route` is
/// fire-and-forget so a reader never waits on delivery.
#[derive(Debug)]
pub enum HubCommand {
    /// Add a connection to the membership table.
    ///
    /// Always succeeds. In direct mode an existing connection with the same
    /// identity is closed and replaced.
    Register {
        /// The connection to add
        member: Member,
        /// Acknowledged once the connection is routable
        respond_to: oneshot::Sender<()>,
    },

    /// Remove a connection and close its mailbox.
    ///
    /// Responds `false` when the connection was already gone.
    Unregister {
        /// Connection to remove
        connection: ConnectionId,
        /// Channel to send whether anything was removed
        respond_to: oneshot::Sender<bool>,
    },

    /// Route a stamped message according to the routing policy.
    Route {
        /// Connection the message arrived on (excluded from broadcast)
        from: ConnectionId,
        /// The message, sender already stamped
        message: ChatMessage,
    },

    /// Snapshot of the current membership table.
    ListMembers {
        respond_to: oneshot::Sender<Vec<MemberInfo>>,
    },

    /// Find the connection currently registered under an identity.
    Lookup {
        identity: Identity,
        respond_to: oneshot::Sender<Option<ConnectionId>>,
    },

    /// Close every mailbox and stop the control loop.
    ///
    /// Responds with the number of connections that were closed.
    Shutdown { respond_to: oneshot::Sender<usize> },
}

/// Read-only view of one table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub connection: ConnectionId,
    pub identity: Identity,
}

// ============================================================================
// Hub Errors
// ============================================================================

/// Errors that can occur during hub operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The command or response channel was closed.
    ///
    /// This indicates the hub was shut down.
    #[error("hub is not running")]
    ChannelClosed,
}

// ============================================================================
// Hub Events
// ============================================================================

/// Membership events published by the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A connection was added to the table.
    Joined {
        connection: ConnectionId,
        identity: Identity,
    },

    /// A connection was removed from the table and its mailbox closed.
    Left {
        connection: ConnectionId,
        identity: Identity,
        reason: RemovalReason,
    },
}

/// Reason why a connection was removed from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// The connection's reader or writer requested removal.
    Disconnected,

    /// Another connection registered the same identity (direct mode).
    Replaced,

    /// The mailbox was full during a broadcast; the peer is too slow.
    MailboxFull,

    /// The mailbox receiver is gone; the writer already exited.
    MailboxClosed,

    /// The hub is shutting down.
    Shutdown,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Replaced => write!(f, "replaced by a newer connection"),
            Self::MailboxFull => write!(f, "mailbox full"),
            Self::MailboxClosed => write!(f, "writer gone"),
            Self::Shutdown => write!(f, "hub shutdown"),
        }
    }
}
