//! Client interface for interacting with the HubActor.
//!
//! The `HubHandle` provides a cheap-to-clone interface for submitting
//! requests to the hub's control loop and subscribing to membership events.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `HubError::ChannelClosed`

use relay_core::{ChatMessage, ConnectionId, Identity};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::commands::{HubCommand, HubError, HubEvent, MemberInfo};
use super::member::Member;

/// Handle for interacting with the hub actor.
///
/// Connections, the HTTP layer and tests all go through this handle; none
/// of them can reach the membership table directly.
#[derive(Clone)]
pub struct HubHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<HubCommand>,

    /// Event broadcaster for subscribing to membership changes
    event_sender: broadcast::Sender<HubEvent>,
}

impl HubHandle {
    /// Create a new hub handle.
    pub fn new(sender: mpsc::Sender<HubCommand>, event_sender: broadcast::Sender<HubEvent>) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Register a connection.
    ///
    /// Returns once the connection is in the table and can receive messages.
    ///
    /// # Errors
    ///
    /// - `HubError::ChannelClosed` if the hub has shut down
    pub async fn register(&self, member: Member) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Register {
                member,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::ChannelClosed)?;

        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    /// Unregister a connection and close its mailbox.
    ///
    /// Returns `false` if the connection was already gone; calling this
    /// twice is harmless.
    ///
    /// # Errors
    ///
    /// - `HubError::ChannelClosed` if the hub has shut down
    pub async fn unregister(&self, connection: ConnectionId) -> Result<bool, HubError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Unregister {
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::ChannelClosed)?;

        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    /// Submit a message for routing.
    ///
    /// Fire-and-forget: returns once the hub has accepted the request, not
    /// once it has been delivered. Misses and full mailboxes are not
    /// reported back.
    ///
    /// # Errors
    ///
    /// - `HubError::ChannelClosed` if the hub has shut down
    pub async fn route(&self, from: ConnectionId, message: ChatMessage) -> Result<(), HubError> {
        self.sender
            .send(HubCommand::Route { from, message })
            .await
            .map_err(|_| HubError::ChannelClosed)
    }

    /// Snapshot of all registered connections, in join order.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn members(&self) -> Vec<MemberInfo> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(HubCommand::ListMembers { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Find the connection registered under `identity`.
    ///
    /// Returns `None` if nobody holds it or the actor is gone.
    pub async fn lookup(&self, identity: Identity) -> Option<ConnectionId> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Lookup {
                identity,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Close every mailbox and stop the control loop.
    ///
    /// Returns how many connections were closed.
    ///
    /// # Errors
    ///
    /// - `HubError::ChannelClosed` if the hub had already shut down
    pub async fn shutdown(&self) -> Result<usize, HubError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Shutdown { respond_to: tx })
            .await
            .map_err(|_| HubError::ChannelClosed)?;

        rx.await.map_err(|_| HubError::ChannelClosed)
    }

    /// Subscribe to membership events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}
