//! Hub actor - owns the membership table and processes commands.
//!
//! The HubActor is the single owner of connection state in the system.
//! It receives commands via an mpsc channel and publishes events via broadcast.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic
//!
//! # Non-Blocking Loop
//!
//! Nothing in here awaits except `receiver.recv()`. Mailboxes are fed with
//! `try_send`, responses go out on oneshot channels and events on a
//! broadcast channel, none of which can stall the loop.

use relay_core::{ChatMessage, ConnectionId, Identity};
use relay_protocol::{encode_message, encode_notice, PeerNotice};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::commands::{HubCommand, HubEvent, RemovalReason};
use super::member::{Member, Payload};
use super::policy::{Delivery, FullMailbox, RoutingPolicy};
use super::table::MembershipTable;

/// Connections to remove after a delivery pass.
type Evictions = Vec<(ConnectionId, RemovalReason)>;

/// The hub actor - owns the membership table.
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially.
/// All table mutations happen within this single task, so the table needs
/// no lock.
pub struct HubActor {
    /// Command receiver
    receiver: mpsc::Receiver<HubCommand>,

    /// Live connections
    table: MembershipTable,

    /// Routing policy fixed at startup
    policy: RoutingPolicy,

    /// Event publisher for membership changes
    event_publisher: broadcast::Sender<HubEvent>,
}

impl HubActor {
    /// Creates a new hub actor.
    pub fn new(
        receiver: mpsc::Receiver<HubCommand>,
        policy: RoutingPolicy,
        event_publisher: broadcast::Sender<HubEvent>,
    ) -> Self {
        Self {
            receiver,
            table: MembershipTable::new(policy.is_keyed()),
            policy,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until a `Shutdown` command arrives or every
    /// handle is dropped. Either way all mailboxes are closed on exit.
    pub async fn run(mut self) {
        info!(policy = ?self.policy, "Hub actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            if !self.handle_command(cmd) {
                break;
            }
        }

        let closed = self.close_all();
        info!(closed, "Hub actor stopped");
    }

    /// Dispatches a command. Returns `false` when the loop should stop.
    fn handle_command(&mut self, cmd: HubCommand) -> bool {
        match cmd {
            HubCommand::Register { member, respond_to } => {
                self.handle_register(member);
                // Ignore send error - caller may have gone away
                let _ = respond_to.send(());
            }
            HubCommand::Unregister {
                connection,
                respond_to,
            } => {
                let removed = self.handle_unregister(connection);
                let _ = respond_to.send(removed);
            }
            HubCommand::Route { from, message } => {
                self.handle_route(from, &message);
            }
            HubCommand::ListMembers { respond_to } => {
                let _ = respond_to.send(self.table.snapshot());
            }
            HubCommand::Lookup {
                identity,
                respond_to,
            } => {
                let _ = respond_to.send(self.table.lookup(&identity).map(|m| m.id));
            }
            HubCommand::Shutdown { respond_to } => {
                let closed = self.close_all();
                let _ = respond_to.send(closed);
                return false;
            }
        }

        true
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_register(&mut self, member: Member) {
        let connection = member.id;
        let identity = member.identity.clone();

        if let Some(displaced) = self.table.insert(member) {
            // Dropping the displaced member closes its mailbox, so its
            // writer sends a close frame and the client goes away.
            info!(
                identity = %displaced.identity,
                old_connection = %displaced.id,
                new_connection = %connection,
                "Connection replaced by newer registration"
            );
            self.publish_left(&displaced, RemovalReason::Replaced);
        }

        info!(
            identity = %identity,
            connection = %connection,
            total = self.table.len(),
            "Connection registered"
        );

        let _ = self.event_publisher.send(HubEvent::Joined {
            connection,
            identity: identity.clone(),
        });

        let evictions = self.announce(&PeerNotice::Joined(identity), Some(connection));
        self.evict_all(evictions);
    }

    fn handle_unregister(&mut self, connection: ConnectionId) -> bool {
        match self.table.remove(connection) {
            Some(member) => {
                info!(
                    identity = %member.identity,
                    connection = %connection,
                    total = self.table.len(),
                    "Connection unregistered"
                );
                self.publish_left(&member, RemovalReason::Disconnected);

                let identity = member.identity.clone();
                drop(member);

                let evictions = self.announce(&PeerNotice::Left(identity), None);
                self.evict_all(evictions);
                true
            }
            None => {
                debug!(connection = %connection, "Unregister for unknown connection ignored");
                false
            }
        }
    }

    fn handle_route(&mut self, from: ConnectionId, message: &ChatMessage) {
        // Replaced or evicted connections no longer speak for their identity
        if !self.table.contains(from) {
            debug!(
                connection = %from,
                sender = %message.sender,
                "Route from removed connection ignored"
            );
            return;
        }

        let payload: Payload = match encode_message(message) {
            Ok(json) => Payload::from(json),
            Err(e) => {
                warn!(sender = %message.sender, error = %e, "Failed to encode message, dropping");
                return;
            }
        };

        let deliveries = self.policy.plan(&self.table, from, message, &payload);

        if deliveries.is_empty() {
            debug!(
                sender = %message.sender,
                recipient = ?message.recipient.as_ref().map(Identity::as_str),
                "No deliverable recipient, message dropped"
            );
            return;
        }

        debug!(
            sender = %message.sender,
            targets = deliveries.len(),
            "Routing message"
        );

        let evictions = self.deliver(deliveries);
        self.evict_all(evictions);
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Enqueues each delivery without blocking.
    ///
    /// Returns the connections that must be evicted. Nothing is removed
    /// here so that one dead peer cannot cut a fan-out short.
    fn deliver(&self, deliveries: Vec<Delivery>) -> Evictions {
        let mut evictions = Vec::new();

        for Delivery { target, payload } in deliveries {
            let Some(member) = self.table.get(target) else {
                continue;
            };

            match member.try_deliver(payload) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => match self.policy.on_full_mailbox() {
                    FullMailbox::Drop => {
                        warn!(
                            identity = %member.identity,
                            connection = %target,
                            "Mailbox full, message dropped"
                        );
                    }
                    FullMailbox::Evict => {
                        evictions.push((target, RemovalReason::MailboxFull));
                    }
                },
                Err(TrySendError::Closed(_)) => {
                    evictions.push((target, RemovalReason::MailboxClosed));
                }
            }
        }

        evictions
    }

    /// Announces a membership change to the room (broadcast mode only).
    fn announce(&self, notice: &PeerNotice, except: Option<ConnectionId>) -> Evictions {
        if !self.policy.announces_membership() || self.table.is_empty() {
            return Vec::new();
        }

        let payload: Payload = match encode_notice(notice) {
            Ok(json) => Payload::from(json),
            Err(e) => {
                warn!(error = %e, "Failed to encode peer notice");
                return Vec::new();
            }
        };

        let deliveries = self.policy.plan_notice(&self.table, except, &payload);
        self.deliver(deliveries)
    }

    /// Removes dead connections, announcing each departure.
    ///
    /// Announcing can find more dead peers, so this works through a queue
    /// until no evictions remain.
    fn evict_all(&mut self, mut pending: Evictions) {
        while let Some((connection, reason)) = pending.pop() {
            let Some(member) = self.table.remove(connection) else {
                continue;
            };

            warn!(
                identity = %member.identity,
                connection = %connection,
                reason = %reason,
                total = self.table.len(),
                "Connection evicted"
            );
            self.publish_left(&member, reason);

            let identity = member.identity.clone();
            drop(member);

            pending.extend(self.announce(&PeerNotice::Left(identity), None));
        }
    }

    /// Closes every mailbox. Returns how many connections were closed.
    fn close_all(&mut self) -> usize {
        let members = self.table.drain();
        let count = members.len();

        for member in members {
            self.publish_left(&member, RemovalReason::Shutdown);
        }

        count
    }

    fn publish_left(&self, member: &Member, reason: RemovalReason) {
        // Ignore if no subscribers
        let _ = self.event_publisher.send(HubEvent::Left {
            connection: member.id,
            identity: member.identity.clone(),
            reason,
        });
    }

    /// Returns the number of live connections (for testing).
    #[cfg(test)]
    pub fn connection_count(&self) -> usize {
        self.table.len()
    }
}
