//! Routing policy: who receives a message.
//!
//! Policies are pure. They read a table snapshot and return an ordered list
//! of deliveries; removing dead peers is left to the hub.

use relay_core::{ChatMessage, ConnectionId, RoutingMode};

use super::member::Payload;
use super::table::MembershipTable;

/// One payload destined for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub target: ConnectionId,
    pub payload: Payload,
}

/// What the hub does when a target's mailbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullMailbox {
    /// Drop this message for this target; the connection stays.
    Drop,
    /// Treat the target as dead and remove it.
    Evict,
}

/// Routing policy selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// Deliver to the named recipient only.
    Direct,
    /// Deliver to everyone except the sending connection.
    Broadcast,
}

impl RoutingPolicy {
    pub fn for_mode(mode: RoutingMode) -> Self {
        match mode {
            RoutingMode::Direct => Self::Direct,
            RoutingMode::Broadcast => Self::Broadcast,
        }
    }

    /// Whether the membership table is keyed by identity.
    pub fn is_keyed(&self) -> bool {
        matches!(self, Self::Direct)
    }

    /// Whether joins and departures are announced to the other members.
    pub fn announces_membership(&self) -> bool {
        matches!(self, Self::Broadcast)
    }

    pub fn on_full_mailbox(&self) -> FullMailbox {
        match self {
            Self::Direct => FullMailbox::Drop,
            Self::Broadcast => FullMailbox::Evict,
        }
    }

    /// Plans the deliveries for a chat message sent from `from`.
    ///
    /// Direct: at most one delivery, to the connection holding the
    /// recipient identity. No recipient or an unknown recipient yields
    /// nothing. Broadcast: every member except `from`, in join order.
    pub fn plan(
        &self,
        table: &MembershipTable,
        from: ConnectionId,
        message: &ChatMessage,
        payload: &Payload,
    ) -> Vec<Delivery> {
        match self {
            Self::Direct => message
                .recipient
                .as_ref()
                .and_then(|recipient| table.lookup(recipient))
                .map(|member| Delivery {
                    target: member.id,
                    payload: Payload::clone(payload),
                })
                .into_iter()
                .collect(),
            Self::Broadcast => fan_out(table, Some(from), payload),
        }
    }

    /// Plans the deliveries for a membership notice.
    ///
    /// Only broadcast mode announces; `except` is the connection the notice
    /// is about when it is still in the table.
    pub fn plan_notice(
        &self,
        table: &MembershipTable,
        except: Option<ConnectionId>,
        payload: &Payload,
    ) -> Vec<Delivery> {
        if self.announces_membership() {
            fan_out(table, except, payload)
        } else {
            Vec::new()
        }
    }
}

fn fan_out(table: &MembershipTable, except: Option<ConnectionId>, payload: &Payload) -> Vec<Delivery> {
    table
        .iter()
        .filter(|member| Some(member.id) != except)
        .map(|member| Delivery {
            target: member.id,
            payload: Payload::clone(payload),
        })
        .collect()
}
