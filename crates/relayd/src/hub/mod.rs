//! Connection hub using Actor pattern.
//!
//! The hub is the single owner of "who is connected" and "where does this
//! message go". It receives commands via a tokio mpsc channel and applies
//! them one at a time, so the membership table needs no lock.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Reader tasks   │────▶│    HubActor     │────▶│ Mailboxes       │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!         │                       │                       │
//!         │   HubCommand          │   RoutingPolicy       │  try_send
//!         │   (mpsc channel)      │   (direct/broadcast)  │  (bounded)
//!         ▼                       ▼                       ▼
//!   Register/Unregister     BTreeMap<ConnectionId,   Writer tasks
//!   Route                   Member>                  drain to socket
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use relay_core::RoutingMode;
use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;
mod member;
mod policy;
mod table;

pub use actor::HubActor;
pub use commands::{HubCommand, HubError, HubEvent, MemberInfo, RemovalReason};
pub use handle::HubHandle;
pub use member::{mailbox, MailboxReceiver, MailboxSender, Member, Payload};
pub use policy::{Delivery, FullMailbox, RoutingPolicy};
pub use table::MembershipTable;

/// Default size of the hub's request queue.
pub const DEFAULT_COMMAND_BUFFER: usize = 1024;

/// Event channel size
const EVENT_BUFFER: usize = 256;

/// Spawn the hub actor and return a handle for interaction.
///
/// The routing policy is fixed here for the lifetime of the hub.
///
/// # Example
///
/// ```no_run
/// use relay_core::RoutingMode;
/// use relayd::hub::{spawn_hub, DEFAULT_COMMAND_BUFFER};
///
/// #[tokio::main]
/// async fn main() {
///     let hub = spawn_hub(RoutingMode::Direct, DEFAULT_COMMAND_BUFFER);
///
///     let members = hub.members().await;
///     assert!(members.is_empty());
/// }
/// ```
pub fn spawn_hub(mode: RoutingMode, command_buffer: usize) -> HubHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(command_buffer.max(1));
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = HubActor::new(cmd_rx, RoutingPolicy::for_mode(mode), event_tx.clone());
    tokio::spawn(actor.run());

    HubHandle::new(cmd_tx, event_tx)
}
