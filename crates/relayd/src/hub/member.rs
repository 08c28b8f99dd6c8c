//! Table entries and their outbound mailboxes.

use std::sync::Arc;

use relay_core::{ConnectionId, Identity};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// A serialized message ready for the socket. Shared across a broadcast fan-out.
pub type Payload = Arc<str>;

/// Producer side of a mailbox. Only the hub holds one.
pub type MailboxSender = mpsc::Sender<Payload>;

/// Consumer side of a mailbox, drained by the connection's writer.
pub type MailboxReceiver = mpsc::Receiver<Payload>;

/// Creates a bounded mailbox.
pub fn mailbox(capacity: usize) -> (MailboxSender, MailboxReceiver) {
    mpsc::channel(capacity.max(1))
}

/// One registered connection.
///
/// Dropping a `Member` drops the only mailbox sender, which closes the
/// mailbox and lets the writer drain and exit.
#[derive(Debug)]
pub struct Member {
    pub id: ConnectionId,
    pub identity: Identity,
    mailbox: MailboxSender,
}

impl Member {
    pub fn new(id: ConnectionId, identity: Identity, mailbox: MailboxSender) -> Self {
        Self {
            id,
            identity,
            mailbox,
        }
    }

    /// Enqueues a payload without waiting.
    pub fn try_deliver(&self, payload: Payload) -> Result<(), TrySendError<Payload>> {
        self.mailbox.try_send(payload)
    }
}
