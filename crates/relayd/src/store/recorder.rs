//! Background persistence worker.
//!
//! Reader paths must never wait on the database, so they hand messages to a
//! bounded queue with `try_send`. A single task drains the queue into the
//! store. When every [`Recorder`] clone is dropped the task writes out what
//! is left and exits.

use std::sync::Arc;

use relay_core::ChatMessage;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::MessageStore;

/// Default number of messages that can wait for the store.
pub const DEFAULT_RECORDER_CAPACITY: usize = 1024;

/// Submission side of the persistence queue.
#[derive(Clone)]
pub struct Recorder {
    sender: mpsc::Sender<ChatMessage>,
}

impl Recorder {
    /// Queue a message for persistence without waiting.
    ///
    /// Returns `false` if the message was dropped because the queue is full
    /// or the worker has stopped.
    pub fn submit(&self, message: ChatMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!(
                    sender = %message.sender,
                    "Persistence queue full, message not recorded"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Recorder stopped, message not recorded");
                false
            }
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("capacity", &self.sender.max_capacity())
            .finish()
    }
}

/// Spawn the persistence worker.
///
/// The returned handle completes once all `Recorder` clones are dropped and
/// the queue has been drained.
pub fn spawn_recorder(store: Arc<dyn MessageStore>, capacity: usize) -> (Recorder, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run(store, receiver));
    (Recorder { sender }, task)
}

async fn run(store: Arc<dyn MessageStore>, mut receiver: mpsc::Receiver<ChatMessage>) {
    debug!("Recorder started");
    let mut recorded: u64 = 0;

    while let Some(message) = receiver.recv().await {
        let sender = message.sender.clone();
        match store.record(message).await {
            Ok(stored) => {
                recorded += 1;
                debug!(id = ?stored.id, sender = %sender, "Message recorded");
            }
            Err(e) => {
                warn!(sender = %sender, error = %e, "Failed to record message");
            }
        }
    }

    info!(recorded, "Recorder stopped");
}
