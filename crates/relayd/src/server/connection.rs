//! Connection handler for individual WebSocket clients.
//!
//! Each client gets its own `ConnectionHandler` which:
//! - Registers a mailbox with the hub
//! - Runs the reader path on the calling task (decode, stamp, route, record)
//! - Spawns the writer path that drains the mailbox to the socket
//! - Deregisters exactly once when either path ends
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use relay_core::{ConnectionId, Identity};
use relay_protocol::decode_inbound;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::transport::{Inbound, Outbound, TransportError};
use crate::hub::{mailbox, HubError, HubHandle, MailboxReceiver, Member};
use crate::store::Recorder;

/// Connection handler for a single client.
pub struct ConnectionHandler {
    /// Connection id assigned by the server
    id: ConnectionId,

    /// Identity this connection sends as and is addressed by
    identity: Identity,

    /// Handle to the hub
    hub: HubHandle,

    /// Persistence queue, when history is enabled
    recorder: Option<Recorder>,

    /// Capacity of this connection's outbound mailbox
    mailbox_capacity: usize,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(
        id: ConnectionId,
        identity: Identity,
        hub: HubHandle,
        recorder: Option<Recorder>,
        mailbox_capacity: usize,
    ) -> Self {
        Self {
            id,
            identity,
            hub,
            recorder,
            mailbox_capacity,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Runs the connection until the client goes away or the hub drops it.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::Hub` if the connection could not be
    /// registered; the socket is closed in that case. Disconnects after a
    /// successful registration are not errors.
    pub async fn run<R, W>(self, mut stream: R, mut sink: W) -> Result<(), ConnectionError>
    where
        R: Stream<Item = Result<Inbound, TransportError>> + Unpin + Send,
        W: Sink<Outbound, Error = TransportError> + Unpin + Send + 'static,
    {
        let (tx, rx) = mailbox(self.mailbox_capacity);
        let member = Member::new(self.id, self.identity.clone(), tx);

        if let Err(e) = self.hub.register(member).await {
            warn!(connection = %self.id, error = %e, "Failed to register connection");
            let _ = sink.send(Outbound::Close).await;
            let _ = sink.close().await;
            return Err(e.into());
        }

        info!(
            connection = %self.id,
            identity = %self.identity,
            "Client connected"
        );

        let mut writer = tokio::spawn(write_loop(self.id, self.hub.clone(), rx, sink));

        // The writer ends when the hub drops this connection, and the reader
        // must not outlive it.
        let writer_result = tokio::select! {
            result = self.process_frames(&mut stream) => {
                if let Err(e) = result {
                    debug!(connection = %self.id, error = %e, "Reader stopped");
                }
                None
            }
            joined = &mut writer => {
                debug!(connection = %self.id, "Writer finished, stopping reader");
                Some(joined)
            }
        };

        match self.hub.unregister(self.id).await {
            Ok(true) => debug!(connection = %self.id, "Connection unregistered"),
            Ok(false) => debug!(connection = %self.id, "Connection already removed"),
            Err(e) => debug!(connection = %self.id, error = %e, "Hub gone during unregister"),
        }

        let joined = match writer_result {
            Some(joined) => joined,
            None => writer.await,
        };
        if let Err(e) = joined {
            warn!(connection = %self.id, error = %e, "Writer task failed");
        }

        info!(
            connection = %self.id,
            identity = %self.identity,
            "Client disconnected"
        );
        Ok(())
    }

    /// Reader path. Always returns the reason it stopped.
    async fn process_frames<R>(&self, stream: &mut R) -> Result<(), ConnectionError>
    where
        R: Stream<Item = Result<Inbound, TransportError>> + Unpin + Send,
    {
        loop {
            match stream.next().await {
                Some(Ok(Inbound::Data(bytes))) => self.handle_frame(&bytes).await?,
                Some(Ok(Inbound::Control)) => continue,
                Some(Ok(Inbound::Close)) | None => return Err(ConnectionError::Eof),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn handle_frame(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let inbound = match decode_inbound(bytes) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(
                    connection = %self.id,
                    error = %e,
                    "Dropping undecodable frame"
                );
                return Ok(());
            }
        };

        let message = inbound.into_message(self.identity.clone());

        match &self.recorder {
            Some(recorder) => {
                let message = message.with_timestamp(Utc::now());
                self.hub.route(self.id, message.clone()).await?;
                recorder.submit(message);
            }
            None => self.hub.route(self.id, message).await?,
        }

        Ok(())
    }
}

/// Writer path.
///
/// Drains the mailbox to the socket. A closed mailbox ends with a
/// best-effort close frame; a write error requests deregistration.
async fn write_loop<W>(id: ConnectionId, hub: HubHandle, mut rx: MailboxReceiver, mut sink: W)
where
    W: Sink<Outbound, Error = TransportError> + Unpin + Send,
{
    while let Some(payload) = rx.recv().await {
        if let Err(e) = sink.send(Outbound::Text(payload)).await {
            debug!(connection = %id, error = %e, "Write failed");
            let _ = sink.close().await;
            let _ = hub.unregister(id).await;
            return;
        }
    }

    debug!(connection = %id, "Mailbox closed, closing socket");
    let _ = sink.send(Outbound::Close).await;
    let _ = sink.close().await;
}

/// Errors that end a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Eof,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Hub error: {0}")]
    Hub(#[from] HubError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::spawn_hub;
    use crate::store::{spawn_recorder, MemoryStore, MessageStore};
    use futures::channel::mpsc as fmpsc;
    use relay_core::RoutingMode;
    use std::sync::Arc;
    use std::time::Duration;

    type InboundTx = fmpsc::UnboundedSender<Result<Inbound, TransportError>>;
    type OutboundRx = fmpsc::UnboundedReceiver<Outbound>;

    fn spawn_client(
        hub: &HubHandle,
        id: u64,
        name: &str,
        recorder: Option<Recorder>,
    ) -> (InboundTx, OutboundRx, tokio::task::JoinHandle<Result<(), ConnectionError>>) {
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = fmpsc::unbounded();
        let sink = out_tx.sink_map_err(|_| TransportError::Closed);

        let handler = ConnectionHandler::new(
            ConnectionId::new(id),
            Identity::new(name),
            hub.clone(),
            recorder,
            8,
        );
        let task = tokio::spawn(handler.run(in_rx, sink));
        (in_tx, out_rx, task)
    }

    async fn wait_registered(hub: &HubHandle, name: &str) {
        for _ in 0..100 {
            if hub.lookup(Identity::new(name)).await.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{name} never registered");
    }

    fn text(frame: Outbound) -> String {
        match frame {
            Outbound::Text(payload) => payload.to_string(),
            Outbound::Close => panic!("expected text frame, got close"),
        }
    }

    #[tokio::test]
    async fn test_frame_routed_with_stamped_sender() {
        let hub = spawn_hub(RoutingMode::Direct, 16);
        let (alice_in, _alice_out, _alice) = spawn_client(&hub, 1, "alice", None);
        let (_bob_in, mut bob_out, _bob) = spawn_client(&hub, 2, "bob", None);
        wait_registered(&hub, "alice").await;
        wait_registered(&hub, "bob").await;

        alice_in
            .unbounded_send(Ok(Inbound::Data(
                br#"{"sender":"mallory","recipient":"bob","content":"hi"}"#.to_vec(),
            )))
            .unwrap();

        let received = text(bob_out.next().await.unwrap());
        assert!(received.contains(r#""sender":"alice""#));
        assert!(received.contains(r#""content":"hi""#));
        assert!(!received.contains("timestamp"));
    }

    #[tokio::test]
    async fn test_bad_frame_keeps_connection_open() {
        let hub = spawn_hub(RoutingMode::Direct, 16);
        let (alice_in, _alice_out, _alice) = spawn_client(&hub, 1, "alice", None);
        let (_bob_in, mut bob_out, _bob) = spawn_client(&hub, 2, "bob", None);
        wait_registered(&hub, "alice").await;
        wait_registered(&hub, "bob").await;

        alice_in
            .unbounded_send(Ok(Inbound::Data(b"not json".to_vec())))
            .unwrap();
        alice_in.unbounded_send(Ok(Inbound::Control)).unwrap();
        alice_in
            .unbounded_send(Ok(Inbound::Data(
                br#"{"recipient":"bob","content":"still here"}"#.to_vec(),
            )))
            .unwrap();

        let received = text(bob_out.next().await.unwrap());
        assert!(received.contains("still here"));
    }

    #[tokio::test]
    async fn test_close_unregisters_and_closes_writer() {
        let hub = spawn_hub(RoutingMode::Direct, 16);
        let (alice_in, mut alice_out, alice) = spawn_client(&hub, 1, "alice", None);
        wait_registered(&hub, "alice").await;

        alice_in.unbounded_send(Ok(Inbound::Close)).unwrap();

        assert!(alice.await.unwrap().is_ok());
        assert_eq!(alice_out.next().await, Some(Outbound::Close));
        assert!(hub.lookup(Identity::new("alice")).await.is_none());
    }

    #[tokio::test]
    async fn test_transport_error_unregisters() {
        let hub = spawn_hub(RoutingMode::Direct, 16);
        let (alice_in, _alice_out, alice) = spawn_client(&hub, 1, "alice", None);
        wait_registered(&hub, "alice").await;

        alice_in
            .unbounded_send(Err(TransportError::WebSocket("reset".to_string())))
            .unwrap();

        assert!(alice.await.unwrap().is_ok());
        assert!(hub.members().await.is_empty());
    }

    #[tokio::test]
    async fn test_displaced_connection_stops_reading() {
        let hub = spawn_hub(RoutingMode::Direct, 16);
        let (old_in, mut old_out, old) = spawn_client(&hub, 1, "alice", None);
        wait_registered(&hub, "alice").await;

        let (_new_in, _new_out, _new) = spawn_client(&hub, 2, "alice", None);
        let (_bob_in, mut bob_out, _bob) = spawn_client(&hub, 3, "bob", None);
        wait_registered(&hub, "bob").await;
        assert_eq!(hub.lookup(Identity::new("alice")).await, Some(ConnectionId::new(2)));

        assert_eq!(old_out.next().await, Some(Outbound::Close));
        let finished = tokio::time::timeout(Duration::from_secs(1), old).await;
        assert!(finished.unwrap().unwrap().is_ok());

        // Nobody reads the old socket any more
        let _ = old_in.unbounded_send(Ok(Inbound::Data(
            br#"{"recipient":"bob","content":"from the old socket"}"#.to_vec(),
        )));
        let _ = hub.members().await;
        let pending = tokio::time::timeout(Duration::from_millis(50), bob_out.next()).await;
        assert!(pending.is_err(), "bob must receive nothing");
        assert_eq!(hub.lookup(Identity::new("alice")).await, Some(ConnectionId::new(2)));
    }

    #[tokio::test]
    async fn test_hub_shutdown_ends_connection() {
        let hub = spawn_hub(RoutingMode::Broadcast, 16);
        let (_alice_in, mut alice_out, alice) = spawn_client(&hub, 1, "alice", None);
        wait_registered(&hub, "alice").await;

        hub.shutdown().await.unwrap();

        assert_eq!(alice_out.next().await, Some(Outbound::Close));
        let finished = tokio::time::timeout(Duration::from_secs(1), alice).await;
        assert!(finished.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_register_fails_when_hub_gone() {
        let hub = spawn_hub(RoutingMode::Direct, 16);
        hub.shutdown().await.unwrap();

        let (_alice_in, mut alice_out, alice) = spawn_client(&hub, 1, "alice", None);

        assert!(matches!(
            alice.await.unwrap(),
            Err(ConnectionError::Hub(HubError::ChannelClosed))
        ));
        assert_eq!(alice_out.next().await, Some(Outbound::Close));
    }

    #[tokio::test]
    async fn test_messages_recorded_with_timestamp() {
        let hub = spawn_hub(RoutingMode::Direct, 16);
        let store = Arc::new(MemoryStore::new());
        let (recorder, recorder_task) = spawn_recorder(store.clone(), 16);

        let (alice_in, _alice_out, alice) = spawn_client(&hub, 1, "alice", Some(recorder));
        wait_registered(&hub, "alice").await;

        // Recipient offline: not delivered, still recorded
        alice_in
            .unbounded_send(Ok(Inbound::Data(
                br#"{"recipient":"bob","content":"later"}"#.to_vec(),
            )))
            .unwrap();
        alice_in.unbounded_send(Ok(Inbound::Close)).unwrap();
        alice.await.unwrap().unwrap();
        recorder_task.await.unwrap();

        let history = store
            .query_between(&Identity::new("alice"), &Identity::new("bob"))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "later");
        assert!(history[0].timestamp.is_some());
    }
}
