//! HTTP/WebSocket server for the relay daemon.
//!
//! The server:
//! - Upgrades `/ws` requests and runs a ConnectionHandler per client
//! - Serves the history query surface from the configured store
//! - Owns the persistence worker
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ axum router
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│    HubHandle    │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └─────────────────┘
//!         │
//!         │ try_send
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │    Recorder     │────▶│  MessageStore   │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Per-connection errors are logged and never stop the server

mod connection;
mod routes;
mod transport;

pub use connection::{ConnectionError, ConnectionHandler};
pub use routes::{router, ApiError, AppState, HealthResponse, MAX_MESSAGE_SIZE};
pub use transport::{split_socket, Inbound, Outbound, TransportError};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::hub::HubHandle;
use crate::store::{spawn_recorder, MessageStore};

/// How long shutdown waits for queued messages to reach the store.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP/WebSocket server for the relay daemon.
pub struct RelayServer {
    /// Shared handler state
    state: AppState,

    /// CORS policy for every route
    cors: CorsLayer,

    /// Persistence worker, when a store is configured
    recorder_task: Option<JoinHandle<()>>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,
}

impl RelayServer {
    /// Creates a new relay server.
    ///
    /// Spawns the persistence worker when `store` is set, so this must be
    /// called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated daemon configuration
    /// * `hub` - Handle to the running hub
    /// * `store` - Message store, or `None` to disable history
    /// * `cancel_token` - Token for graceful shutdown
    pub fn new(
        config: &RelayConfig,
        hub: HubHandle,
        store: Option<Arc<dyn MessageStore>>,
        cancel_token: CancellationToken,
    ) -> Self {
        let (recorder, recorder_task) = match &store {
            Some(store) => {
                let (recorder, task) = spawn_recorder(Arc::clone(store), config.recorder_capacity);
                (Some(recorder), Some(task))
            }
            None => (None, None),
        };

        Self {
            state: AppState::new(hub, store, recorder, config.mode, config.mailbox_capacity),
            cors: cors_layer(config),
            recorder_task,
            cancel_token,
        }
    }

    /// Returns the hub handle this server routes through.
    pub fn hub(&self) -> &HubHandle {
        &self.state.hub
    }

    /// Binds `addr` and runs the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the address cannot be bound, or
    /// `ServerError::Io` if the server fails.
    pub async fn run(self, addr: SocketAddr) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| ServerError::Bind {
            addr,
            error: e.to_string(),
        })?;
        self.serve(listener).await
    }

    /// Runs the server on an already bound listener.
    ///
    /// Does not return until the cancellation token is triggered (or the
    /// listener fails). On the way out the hub is shut down, closing every
    /// mailbox, and the persistence queue is drained.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Io` if the listener fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let RelayServer {
            state,
            cors,
            recorder_task,
            cancel_token,
        } = self;

        let hub = state.hub.clone();
        let addr = listener.local_addr()?;

        info!(
            addr = %addr,
            mode = %state.mode,
            persistence = state.store.is_some(),
            "Relay server listening"
        );

        let app = router(state).layer(cors);

        let shutdown_hub = hub.clone();
        let shutdown = async move {
            cancel_token.cancelled().await;
            info!("Server shutdown requested");
            stop_hub(&shutdown_hub).await;
        };

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        // The listener can fail without a cancellation
        if hub.is_running() {
            stop_hub(&hub).await;
        }

        if let Some(task) = recorder_task {
            match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
                Ok(Ok(())) => debug!("Persistence queue drained"),
                Ok(Err(e)) => warn!(error = %e, "Recorder task failed"),
                Err(_) => warn!("Timed out draining persistence queue"),
            }
        }

        result?;
        info!("Relay server stopped");
        Ok(())
    }
}

async fn stop_hub(hub: &HubHandle) {
    match hub.shutdown().await {
        Ok(closed) => info!(closed, "Hub stopped"),
        Err(e) => debug!(error = %e, "Hub already stopped"),
    }
}

/// Build the CORS layer for the configured origins.
///
/// Unparseable origins are skipped; `validate()` rejects them earlier.
fn cors_layer(config: &RelayConfig) -> CorsLayer {
    let allow_origin = if config.allows_any_origin() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
