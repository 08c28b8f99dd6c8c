//! HTTP routes: the WebSocket upgrade and the history query surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use relay_core::{ConnectionId, DomainError, Identity, RoutingMode};
use relay_protocol::{ChatSummary, WireMessage};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use super::connection::ConnectionHandler;
use super::transport::split_socket;
use crate::hub::HubHandle;
use crate::store::{MessageStore, Recorder, StoreError};

/// Largest WebSocket message accepted from a client (1 MB).
///
/// Frames under this limit but over the protocol's frame limit are read and
/// then rejected by the decoder, which keeps the connection open.
pub const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub store: Option<Arc<dyn MessageStore>>,
    pub recorder: Option<Recorder>,
    pub mode: RoutingMode,
    pub mailbox_capacity: usize,
    connection_counter: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        hub: HubHandle,
        store: Option<Arc<dyn MessageStore>>,
        recorder: Option<Recorder>,
        mode: RoutingMode,
        mailbox_capacity: usize,
    ) -> Self {
        Self {
            hub,
            store,
            recorder,
            mode,
            mailbox_capacity,
            connection_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Allocate the next connection id. Ids start at 1.
    fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.connection_counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn store(&self) -> Result<&Arc<dyn MessageStore>, ApiError> {
        self.store.as_ref().ok_or(ApiError::StoreDisabled)
    }
}

/// Build the router with every relay endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/history", get(history).post(history))
        .route("/chats", get(chats).post(chats))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub username: Option<String>,
    pub receiver: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatsParams {
    pub username: Option<String>,
}

/// GET /ws?username=NAME
///
/// Upgrades to a WebSocket. A missing or invalid username gets an
/// anonymous identity derived from the connection id.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let id = state.next_connection_id();

    let identity = match params.username.as_deref().map(Identity::parse) {
        Some(Ok(identity)) => identity,
        Some(Err(e)) => {
            warn!(connection = %id, error = %e, "Invalid username, using anonymous identity");
            Identity::anonymous(id)
        }
        None => Identity::anonymous(id),
    };

    let handler = ConnectionHandler::new(
        id,
        identity,
        state.hub.clone(),
        state.recorder.clone(),
        state.mailbox_capacity,
    );

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| async move {
            let (stream, sink) = split_socket(socket);
            if let Err(e) = handler.run(stream, sink).await {
                warn!(connection = %id, error = %e, "Connection failed");
            }
        })
}

/// GET|POST /history?username=A&receiver=B
async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<WireMessage>>, ApiError> {
    let store = state.store()?;
    let user = required_identity("username", params.username.as_deref())?;
    let peer = required_identity("receiver", params.receiver.as_deref())?;

    let messages = store.query_between(&user, &peer).await.map_err(|e| {
        error!(user = %user, peer = %peer, error = %e, "History query failed");
        ApiError::Store(e)
    })?;

    Ok(Json(messages.iter().map(WireMessage::from).collect()))
}

/// GET|POST /chats?username=A
async fn chats(
    State(state): State<AppState>,
    Query(params): Query<ChatsParams>,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    let store = state.store()?;
    let user = required_identity("username", params.username.as_deref())?;

    let peers = store.list_peers(&user).await.map_err(|e| {
        error!(user = %user, error = %e, "Chat list query failed");
        ApiError::Store(e)
    })?;

    Ok(Json(peers.into_iter().map(ChatSummary::new).collect()))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub mode: RoutingMode,
    pub connections: usize,
    pub persistence: bool,
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        mode: state.mode,
        connections: state.hub.members().await.len(),
        persistence: state.store.is_some(),
    })
}

fn required_identity(field: &'static str, raw: Option<&str>) -> Result<Identity, ApiError> {
    let raw = raw.ok_or(ApiError::MissingParam(field))?;
    Identity::parse(raw).map_err(|e| ApiError::InvalidParam { field, error: e })
}

/// Errors returned by the query endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("message history is disabled")]
    StoreDisabled,

    #[error("missing query parameter: {0}")]
    MissingParam(&'static str),

    #[error("invalid {field}: {error}")]
    InvalidParam {
        field: &'static str,
        error: DomainError,
    },

    #[error("storage error")]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::StoreDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::MissingParam(_) | ApiError::InvalidParam { .. } => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
