//! Presence relay: serves a `LocalBroker` to websocket clients.
//!
//! DESIGN
//! ======
//! `GET /presence?topic=<name>&key=<uuid>` upgrades to a websocket bound to
//! one broker connection. Binary messages from the client are `Track`
//! payloads; broker events for the connection are encoded and written back.
//! `WsTransport` is the matching client.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → broker connect (sends `Subscribed` + `Sync`)
//! 2. Client tracks → broker broadcasts `Join` to the room
//! 3. Socket ends → broker connection closed → `Leave` to the room

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::record::ParticipantId;
use crate::topic::TopicNaming;
use crate::transport::local::LocalBroker;
use crate::transport::{Transport, TransportEvent, TransportHandle};
use crate::wire;

#[derive(Clone)]
pub struct RelayState {
    pub broker: LocalBroker,
    pub naming: TopicNaming,
    pub queue_capacity: usize,
}

impl RelayState {
    #[must_use]
    pub fn new(broker: LocalBroker, naming: TopicNaming, queue_capacity: usize) -> Self {
        Self { broker, naming, queue_capacity }
    }
}

#[derive(Debug, Deserialize)]
pub struct PresenceParams {
    pub topic: String,
    pub key: ParticipantId,
}

pub fn app(state: RelayState) -> Router {
    Router::new()
        .route("/presence", get(handle_presence))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the relay until the listener fails.
///
/// # Errors
///
/// Returns the I/O error that stopped the server.
pub async fn serve(listener: TcpListener, state: RelayState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "presence relay listening");
    }
    axum::serve(listener, app(state)).await
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

// =============================================================================
// UPGRADE
// =============================================================================

async fn handle_presence(
    State(state): State<RelayState>,
    Query(params): Query<PresenceParams>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.naming.parse(&params.topic).is_none() {
        return (StatusCode::BAD_REQUEST, "unknown presence topic").into_response();
    }
    ws.on_upgrade(move |socket| run_socket(socket, state, params))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_socket(mut socket: WebSocket, state: RelayState, params: PresenceParams) {
    let PresenceParams { topic, key } = params;
    let (events_tx, mut events_rx) = mpsc::channel(state.queue_capacity.max(1));

    let handle = match state.broker.connect(&topic, key, events_tx).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(%topic, participant = %key, error = %e, "relay: broker connect failed");
            let closed = TransportEvent::Closed { reason: e.to_string() };
            if let Err(e) = socket.send(Message::Binary(wire::encode_event(&closed).into())).await {
                debug!(error = %e, "relay: could not report connect failure");
            }
            return;
        }
    };
    info!(%topic, participant = %key, "relay: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Binary(bytes) => relay_track(handle.as_ref(), &topic, &bytes).await,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                let last = matches!(event, TransportEvent::Closed { .. });
                if socket.send(Message::Binary(wire::encode_event(&event).into())).await.is_err() || last {
                    break;
                }
            }
        }
    }

    handle.close().await;
    info!(%topic, participant = %key, "relay: client disconnected");
}

async fn relay_track(handle: &dyn TransportHandle, topic: &str, bytes: &[u8]) {
    let record = match wire::decode_track(bytes) {
        Ok(record) => record,
        Err(e) => {
            warn!(topic, error = %e, "relay: undecodable track");
            return;
        }
    };
    if let Err(e) = handle.track(record).await {
        warn!(topic, error = %e, "relay: track failed");
    }
}
