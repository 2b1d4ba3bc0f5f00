//! Connection handlers for the Beacon server.
//!
//! This module handles the WebSocket session lifecycle, the inbound event
//! loop, and the HTTP door external collaborators use to push domain
//! events into the live layer.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use beacon_core::{ConnectionId, HubConfig, PresenceHub, RoomEvent};
use beacon_protocol::{codec, ClientEvent, RoomId, ServerEvent, UserId};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The presence hub.
    pub hub: PresenceHub,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub_config = HubConfig {
            max_rooms: config.limits.max_rooms,
            max_rooms_per_connection: config.limits.max_rooms_per_connection,
            room_capacity: config.limits.room_capacity,
        };

        Self {
            hub: PresenceHub::with_config(hub_config),
            config,
        }
    }
}

/// Build the router for the Beacon endpoints.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/publish", post(publish_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    if config.typing.expiry_ms > 0 {
        spawn_typing_sweeper(Arc::clone(&state));
    }

    let app = router(Arc::clone(&state));

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically expire typing entries from clients that died mid-typing.
fn spawn_typing_sweeper(state: Arc<AppState>) {
    let expiry = Duration::from_millis(state.config.typing.expiry_ms);
    let interval = Duration::from_millis(state.config.typing.sweep_interval_ms.max(250));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let pruned = state.hub.prune_stale_typing(expiry);
            if pruned > 0 {
                debug!(rooms = pruned, "Expired stale typing entries");
            }
        }
    });
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Recipient selector for collaborator-published events.
#[derive(Debug, Deserialize)]
#[serde(tag = "target", rename_all = "camelCase")]
pub enum PublishTarget {
    /// Deliver to every connection subscribed to a room.
    #[serde(rename_all = "camelCase")]
    Room {
        /// Target room.
        room_id: RoomId,
    },
    /// Deliver to one user's connection, if online.
    #[serde(rename_all = "camelCase")]
    User {
        /// Target user.
        user_id: UserId,
    },
    /// Deliver to every live connection.
    All,
}

/// A domain event pushed by an external collaborator after persistence.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    /// Who receives the event.
    #[serde(flatten)]
    pub target: PublishTarget,
    /// The event to relay.
    pub event: ServerEvent,
}

/// Route a published event through the delivery interface.
///
/// Returns the number of receivers the event was handed to. The live layer
/// never judges whether persistence succeeded; it only relays.
pub fn dispatch_publish(hub: &PresenceHub, request: PublishRequest) -> usize {
    let PublishRequest { target, event } = request;
    match target {
        PublishTarget::Room { room_id } => hub.send_to_room(&room_id, event),
        PublishTarget::User { user_id } => usize::from(hub.send_to_user(&user_id, event)),
        PublishTarget::All => hub.broadcast_all(event),
    }
}

/// Collaborator publish handler.
async fn publish_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PublishRequest>,
) -> impl IntoResponse {
    let delivered = dispatch_publish(&state.hub, request);
    axum::Json(serde_json::json!({ "delivered": delivered }))
}

/// Identity carried on the WebSocket handshake query string.
#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, params.user_id, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, user_id: Option<String>, state: Arc<AppState>) {
    // A handshake without an identity is dropped silently: no registration,
    // no error frame.
    let Some(user_id) = user_id.filter(|id| !id.is_empty()) else {
        debug!("WebSocket handshake without userId, dropping connection");
        return;
    };

    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Outbound queue: direct hub sends plus the per-room forwarders
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Arc<ServerEvent>>();

    let connection_id = match state.hub.connect(&user_id, event_tx.clone()) {
        Ok(id) => id,
        Err(e) => {
            debug!(error = %e, "Connect rejected, dropping connection");
            return;
        }
    };

    debug!(user = %user_id, connection = %connection_id, "WebSocket connected");

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Forwarder task handles, keyed by room for cleanup
    let mut room_tasks: HashMap<RoomId, tokio::task::JoinHandle<()>> = HashMap::new();

    // Session loop
    loop {
        tokio::select! {
            biased;

            // Deliver queued outbound events
            Some(event) = event_rx.recv() => {
                match codec::encode(event.as_ref()) {
                    Ok(data) => {
                        metrics::record_event(data.len(), "outbound");
                        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(user = %user_id, error = %e, "Outbound encode failed");
                        metrics::record_error("encode");
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > state.config.limits.max_message_size {
                            warn!(user = %user_id, bytes = data.len(), "Inbound frame too large, dropping");
                            metrics::record_error("oversized");
                            continue;
                        }

                        let start = Instant::now();
                        metrics::record_event(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        let logout = drain_events(
                            &mut read_buffer,
                            &user_id,
                            connection_id,
                            &state,
                            &event_tx,
                            &mut room_tasks,
                        );

                        metrics::record_latency(start.elapsed().as_secs_f64());

                        if logout {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());

                        let logout = drain_events(
                            &mut read_buffer,
                            &user_id,
                            connection_id,
                            &state,
                            &event_tx,
                            &mut room_tasks,
                        );

                        if logout {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(user = %user_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(user = %user_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(user = %user_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: abort all forwarder tasks
    for (_, handle) in room_tasks {
        handle.abort();
    }

    // Cleanup is idempotent: after a logout this finds nothing to do, and a
    // stale close after a reconnect is rejected by connection id.
    state.hub.disconnect(&user_id, connection_id);
    metrics::set_active_rooms(state.hub.stats().rooms);

    debug!(user = %user_id, connection = %connection_id, "WebSocket disconnected");
}

/// Decode and apply every complete frame in the read buffer.
///
/// Returns `true` when the client requested logout. A protocol error
/// abandons the buffer (framing is unrecoverable mid-stream) but keeps the
/// connection alive.
fn drain_events(
    read_buffer: &mut BytesMut,
    user_id: &str,
    connection_id: ConnectionId,
    state: &Arc<AppState>,
    event_tx: &mpsc::UnboundedSender<Arc<ServerEvent>>,
    room_tasks: &mut HashMap<RoomId, tokio::task::JoinHandle<()>>,
) -> bool {
    loop {
        match codec::decode_from::<ClientEvent>(read_buffer) {
            Ok(Some(event)) => {
                if handle_event(event, user_id, connection_id, state, event_tx, room_tasks) {
                    return true;
                }
            }
            Ok(None) => return false,
            Err(e) => {
                warn!(user = %user_id, error = %e, "Protocol error, dropping buffer");
                metrics::record_error("protocol");
                read_buffer.clear();
                return false;
            }
        }
    }
}

/// Apply one client event to the hub.
///
/// Returns `true` when the client asked to log out and the session loop
/// should close the transport. Rejected events are logged and dropped;
/// they never end the session.
fn handle_event(
    event: ClientEvent,
    user_id: &str,
    connection_id: ConnectionId,
    state: &Arc<AppState>,
    event_tx: &mpsc::UnboundedSender<Arc<ServerEvent>>,
    room_tasks: &mut HashMap<RoomId, tokio::task::JoinHandle<()>>,
) -> bool {
    debug!(user = %user_id, event = event.kind(), "Client event");

    match event {
        ClientEvent::JoinRoom { room_id } => match state.hub.join_room(user_id, &room_id) {
            Ok(rx) => {
                metrics::record_join();
                metrics::set_active_rooms(state.hub.stats().rooms);

                let task = spawn_room_forwarder(rx, user_id.to_string(), event_tx.clone());
                if let Some(old) = room_tasks.insert(room_id, task) {
                    old.abort();
                }
            }
            Err(e) => {
                warn!(user = %user_id, room = %room_id, error = %e, "Join rejected");
                metrics::record_error("join");
            }
        },

        ClientEvent::LeaveRoom { room_id } => {
            if let Some(task) = room_tasks.remove(&room_id) {
                task.abort();
            }
            if state.hub.leave_room(user_id, &room_id) {
                metrics::set_active_rooms(state.hub.stats().rooms);
            }
        }

        ClientEvent::Typing {
            room_id,
            user,
            is_typing,
        } => {
            // Typing state is keyed by the connection's identity; a
            // snapshot claiming someone else is malformed.
            if user.id != user_id {
                warn!(user = %user_id, claimed = %user.id, "Typing snapshot for another user, dropping");
                metrics::record_error("identity");
                return false;
            }
            state.hub.typing_update(&room_id, user, is_typing);
        }

        ClientEvent::RoomTyping { room_id, is_typing } => {
            state.hub.room_typing_delta(&room_id, user_id, is_typing);
        }

        ClientEvent::Logout => {
            state.hub.logout(user_id, connection_id);
            return true;
        }
    }

    false
}

/// Bridge a room's broadcast group into a connection's outbound queue,
/// honoring sender-exclusive events.
fn spawn_room_forwarder(
    mut rx: broadcast::Receiver<RoomEvent>,
    user_id: String,
    event_tx: mpsc::UnboundedSender<Arc<ServerEvent>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(room_event) => {
                    if room_event.exclude.as_deref() == Some(user_id.as_str()) {
                        continue;
                    }
                    if event_tx.send(room_event.event).is_err() {
                        break; // Connection gone
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    metrics::record_dropped(skipped);
                    continue;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_request_shapes() {
        let request: PublishRequest = serde_json::from_value(json!({
            "target": "room",
            "roomId": "r1",
            "event": {"type": "newRoomMessage", "roomId": "r1", "message": {"text": "hi"}}
        }))
        .unwrap();
        assert!(matches!(
            request.target,
            PublishTarget::Room { ref room_id } if room_id == "r1"
        ));
        assert_eq!(request.event.kind(), "newRoomMessage");

        let request: PublishRequest = serde_json::from_value(json!({
            "target": "user",
            "userId": "u1",
            "event": {"type": "roomDeleted", "roomId": "r1"}
        }))
        .unwrap();
        assert!(matches!(request.target, PublishTarget::User { .. }));

        let request: PublishRequest = serde_json::from_value(json!({
            "target": "all",
            "event": {"type": "getOnlineUsers", "users": []}
        }))
        .unwrap();
        assert!(matches!(request.target, PublishTarget::All));
    }

    #[test]
    fn test_dispatch_publish_routes_by_target() {
        let hub = PresenceHub::new();

        // Offline user: best-effort no-op
        let delivered = dispatch_publish(
            &hub,
            PublishRequest {
                target: PublishTarget::User {
                    user_id: "ghost".into(),
                },
                event: ServerEvent::RoomDeleted {
                    room_id: "r1".into(),
                },
            },
        );
        assert_eq!(delivered, 0);

        // Unknown room: best-effort no-op
        let delivered = dispatch_publish(
            &hub,
            PublishRequest {
                target: PublishTarget::Room {
                    room_id: "r1".into(),
                },
                event: ServerEvent::NewRoomMessage {
                    room_id: "r1".into(),
                    message: json!({"text": "hi"}),
                },
            },
        );
        assert_eq!(delivered, 0);
    }
}
