//! The WebSocket endpoint: one axum route, JSON text framing, wired
//! directly into [`qi_bus`]/[`qi_runtime`] types.
//!
//! Binds a `TcpListener`, builds a one-route `Router`, splits the socket
//! into send/receive halves, and forwards outbound frames from a channel
//! on a spawned task straight onto `qi_bus::{Connection, ConnectionHandle}`
//! and `qi_runtime::Hub` — this crate has exactly one transport to
//! implement and no adapter layer sits above it.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use qi_bus::{Connection, ConnectionHandle};
use qi_core::{Message as BusMessage, Session, Source, ValidationError};
use qi_runtime::Hub;
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

/// Abnormal closure during handshake (client disconnected, transport
/// error) before a `Session` could be established.
const CLOSE_ABNORMAL_HANDSHAKE: u16 = 4000;
/// Invalid session initialization: malformed or rejected handshake frame.
const CLOSE_INVALID_SESSION: u16 = 4401;
/// Internal error while registering the connection.
const CLOSE_REGISTRATION_ERROR: u16 = 4500;

/// Addon scope used when a handshake omits one. The reserved hub session
/// and global handlers already use `qi_core::HUB_ID`; ordinary
/// connections that don't name an addon fall back to this instead, so the
/// two are never confused in the connection indices.
const DEFAULT_ADDON: &str = "default";

/// The first frame a client must send after the WebSocket upgrade: a JSON
/// object matching the session schema with at least `logical_id`,
/// extended with the `Source` fields a connection needs that `Session`
/// itself doesn't carry. Flattened into one frame rather than a sibling
/// object, so a client sends a single JSON value to establish both.
/// Absent fields fall back to `DEFAULT_ADDON` and the generated session id.
#[derive(Debug, Deserialize)]
struct Handshake {
    logical_id: String,
    #[serde(default)]
    parent_logical_id: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    addon: Option<String>,
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    window_id: Option<String>,
}

struct ServerState {
    hub: Arc<Hub>,
}

/// Serves the hub's single WebSocket route at `path` on `addr` until
/// `shutdown` resolves, then drains in-flight connections gracefully.
pub async fn serve(
    hub: Arc<Hub>,
    addr: SocketAddr,
    path: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let state = Arc::new(ServerState { hub });
    let router = Router::new().route(&path, get(ws_handler)).with_state(state);

    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;
    info!(addr = %actual_addr, %path, "qi-transport listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    debug!(remote_addr = %addr, "websocket upgrade request");
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: Arc<ServerState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (session, source, source_id) = match read_handshake(&mut ws_rx).await {
        Ok(triple) => triple,
        Err(HandshakeFailure::Disconnected) => {
            debug!(remote_addr = %addr, "disconnected during handshake");
            let _ = ws_tx
                .send(close_frame(CLOSE_ABNORMAL_HANDSHAKE, "disconnected during handshake"))
                .await;
            return;
        }
        Err(failure @ HandshakeFailure::Invalid(_)) => {
            warn!(remote_addr = %addr, %failure, "invalid session initialization");
            let _ = ws_tx
                .send(close_frame(CLOSE_INVALID_SESSION, &failure.to_string()))
                .await;
            return;
        }
    };

    let (handle, mut outbound_rx, mut shutdown_rx) = ConnectionHandle::new();
    let connection = Connection {
        connection_id: session.id.clone(),
        source_id,
        source: source.clone(),
        session: session.clone(),
        handle,
    };

    if let Err(err) = state.hub.register(connection) {
        error!(remote_addr = %addr, error = %err, "failed to register connection");
        let _ = ws_tx
            .send(close_frame(CLOSE_REGISTRATION_ERROR, "internal error during registration"))
            .await;
        return;
    }
    info!(
        connection_id = %session.id,
        logical_id = %session.logical_id,
        addon = %source.addon,
        "session registered"
    );

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    match frame {
                        Some(bytes) => {
                            let text = String::from_utf8_lossy(&bytes).into_owned();
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = &mut shutdown_rx => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => {
                dispatch_inbound(&state.hub, &session, text.as_str()).await;
            }
            Some(Ok(Message::Binary(_))) => {
                warn!(connection_id = %session.id, "binary frame rejected; connection stays open");
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                trace!(connection_id = %session.id, "ping/pong");
            }
            Some(Ok(Message::Close(_))) | None => {
                info!(connection_id = %session.id, "connection closed by client");
                break;
            }
            Some(Err(err)) => {
                warn!(connection_id = %session.id, error = %err, "websocket transport error");
                break;
            }
        }
    }

    send_task.abort();
    state.hub.unregister(&session.id);
    info!(connection_id = %session.id, "session unregistered");
}

enum HandshakeFailure {
    /// The client disconnected, or sent a non-text/close frame, before a
    /// handshake frame arrived. Closes with 4000.
    Disconnected,
    /// A handshake frame arrived but failed to parse or validate. Closes
    /// with 4401.
    Invalid(ValidationError),
}

impl std::fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeFailure::Disconnected => write!(f, "disconnected during handshake"),
            HandshakeFailure::Invalid(err) => write!(f, "{err}"),
        }
    }
}

fn invalid(reason: impl Into<String>) -> HandshakeFailure {
    HandshakeFailure::Invalid(ValidationError::InvalidHandshake { reason: reason.into() })
}

async fn read_handshake(
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
) -> Result<(Session, Source, String), HandshakeFailure> {
    let text = match ws_rx.next().await {
        Some(Ok(Message::Text(text))) => text,
        Some(Ok(Message::Close(_))) | None => return Err(HandshakeFailure::Disconnected),
        Some(Ok(_)) => return Err(invalid("handshake frame must be text")),
        Some(Err(_)) => return Err(HandshakeFailure::Disconnected),
    };

    let handshake: Handshake = serde_json::from_str(&text).map_err(|err| invalid(err.to_string()))?;

    let mut session = Session::new(handshake.logical_id).map_err(|err| invalid(err.to_string()))?;
    if let Some(parent) = handshake.parent_logical_id {
        session = session.with_parent(parent);
    }
    if !handshake.tags.is_empty() {
        session = session.with_tags(handshake.tags);
    }

    let addon = handshake.addon.unwrap_or_else(|| DEFAULT_ADDON.to_string());
    let source = match handshake.window_id {
        Some(window_id) => Source::with_window(addon, session.id.clone(), window_id),
        None => Source::new(addon, session.id.clone()),
    };
    let source_id = handshake.source_id.unwrap_or_else(|| session.id.clone());

    Ok((session, source, source_id))
}

/// Fields `BusMessage` actually serializes. Used only for the dev-mode
/// strict check, layered on top of `serde`'s own (by-default permissive)
/// unknown-field handling.
const KNOWN_MESSAGE_FIELDS: &[&str] = &[
    "message_id",
    "topic",
    "type",
    "sender",
    "target",
    "reply_to",
    "context",
    "payload",
    "timestamp",
    "bubble",
];

async fn dispatch_inbound(hub: &Arc<Hub>, session: &Session, text: &str) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            warn!(connection_id = %session.id, error = %err, "dropping message: not valid JSON");
            return;
        }
    };

    if hub.config.dev_mode {
        if let Err(reason) = reject_unknown_fields(&value) {
            warn!(connection_id = %session.id, %reason, "dropping message: unknown field under dev_mode");
            return;
        }
    }

    let message: BusMessage = match serde_json::from_value(value) {
        Ok(message) => message,
        Err(err) => {
            warn!(connection_id = %session.id, error = %err, "dropping message: doesn't match the envelope schema");
            return;
        }
    };
    if let Err(err) = message.validate() {
        warn!(connection_id = %session.id, error = %err, "dropping message: failed envelope validation");
        return;
    }

    hub.publish(message).await;
}

fn reject_unknown_fields(value: &Value) -> Result<(), String> {
    let Value::Object(map) = value else {
        return Err("message must be a JSON object".to_string());
    };
    for key in map.keys() {
        if !KNOWN_MESSAGE_FIELDS.contains(&key.as_str()) {
            return Err(format!("unknown field {key:?}"));
        }
    }
    Ok(())
}

fn close_frame(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_minimal_handshake() {
        let value = json!({"logical_id": "alice"});
        let handshake: Handshake = serde_json::from_value(value).unwrap();
        assert_eq!(handshake.logical_id, "alice");
        assert!(handshake.addon.is_none());
        assert!(handshake.window_id.is_none());
    }

    #[test]
    fn rejects_unknown_top_level_fields() {
        let value = json!({
            "message_id": "m1",
            "topic": "svc.echo",
            "type": "event",
            "sender": {"id": "s1", "logical_id": "s1", "parent_logical_id": null, "tags": []},
            "surprise": "field",
        });
        assert!(reject_unknown_fields(&value).is_err());
    }

    #[test]
    fn accepts_known_message_fields_only() {
        let value = json!({
            "message_id": "m1",
            "topic": "svc.echo",
            "type": "event",
            "sender": {"id": "s1", "logical_id": "s1", "parent_logical_id": null, "tags": []},
            "target": [],
            "reply_to": null,
            "context": null,
            "payload": {},
            "timestamp": 0.0,
            "bubble": false,
        });
        assert!(reject_unknown_fields(&value).is_ok());
    }
}
