//! The Message Bus: dispatch, request/reply correlation, and fan-out.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::{join_all, FutureExt};
use parking_lot::Mutex;
use qi_core::{BusError, Message, MessageType, PendingRequest, Session, Source, HUB_ID};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::connection::{Connection, ConnectionManager};
use crate::handler_registry::HandlerRegistry;

/// Default cap on pending requests per session when no configuration is
/// supplied.
pub const DEFAULT_MAX_PENDING_REQUESTS_PER_SESSION: usize = 100;

/// Default REQUEST/REPLY timeout in seconds.
pub const DEFAULT_REPLY_TIMEOUT_SECS: f64 = 5.0;

#[derive(Default)]
struct PendingRequests {
    by_id: HashMap<String, PendingRequest>,
    by_session: HashMap<String, HashSet<String>>,
}

impl PendingRequests {
    fn insert(&mut self, pending: PendingRequest) {
        self.by_session
            .entry(pending.requesting_session_id.clone())
            .or_default()
            .insert(pending.request_id.clone());
        self.by_id.insert(pending.request_id.clone(), pending);
    }

    /// Atomically removes a pending request and its session linkage.
    fn cleanup(&mut self, request_id: &str) -> Option<PendingRequest> {
        let pending = self.by_id.remove(request_id)?;
        if let Some(ids) = self.by_session.get_mut(&pending.requesting_session_id) {
            ids.remove(request_id);
            if ids.is_empty() {
                self.by_session.remove(&pending.requesting_session_id);
            }
        }
        Some(pending)
    }

    fn pending_count(&self, session_id: &str) -> usize {
        self.by_session.get(session_id).map_or(0, HashSet::len)
    }

    /// Removes and returns every pending request belonging to a session.
    fn drain_session(&mut self, session_id: &str) -> Vec<PendingRequest> {
        let Some(ids) = self.by_session.remove(session_id) else {
            return Vec::new();
        };
        ids.into_iter().filter_map(|id| self.by_id.remove(&id)).collect()
    }
}

/// The core router: owns the connection manager and handler registry,
/// dispatches published messages, and correlates REQUEST/REPLY pairs.
///
/// A single mutex guards pending-request bookkeeping only; the connection
/// manager and handler registry guard their own state independently, so a
/// slow handler invocation never blocks connection registration or vice
/// versa.
pub struct MessageBus {
    pub connections: ConnectionManager,
    pub handlers: HandlerRegistry,
    pending: Mutex<PendingRequests>,
    max_pending_requests_per_session: usize,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_REQUESTS_PER_SESSION)
    }
}

impl MessageBus {
    /// Builds a bus with the given per-session pending-request cap.
    pub fn new(max_pending_requests_per_session: usize) -> Self {
        Self {
            connections: ConnectionManager::new(),
            handlers: HandlerRegistry::new(),
            pending: Mutex::new(PendingRequests::default()),
            max_pending_requests_per_session,
        }
    }

    /// Registers a connection. Thin pass-through kept for symmetry with
    /// [`Self::disconnect`]; most callers use `self.connections.register`
    /// directly.
    pub fn register(&self, conn: Connection) -> Result<(), BusError> {
        let logical_id = conn.session.logical_id.clone();
        let connection_id = conn.connection_id.clone();
        self.connections.register(conn)?;
        debug!(%logical_id, %connection_id, "session registered");
        Ok(())
    }

    /// Tears down everything owned by a disconnecting connection: removes
    /// it from the connection manager, drops its scoped handlers, and
    /// cancels any requests it had in flight. Keyed by `connection_id`
    /// (equal to `Session.id`), so no separate lookup is needed.
    pub fn disconnect(&self, connection_id: &str) {
        let Some(conn) = self.connections.get_by_id(connection_id) else {
            return;
        };
        self.connections.unregister(connection_id);
        self.handlers.remove_by_source(&conn.source);

        let cancelled = self.pending.lock().drain_session(connection_id);
        for pending in cancelled {
            let _ = pending.reply_tx; // drop(): receiver observes a closed channel.
        }
        debug!(%connection_id, logical_id = %conn.session.logical_id, "session unregistered");
    }

    /// Processes one inbound message: resolves a REPLY against a pending
    /// request, or dispatches to handlers and fans the result out.
    pub async fn publish(&self, message: Message) {
        if message.message_type == MessageType::Reply {
            let Some(reply_to) = message.reply_to.clone() else {
                return;
            };
            let pending = self.pending.lock().cleanup(&reply_to);
            match pending {
                Some(pending) => {
                    let _ = pending.reply_tx.send(Value::Object(message.payload.clone()));
                }
                None => {
                    warn!(request_id = %reply_to, "reply for unknown or already-resolved request");
                }
            }
            return;
        }

        let dispatch_source = self.dispatch_source(&message.sender);
        let results = self.dispatch(&message, &dispatch_source).await;

        if message.message_type == MessageType::Request {
            if let Some(reply_payload) = results.into_iter().flatten().next() {
                let payload = match reply_payload {
                    Value::Object(map) => map,
                    other => {
                        let mut map = Map::new();
                        map.insert("value".to_string(), other);
                        map
                    }
                };
                let reply = Message::builder(MessageType::Reply, Session::hub(), message.topic.clone())
                    .target(vec![message.sender.logical_id.clone()])
                    .reply_to(message.message_id.clone())
                    .payload(payload);
                let reply = match message.context.clone() {
                    Some(ctx) => reply.context(ctx),
                    None => reply,
                };
                match reply.build() {
                    Ok(reply) => self.fan_out(&reply).await,
                    Err(err) => error!(error = %err, "failed to build auto-reply"),
                }
                return;
            }
        }

        self.fan_out(&message).await;
    }

    /// Sends a REQUEST and awaits its REPLY, up to `timeout_secs`.
    pub async fn request(
        &self,
        topic: impl Into<String>,
        payload: Map<String, Value>,
        sender: Session,
        target: Vec<String>,
        bubble: bool,
        timeout_secs: f64,
    ) -> Result<Value, BusError> {
        if !(0.0..=300.0).contains(&timeout_secs) || timeout_secs <= 0.0 {
            return Err(BusError::InvalidTimeout { timeout_secs });
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let (pending, reply_rx) = PendingRequest::new(request_id.clone(), sender.id.clone());

        {
            let mut guard = self.pending.lock();
            let count = guard.pending_count(&sender.id);
            if count >= self.max_pending_requests_per_session {
                return Err(BusError::PendingRequestLimitExceeded {
                    session_id: sender.id.clone(),
                    pending: count,
                    cap: self.max_pending_requests_per_session,
                });
            }
            guard.insert(pending);
        }

        let message = Message::builder(MessageType::Request, sender, topic)
            .message_id(request_id.clone())
            .target(target)
            .bubble(bubble)
            .payload(payload)
            .build()?;
        self.publish(message).await;

        match tokio::time::timeout(Duration::from_secs_f64(timeout_secs), reply_rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_recv_error)) => {
                self.pending.lock().cleanup(&request_id);
                Err(BusError::Cancelled {
                    request_id,
                    reason: "session disconnected".to_string(),
                })
            }
            Err(_elapsed) => {
                self.pending.lock().cleanup(&request_id);
                Err(BusError::Timeout {
                    request_id,
                    timeout_secs,
                })
            }
        }
    }

    /// Invokes every matching handler concurrently and collects each one's
    /// contribution, preserving per-handler `None`/`Some` distinction and
    /// the handler list's registration order in the result vector. A
    /// handler that panics is treated as a per-handler failure: logged with
    /// the topic, contributing `None`, never unwinding into the caller.
    async fn dispatch(&self, message: &Message, source: &Source) -> Vec<Option<Value>> {
        let handlers = self.handlers.get_handlers(&message.topic, source);
        let topic = message.topic.clone();
        let calls = handlers.into_iter().map(|handler| {
            let message = message.clone();
            let topic = topic.clone();
            async move {
                match AssertUnwindSafe(handler.function.call(&message)).catch_unwind().await {
                    Ok(value) => value,
                    Err(_panic) => {
                        error!(%topic, "handler panicked; treating as no reply");
                        None
                    }
                }
            }
        });
        join_all(calls).await
    }

    /// Resolves the scope a sender dispatches under: the scope of its live
    /// connection if one exists, otherwise the reserved hub scope (used
    /// for server-originated publishes that have no registered connection).
    fn dispatch_source(&self, sender: &Session) -> Source {
        self.connections
            .get_by_id(&sender.id)
            .map(|conn| conn.source)
            .unwrap_or_else(|| Source::new(HUB_ID, HUB_ID))
    }

    /// Sends a message to every resolved destination connection. Send
    /// failures are logged per connection and never stop the rest of the
    /// fan-out.
    async fn fan_out(&self, message: &Message) {
        let raw = match serde_json::to_vec(message) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(error = %err, "failed to serialize message for fan-out");
                return;
            }
        };
        for conn in self.resolve_destinations(message) {
            if let Err(err) = conn.handle.send(raw.clone()).await {
                error!(connection_id = %conn.connection_id, error = %err, "fan-out send failed");
            }
        }
    }

    /// Determines the destination connections for a message: explicit
    /// `target` logical ids take priority; otherwise `bubble` routes to
    /// the sender's parent session; otherwise broadcast to everyone but
    /// the sender.
    fn resolve_destinations(&self, message: &Message) -> Vec<Connection> {
        if !message.target.is_empty() {
            return message
                .target
                .iter()
                .filter_map(|logical_id| self.connections.get_by_logical_id(logical_id))
                .collect();
        }
        if message.bubble {
            if let Some(parent) = &message.sender.parent_logical_id {
                return self
                    .connections
                    .get_by_logical_id(parent)
                    .into_iter()
                    .collect();
            }
            return Vec::new();
        }
        self.connections
            .all_live_logical_ids()
            .into_iter()
            .filter(|logical_id| logical_id != &message.sender.logical_id)
            .filter_map(|logical_id| self.connections.get_by_logical_id(&logical_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionHandle;
    use qi_core::{from_async, from_sync};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn make_connection(logical_id: &str, addon: &str) -> (Connection, mpsc::Receiver<Vec<u8>>) {
        let (handle, rx, _shutdown_rx) = ConnectionHandle::new();
        let session = Session::new(logical_id).unwrap();
        let conn = Connection {
            connection_id: session.id.clone(),
            source_id: session.id.clone(),
            source: Source::new(addon, &session.id),
            session,
            handle,
        };
        (conn, rx)
    }

    #[tokio::test]
    async fn event_with_no_target_broadcasts_to_everyone_but_sender() {
        let bus = MessageBus::default();
        let (sender_conn, _sender_rx) = make_connection("alice", "addon");
        let (other_conn, mut other_rx) = make_connection("bob", "addon");
        let sender_session = sender_conn.session.clone();
        bus.register(sender_conn).unwrap();
        bus.register(other_conn).unwrap();

        let msg = Message::builder(MessageType::Event, sender_session, "svc.ping")
            .build()
            .unwrap();
        bus.publish(msg).await;

        let received = other_rx.try_recv().expect("bob should receive broadcast");
        let decoded: Message = serde_json::from_slice(&received).unwrap();
        assert_eq!(decoded.topic, "svc.ping");
    }

    #[tokio::test]
    async fn request_with_handler_reply_resolves_request_future() {
        let bus = MessageBus::default();
        // Global handler, reachable from any sender without a live connection
        // (the `dispatch_source` fallback for an unregistered sender).
        let source = Source::new(HUB_ID, HUB_ID);
        let handler = from_sync(|_msg: Message| {
            let mut map = Map::new();
            map.insert("ok".to_string(), Value::Bool(true));
            Some(Value::Object(map))
        });
        bus.handlers.register(handler, "svc.echo", &source);

        let sender = Session::new("caller").unwrap();
        let reply = bus
            .request("svc.echo", Map::new(), sender, vec![], false, 2.0)
            .await
            .unwrap();
        assert_eq!(reply["ok"], Value::Bool(true));
    }

    #[tokio::test]
    async fn request_rejects_timeout_out_of_range() {
        let bus = MessageBus::default();
        let sender = Session::new("caller").unwrap();
        let err = bus
            .request("svc.echo", Map::new(), sender, vec![], false, 301.0)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidTimeout { timeout_secs } if timeout_secs == 301.0));
    }

    #[tokio::test]
    async fn request_times_out_when_no_handler_replies() {
        let bus = MessageBus::default();
        let sender = Session::new("caller").unwrap();
        let err = bus
            .request("svc.silence", Map::new(), sender, vec![], false, 0.05)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout { .. }));
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_requests_for_that_session() {
        let bus = Arc::new(MessageBus::default());
        let (conn, _rx) = make_connection("caller", "addon");
        let sender = conn.session.clone();
        let connection_id = conn.connection_id.clone();
        bus.register(conn).unwrap();

        let bus2 = bus.clone();
        let disconnecting = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            bus2.disconnect(&connection_id);
        });

        let err = bus
            .request("svc.never", Map::new(), sender, vec![], false, 5.0)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Cancelled { .. }));
        disconnecting.await.unwrap();
    }

    #[tokio::test]
    async fn bubble_routes_to_parent_when_target_empty() {
        let bus = MessageBus::default();
        let (parent_conn, mut parent_rx) = make_connection("parent", "addon");
        bus.register(parent_conn).unwrap();

        let child = Session::new("child").unwrap().with_parent("parent");
        let msg = Message::builder(MessageType::Event, child, "svc.bubble")
            .bubble(true)
            .build()
            .unwrap();
        bus.publish(msg).await;

        let received = parent_rx.try_recv().expect("parent should receive bubbled message");
        let decoded: Message = serde_json::from_slice(&received).unwrap();
        assert_eq!(decoded.topic, "svc.bubble");
    }

    #[tokio::test]
    async fn explicit_target_takes_priority_over_bubble() {
        let bus = MessageBus::default();
        let (parent_conn, mut parent_rx) = make_connection("parent", "addon");
        let (other_conn, mut other_rx) = make_connection("target-a", "addon");
        bus.register(parent_conn).unwrap();
        bus.register(other_conn).unwrap();

        let child = Session::new("child").unwrap().with_parent("parent");
        let msg = Message::builder(MessageType::Event, child, "svc.targeted")
            .bubble(true)
            .target(vec!["target-a".to_string()])
            .build()
            .unwrap();
        bus.publish(msg).await;

        assert!(other_rx.try_recv().is_ok());
        assert!(parent_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn panicking_handler_does_not_block_other_handlers_or_propagate() {
        let bus = MessageBus::default();
        // Hub-wide scope, matching the dispatch_source fallback for a sender
        // with no live connection.
        let source = Source::new(HUB_ID, HUB_ID);
        bus.handlers.register(
            from_async(|_msg: Message| async { panic!("boom") }),
            "svc.unstable",
            &source,
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        bus.handlers.register(
            from_sync(move |_msg: Message| {
                calls2.fetch_add(1, Ordering::SeqCst);
                let mut map = Map::new();
                map.insert("ok".to_string(), Value::Bool(true));
                Some(Value::Object(map))
            }),
            "svc.unstable",
            &source,
        );

        let sender = Session::new("caller").unwrap();
        let reply = bus
            .request("svc.unstable", Map::new(), sender, vec![], false, 2.0)
            .await
            .unwrap();
        assert_eq!(reply["ok"], Value::Bool(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_returning_none_yields_no_auto_reply_but_still_fans_out() {
        let bus = MessageBus::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let source = Source::new(HUB_ID, HUB_ID);
        bus.handlers.register(
            from_sync(move |_msg: Message| {
                calls2.fetch_add(1, Ordering::SeqCst);
                None
            }),
            "svc.quiet",
            &source,
        );
        let (observer_conn, mut observer_rx) = make_connection("observer", "addon");
        bus.register(observer_conn).unwrap();

        let sender = Session::new("caller").unwrap();
        let msg = Message::builder(MessageType::Request, sender, "svc.quiet")
            .reply_to("not-used")
            .build()
            .unwrap();
        bus.publish(msg).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(observer_rx.try_recv().is_ok());
    }
}
