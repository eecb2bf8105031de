//! The Hub facade: the public API surface addons and transport code
//! actually call, wrapping one [`MessageBus`] with lifecycle hooks. A
//! thin decorator/forward layer in front of the bus, plus a
//! register/unregister lifecycle-hook system fired after the
//! corresponding bus operation completes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use qi_bus::{Connection, MessageBus};
use qi_core::{BusError, HandlerFn, HandlerId, Message, MessageType, Session, Source};
use serde_json::{Map, Value};
use tracing::error;

use crate::config::BusConfig;

/// A lifecycle hook: invoked after a session registers or unregisters, or
/// after a message publishes. A panicking hook is caught and logged, never
/// allowed to take down the register/unregister/publish call that fired it.
pub type Hook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    on_register: Vec<Hook>,
    on_unregister: Vec<Hook>,
    on_publish: Vec<Hook>,
}

/// Facade over [`MessageBus`] exposing the surface addons and the
/// transport endpoint use: `register`/`unregister` session lifecycle,
/// `publish`/`request` message operations, `on` topic subscription, and
/// `on_register`/`on_unregister`/`on_publish` hook subscription. Connection
/// lookups that don't need a hook fired still go through [`Hub::bus`]
/// directly instead of being re-exposed one method at a time.
pub struct Hub {
    bus: Arc<MessageBus>,
    hooks: Mutex<Hooks>,
    /// `parent_logical_id -> child logical_ids`. The connection manager
    /// indexes connections, not the parent/child relation between
    /// sessions, so cascade-unregister tracks it here as a lookup keyed
    /// by `logical_id` rather than a direct pointer, so no ownership
    /// cycle exists between sessions.
    children: Mutex<HashMap<String, HashSet<String>>>,
    pub config: BusConfig,
}

impl Hub {
    /// Builds a Hub over a fresh [`MessageBus`], sized from `config`.
    pub fn new(config: BusConfig) -> Self {
        Self {
            bus: Arc::new(MessageBus::new(config.max_pending_requests_per_session)),
            hooks: Mutex::new(Hooks::default()),
            children: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Direct access to the underlying bus, for handler registration and
    /// connection-manager lookups that don't need a hook fired.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Registers a hook fired (with the new connection's id) after every
    /// successful [`Hub::register`].
    pub fn on_register(&self, hook: Hook) {
        self.hooks.lock().on_register.push(hook);
    }

    /// Registers a hook fired (with the departing connection's id) after
    /// every [`Hub::unregister`].
    pub fn on_unregister(&self, hook: Hook) {
        self.hooks.lock().on_unregister.push(hook);
    }

    /// Registers a hook fired (with the message's topic) after every
    /// [`Hub::publish`].
    pub fn on_publish(&self, hook: Hook) {
        self.hooks.lock().on_publish.push(hook);
    }

    /// Subscribes `function` to `topic` under `source`'s scope. Thin
    /// forward to [`qi_bus::HandlerRegistry::register`], kept on the facade
    /// so addons don't need to reach into [`Hub::bus`] just to subscribe.
    pub fn on(&self, topic: impl Into<String>, source: &Source, function: HandlerFn) -> HandlerId {
        self.bus.handlers.register(function, topic, source)
    }

    /// Registers a new connection, links it into the parent/child lookup
    /// if it named a `parent_logical_id`, then fires `on_register` hooks.
    pub fn register(&self, conn: Connection) -> Result<(), BusError> {
        let connection_id = conn.connection_id.clone();
        let logical_id = conn.session.logical_id.clone();
        let parent_logical_id = conn.session.parent_logical_id.clone();
        self.bus.register(conn)?;
        if let Some(parent) = parent_logical_id {
            self.children.lock().entry(parent).or_default().insert(logical_id);
        }
        self.fire(&self.hooks.lock().on_register, &connection_id);
        Ok(())
    }

    /// Tears down a connection and cascades to every descendant session
    /// reachable through the parent/child lookup, then fires
    /// `on_unregister` hooks for each connection actually torn down.
    ///
    /// Traverses the parent/child tree depth-first with an explicit stack
    /// rather than recursion, so an unregister touching many descendant
    /// sessions can't blow the call stack.
    pub fn unregister(&self, connection_id: &str) {
        let Some(conn) = self.bus.connections.get_by_id(connection_id) else {
            return;
        };

        let mut stack = vec![conn.session.logical_id.clone()];
        let mut torn_down = Vec::new();
        while let Some(logical_id) = stack.pop() {
            let Some(conn) = self.bus.connections.get_by_logical_id(&logical_id) else {
                self.children.lock().remove(&logical_id);
                continue;
            };
            self.bus.disconnect(&conn.connection_id);
            torn_down.push(conn.connection_id);
            if let Some(child_logicals) = self.children.lock().remove(&logical_id) {
                stack.extend(child_logicals);
            }
        }

        let hooks = self.hooks.lock();
        for connection_id in &torn_down {
            self.fire(&hooks.on_unregister, connection_id);
        }
    }

    /// Passthrough to [`MessageBus::publish`] for an already-built message
    /// of any type (EVENT, REQUEST, or REPLY), firing `on_publish` hooks
    /// with the message's topic afterward.
    pub async fn publish(&self, message: Message) {
        let topic = message.topic.clone();
        self.bus.publish(message).await;
        self.fire(&self.hooks.lock().on_publish, &topic);
    }

    /// Fire-and-forget publish of an EVENT.
    pub async fn publish_event(&self, sender: Session, topic: impl Into<String>, payload: Map<String, Value>) {
        match Message::builder(MessageType::Event, sender, topic).payload(payload).build() {
            Ok(message) => self.publish(message).await,
            Err(err) => error!(error = %err, "failed to build event for publish"),
        }
    }

    /// Sends a REQUEST and awaits its REPLY, using `self.config`'s default
    /// timeout unless `timeout_secs` overrides it.
    pub async fn request(
        &self,
        topic: impl Into<String>,
        payload: Map<String, Value>,
        sender: Session,
        target: Vec<String>,
        timeout_secs: Option<f64>,
    ) -> Result<Value, BusError> {
        let timeout_secs = timeout_secs.unwrap_or(self.config.reply_timeout_secs);
        self.bus
            .request(topic, payload, sender, target, false, timeout_secs)
            .await
    }

    /// Runs every hook in `hooks`, logging (not propagating) a panic from
    /// any individual hook.
    fn fire(&self, hooks: &[Hook], connection_id: &str) {
        for hook in hooks {
            let hook = hook.clone();
            let connection_id = connection_id.to_string();
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(&connection_id))) {
                error!(?panic, "lifecycle hook panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qi_bus::ConnectionHandle;
    use qi_core::{from_sync, MessageType, Source, HUB_ID};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connection(logical_id: &str) -> Connection {
        let (handle, _rx, _shutdown_rx) = ConnectionHandle::new();
        let session = Session::new(logical_id).unwrap();
        Connection {
            connection_id: session.id.clone(),
            source_id: session.id.clone(),
            source: Source::new("addon", &session.id),
            session,
            handle,
        }
    }

    fn connection_with_parent(logical_id: &str, parent_logical_id: &str) -> Connection {
        let (handle, _rx, _shutdown_rx) = ConnectionHandle::new();
        let session = Session::new(logical_id).unwrap().with_parent(parent_logical_id);
        Connection {
            connection_id: session.id.clone(),
            source_id: session.id.clone(),
            source: Source::new("addon", &session.id),
            session,
            handle,
        }
    }

    #[tokio::test]
    async fn register_fires_on_register_hooks() {
        let hub = Hub::new(BusConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        hub.on_register(Arc::new(move |_id: &str| {
            calls2.fetch_add(1, Ordering::SeqCst);
        }));

        hub.register(connection("alice")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregister_fires_on_unregister_hooks_even_if_a_hook_panics() {
        let hub = Hub::new(BusConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        hub.on_unregister(Arc::new(|_id: &str| panic!("boom")));
        hub.on_unregister(Arc::new(move |_id: &str| {
            calls2.fetch_add(1, Ordering::SeqCst);
        }));

        let conn = connection("alice");
        let id = conn.connection_id.clone();
        hub.register(conn).unwrap();
        hub.unregister(&id);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregister_cascades_to_child_and_grandchild_sessions() {
        let hub = Hub::new(BusConfig::default());
        let parent = connection("parent");
        let parent_id = parent.connection_id.clone();
        let child = connection_with_parent("child", "parent");
        let child_id = child.connection_id.clone();
        let grandchild = connection_with_parent("grandchild", "child");
        let grandchild_id = grandchild.connection_id.clone();

        hub.register(parent).unwrap();
        hub.register(child).unwrap();
        hub.register(grandchild).unwrap();

        hub.unregister(&parent_id);

        assert!(hub.bus().connections.get_by_id(&parent_id).is_none());
        assert!(hub.bus().connections.get_by_id(&child_id).is_none());
        assert!(hub.bus().connections.get_by_id(&grandchild_id).is_none());
    }

    #[tokio::test]
    async fn request_uses_configured_default_timeout() {
        let mut config = BusConfig::default();
        config.reply_timeout_secs = 0.05;
        let hub = Hub::new(config);

        let sender = Session::new("caller").unwrap();
        let err = hub
            .request("svc.silence", Map::new(), sender, vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout { .. }));
    }

    #[tokio::test]
    async fn on_subscribes_a_handler_reachable_through_publish() {
        let hub = Hub::new(BusConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let hub_source = Source::new(HUB_ID, HUB_ID);
        hub.on(
            "svc.ping",
            &hub_source,
            from_sync(move |_msg: Message| {
                calls2.fetch_add(1, Ordering::SeqCst);
                None
            }),
        );

        let sender = Session::new("caller").unwrap();
        let message = Message::builder(MessageType::Event, sender, "svc.ping").build().unwrap();
        hub.publish(message).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_fires_on_publish_hooks_with_the_topic() {
        let hub = Hub::new(BusConfig::default());
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        hub.on_publish(Arc::new(move |topic: &str| {
            *seen2.lock() = Some(topic.to_string());
        }));

        let sender = Session::new("caller").unwrap();
        let message = Message::builder(MessageType::Event, sender, "svc.ping").build().unwrap();
        hub.publish(message).await;

        assert_eq!(seen.lock().as_deref(), Some("svc.ping"));
    }
}
