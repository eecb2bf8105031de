//! The Connection Manager: an async-safe registry of active WebSocket
//! connections, indexed five ways, with collision handling on `window_id`
//! reuse and brief-hold reads. Wildcard-pattern topic subscriptions are an
//! explicit non-goal and are not implemented here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use qi_core::{BusError, ProgrammingError, Session, Source, SourceKey};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Outbound half of a connection: a channel to the task that owns the
/// physical socket, plus a shutdown signal. The manager never touches the
/// socket directly, only this handle.
#[derive(Clone)]
pub struct ConnectionHandle {
    message_tx: mpsc::Sender<Vec<u8>>,
    shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ConnectionHandle {
    /// Builds a handle over an outbound byte channel and a one-shot
    /// shutdown signal, returning the handle and the receiving ends for
    /// the task that owns the socket.
    pub fn new() -> (Self, mpsc::Receiver<Vec<u8>>, oneshot::Receiver<()>) {
        let (message_tx, message_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        (
            Self {
                message_tx,
                shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
            },
            message_rx,
            shutdown_rx,
        )
    }

    /// Sends a pre-encoded frame to the connection's socket task.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), BusError> {
        self.message_tx
            .send(bytes)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))
    }

    /// Signals the owning socket task to close. Idempotent: a second call
    /// on an already-closing socket is a no-op.
    pub fn close(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

/// A live connection: its identity, the scope it was registered under,
/// and the handle used to reach its socket.
#[derive(Clone)]
pub struct Connection {
    /// Globally unique connection id. Equal to `session.id`.
    pub connection_id: String,
    /// Physical source identifier (distinct from `source.key()`; several
    /// windows of the same addon/session may share one `source_id`).
    pub source_id: String,
    /// The `(addon, session_id, window_id?)` scope this connection was
    /// registered under.
    pub source: Source,
    /// The session this connection belongs to, carried so that
    /// logical-id routing (target resolution, broadcast, cascade lookup)
    /// doesn't need a second registry.
    pub session: Session,
    /// Handle to the connection's outbound channel.
    pub handle: ConnectionHandle,
}

#[derive(Default)]
struct Indices {
    by_id: HashMap<String, Connection>,
    by_source: HashMap<SourceKey, HashSet<String>>,
    by_source_id: HashMap<String, HashSet<String>>,
    by_session: HashMap<String, HashSet<String>>,
    by_addon: HashMap<String, HashSet<String>>,
    by_window: HashMap<String, String>,
    /// `logical_id -> connection_id`. Destination resolution (`target`,
    /// broadcast) routes by logical_id, so it needs its own index.
    by_logical_id: HashMap<String, String>,
}

impl Indices {
    fn insert(&mut self, conn: Connection) {
        let key = conn.source.key();
        self.by_source
            .entry(key)
            .or_default()
            .insert(conn.connection_id.clone());
        self.by_source_id
            .entry(conn.source_id.clone())
            .or_default()
            .insert(conn.connection_id.clone());
        self.by_session
            .entry(conn.source.session_id.clone())
            .or_default()
            .insert(conn.connection_id.clone());
        self.by_addon
            .entry(conn.source.addon.clone())
            .or_default()
            .insert(conn.connection_id.clone());
        if let Some(window_id) = &conn.source.window_id {
            self.by_window
                .insert(window_id.clone(), conn.connection_id.clone());
        }
        self.by_logical_id
            .insert(conn.session.logical_id.clone(), conn.connection_id.clone());
        self.by_id.insert(conn.connection_id.clone(), conn);
    }

    /// Removes a connection from every index. Empty set-valued entries are
    /// deleted, never left dangling, per the empty-set policy.
    fn drop_indices(&mut self, connection_id: &str) -> Option<Connection> {
        let conn = self.by_id.remove(connection_id)?;
        let key = conn.source.key();
        if let Some(set) = self.by_source.get_mut(&key) {
            set.remove(connection_id);
            if set.is_empty() {
                self.by_source.remove(&key);
            }
        }
        if let Some(set) = self.by_source_id.get_mut(&conn.source_id) {
            set.remove(connection_id);
            if set.is_empty() {
                self.by_source_id.remove(&conn.source_id);
            }
        }
        if let Some(set) = self.by_session.get_mut(&conn.source.session_id) {
            set.remove(connection_id);
            if set.is_empty() {
                self.by_session.remove(&conn.source.session_id);
            }
        }
        if let Some(set) = self.by_addon.get_mut(&conn.source.addon) {
            set.remove(connection_id);
            if set.is_empty() {
                self.by_addon.remove(&conn.source.addon);
            }
        }
        if let Some(window_id) = &conn.source.window_id {
            if self.by_window.get(window_id) == Some(&conn.connection_id) {
                self.by_window.remove(window_id);
            }
        }
        if self.by_logical_id.get(&conn.session.logical_id) == Some(&conn.connection_id) {
            self.by_logical_id.remove(&conn.session.logical_id);
        }
        Some(conn)
    }

    /// Debug-only bidirectional consistency check across every index.
    #[cfg(debug_assertions)]
    fn assert_consistency(&self) {
        for (cid, conn) in &self.by_id {
            let key = conn.source.key();
            debug_assert!(
                self.by_source.get(&key).is_some_and(|s| s.contains(cid)),
                "connection {cid} missing from by_source[{key:?}]"
            );
            debug_assert!(
                self.by_source_id
                    .get(&conn.source_id)
                    .is_some_and(|s| s.contains(cid)),
                "connection {cid} missing from by_source_id"
            );
            debug_assert!(
                self.by_session
                    .get(&conn.source.session_id)
                    .is_some_and(|s| s.contains(cid)),
                "connection {cid} missing from by_session"
            );
            debug_assert!(
                self.by_addon
                    .get(&conn.source.addon)
                    .is_some_and(|s| s.contains(cid)),
                "connection {cid} missing from by_addon"
            );
            if let Some(window_id) = &conn.source.window_id {
                debug_assert_eq!(self.by_window.get(window_id), Some(cid));
            }
            debug_assert_eq!(self.by_logical_id.get(&conn.session.logical_id), Some(cid));
        }
        debug_assert!(self.by_source.values().all(|s| !s.is_empty()));
        debug_assert!(self.by_source_id.values().all(|s| !s.is_empty()));
        debug_assert!(self.by_session.values().all(|s| !s.is_empty()));
        debug_assert!(self.by_addon.values().all(|s| !s.is_empty()));
    }

    #[cfg(not(debug_assertions))]
    fn assert_consistency(&self) {}
}

/// Async-safe registry of active connections. A single mutex serializes
/// every mutation; readers take the same lock but only for the duration
/// of an index lookup and clone (a "brief-hold read" that never spans an
/// `.await` or a handler invocation).
#[derive(Default)]
pub struct ConnectionManager {
    indices: Mutex<Indices>,
}

impl ConnectionManager {
    /// Builds an empty connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under its source's indices.
    ///
    /// At most one live connection exists per `window_id` and at most one
    /// live session exists per `logical_id`; a collision on either evicts
    /// the old connection from the indices inside the critical section,
    /// with its socket closed *after* the lock is released, so a slow
    /// close never blocks other writers.
    pub fn register(&self, conn: Connection) -> Result<(), BusError> {
        if conn.connection_id.is_empty() {
            return Err(ProgrammingError::new("connection missing id").into());
        }
        let evicted = {
            let mut indices = self.indices.lock();
            let mut evicted: Vec<Connection> = Vec::new();

            if let Some(old_id) = conn
                .source
                .window_id
                .as_ref()
                .and_then(|w| indices.by_window.get(w).cloned())
                .filter(|old_id| old_id != &conn.connection_id)
            {
                if let Some(old) = indices.drop_indices(&old_id) {
                    evicted.push(old);
                }
            }
            if let Some(old_id) = indices
                .by_logical_id
                .get(&conn.session.logical_id)
                .cloned()
                .filter(|old_id| old_id != &conn.connection_id && !evicted.iter().any(|e| &e.connection_id == old_id))
            {
                if let Some(old) = indices.drop_indices(&old_id) {
                    evicted.push(old);
                }
            }

            indices.insert(conn);
            indices.assert_consistency();
            evicted
        };
        for old in evicted {
            warn!(
                old_connection_id = %old.connection_id,
                logical_id = %old.session.logical_id,
                window_id = ?old.source.window_id,
                "evicting connection on registration collision"
            );
            old.handle.close();
        }
        Ok(())
    }

    /// Removes a connection from every index. A no-op for unknown ids.
    pub fn unregister(&self, connection_id: &str) {
        let mut indices = self.indices.lock();
        indices.drop_indices(connection_id);
        indices.assert_consistency();
    }

    /// Returns a point-in-time copy of the connection, if present.
    pub fn get_by_id(&self, connection_id: &str) -> Option<Connection> {
        self.indices.lock().by_id.get(connection_id).cloned()
    }

    /// Returns all live connections for a `source_id`.
    pub fn get_by_source_id(&self, source_id: &str) -> Vec<Connection> {
        self.collect(|i| i.by_source_id.get(source_id))
    }

    /// Returns all live connections for a session.
    pub fn get_by_session(&self, session_id: &str) -> Vec<Connection> {
        self.collect(|i| i.by_session.get(session_id))
    }

    /// Returns all live connections for an addon.
    pub fn get_by_addon(&self, addon: &str) -> Vec<Connection> {
        self.collect(|i| i.by_addon.get(addon))
    }

    /// Returns all live connections for an exact source scope.
    pub fn get_by_source(&self, source: &Source) -> Vec<Connection> {
        let key = source.key();
        self.collect(|i| i.by_source.get(&key))
    }

    /// Returns the single live connection hosting a window, if any.
    pub fn get_by_window(&self, window_id: &str) -> Option<Connection> {
        let indices = self.indices.lock();
        let cid = indices.by_window.get(window_id)?;
        indices.by_id.get(cid).cloned()
    }

    /// Returns the single live connection registered under a session's
    /// `logical_id`, if any. Used for target/broadcast resolution.
    pub fn get_by_logical_id(&self, logical_id: &str) -> Option<Connection> {
        let indices = self.indices.lock();
        let cid = indices.by_logical_id.get(logical_id)?;
        indices.by_id.get(cid).cloned()
    }

    /// Returns the `logical_id` of every live connection, for broadcast
    /// destination resolution.
    pub fn all_live_logical_ids(&self) -> Vec<String> {
        self.indices.lock().by_logical_id.keys().cloned().collect()
    }

    /// Resolves connections for a source by progressively narrowing
    /// scope: window, then session, then addon, then the exact source
    /// triple. A convenience read path; it does not change the two-tier
    /// handler lookup algorithm, which is a separate concern in
    /// [`crate::handler_registry::HandlerRegistry`].
    pub fn infer_by_source(&self, source: &Source) -> Vec<Connection> {
        if let Some(window_id) = &source.window_id {
            if let Some(conn) = self.get_by_window(window_id) {
                return vec![conn];
            }
            return Vec::new();
        }
        let by_session = self.get_by_session(&source.session_id);
        if !by_session.is_empty() {
            return by_session;
        }
        let by_addon = self.get_by_addon(&source.addon);
        if !by_addon.is_empty() {
            return by_addon;
        }
        self.get_by_source(source)
    }

    fn collect<F>(&self, select: F) -> Vec<Connection>
    where
        F: for<'a> FnOnce(&'a Indices) -> Option<&'a HashSet<String>>,
    {
        let indices = self.indices.lock();
        let ids: Vec<String> = match select(&indices) {
            Some(set) => set.iter().cloned().collect(),
            None => Vec::new(),
        };
        ids.into_iter()
            .filter_map(|id| indices.by_id.get(&id).cloned())
            .collect()
    }

    /// Closes and removes every connection. Snapshots under the lock,
    /// releases it, then closes sockets concurrently; used for shutdown
    /// and tests.
    pub fn clear(&self) {
        let snapshot: Vec<Connection> = {
            let mut indices = self.indices.lock();
            let all: Vec<Connection> = indices.by_id.values().cloned().collect();
            indices.by_id.clear();
            indices.by_source.clear();
            indices.by_source_id.clear();
            indices.by_session.clear();
            indices.by_addon.clear();
            indices.by_window.clear();
            all
        };
        for conn in snapshot {
            conn.handle.close();
        }
    }

    /// Closes every connection for a session, removing them from the
    /// registry first.
    pub fn close_by_session(&self, session_id: &str) {
        let snapshot = self.get_by_session(session_id);
        for conn in &snapshot {
            self.unregister(&conn.connection_id);
        }
        for conn in snapshot {
            conn.handle.close();
        }
    }

    /// Closes a single connection by id, removing it from the registry
    /// first. A no-op for an unknown id.
    pub fn close_by_id(&self, connection_id: &str) {
        let Some(conn) = self.get_by_id(connection_id) else {
            return;
        };
        self.unregister(connection_id);
        conn.handle.close();
    }

    /// Closes every connection registered under an exact source scope,
    /// removing them from the registry first.
    pub fn close_by_source(&self, source: &Source) {
        let snapshot = self.get_by_source(source);
        for conn in &snapshot {
            self.unregister(&conn.connection_id);
        }
        for conn in snapshot {
            conn.handle.close();
        }
    }

    /// Closes every connection for an addon, removing them from the
    /// registry first.
    pub fn close_by_addon(&self, addon: &str) {
        let snapshot = self.get_by_addon(addon);
        for conn in &snapshot {
            self.unregister(&conn.connection_id);
        }
        for conn in snapshot {
            conn.handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str, addon: &str, session: &str, window: Option<&str>) -> Connection {
        let (handle, _rx, _shutdown_rx) = ConnectionHandle::new();
        Connection {
            connection_id: id.to_string(),
            source_id: format!("{id}-src"),
            source: match window {
                Some(w) => Source::with_window(addon, session, w),
                None => Source::new(addon, session),
            },
            session: Session::new(format!("logical-{id}")).unwrap(),
            handle,
        }
    }

    #[test]
    fn register_and_lookup_by_every_index() {
        let mgr = ConnectionManager::new();
        mgr.register(conn("c1", "addon", "s1", Some("w1"))).unwrap();

        assert!(mgr.get_by_id("c1").is_some());
        assert_eq!(mgr.get_by_session("s1").len(), 1);
        assert_eq!(mgr.get_by_addon("addon").len(), 1);
        assert!(mgr.get_by_window("w1").is_some());
        assert_eq!(mgr.get_by_source_id("c1-src").len(), 1);
    }

    #[test]
    fn window_collision_evicts_old_connection() {
        let mgr = ConnectionManager::new();
        mgr.register(conn("c1", "addon", "s1", Some("w1"))).unwrap();
        mgr.register(conn("c2", "addon", "s1", Some("w1"))).unwrap();

        assert!(mgr.get_by_id("c1").is_none());
        let live = mgr.get_by_window("w1").unwrap();
        assert_eq!(live.connection_id, "c2");
    }

    #[test]
    fn unregister_removes_from_every_index_with_no_empty_sets_left() {
        let mgr = ConnectionManager::new();
        mgr.register(conn("c1", "addon", "s1", Some("w1"))).unwrap();
        mgr.unregister("c1");

        assert!(mgr.get_by_id("c1").is_none());
        assert!(mgr.get_by_session("s1").is_empty());
        assert!(mgr.get_by_addon("addon").is_empty());
        assert!(mgr.get_by_window("w1").is_none());

        let indices = mgr.indices.lock();
        assert!(indices.by_session.is_empty());
        assert!(indices.by_addon.is_empty());
        assert!(indices.by_source.is_empty());
        assert!(indices.by_source_id.is_empty());
    }

    #[test]
    fn logical_id_collision_evicts_old_connection() {
        let mgr = ConnectionManager::new();
        let (handle1, _rx1, _sd1) = ConnectionHandle::new();
        mgr.register(Connection {
            connection_id: "c1".into(),
            source_id: "c1-src".into(),
            source: Source::new("addon", "s1"),
            session: Session::new("shared-logical").unwrap(),
            handle: handle1,
        })
        .unwrap();
        let (handle2, _rx2, _sd2) = ConnectionHandle::new();
        mgr.register(Connection {
            connection_id: "c2".into(),
            source_id: "c2-src".into(),
            source: Source::new("addon", "s2"),
            session: Session::new("shared-logical").unwrap(),
            handle: handle2,
        })
        .unwrap();

        assert!(mgr.get_by_id("c1").is_none());
        let live = mgr.get_by_logical_id("shared-logical").unwrap();
        assert_eq!(live.connection_id, "c2");
        assert_eq!(mgr.all_live_logical_ids(), vec!["shared-logical".to_string()]);
    }

    #[test]
    fn close_by_id_removes_and_closes_one_connection() {
        let mgr = ConnectionManager::new();
        mgr.register(conn("c1", "addon", "s1", None)).unwrap();
        mgr.register(conn("c2", "addon", "s2", None)).unwrap();

        mgr.close_by_id("c1");

        assert!(mgr.get_by_id("c1").is_none());
        assert!(mgr.get_by_id("c2").is_some());
    }

    #[test]
    fn close_by_source_removes_every_connection_in_that_exact_scope() {
        let mgr = ConnectionManager::new();
        mgr.register(conn("c1", "addon", "s1", None)).unwrap();
        mgr.register(conn("c2", "addon", "s2", None)).unwrap();

        mgr.close_by_source(&Source::new("addon", "s1"));

        assert!(mgr.get_by_session("s1").is_empty());
        assert_eq!(mgr.get_by_session("s2").len(), 1);
    }

    #[test]
    fn close_by_addon_removes_every_connection_for_that_addon() {
        let mgr = ConnectionManager::new();
        mgr.register(conn("c1", "addon-a", "s1", None)).unwrap();
        mgr.register(conn("c2", "addon-a", "s2", None)).unwrap();
        mgr.register(conn("c3", "addon-b", "s3", None)).unwrap();

        mgr.close_by_addon("addon-a");

        assert!(mgr.get_by_addon("addon-a").is_empty());
        assert_eq!(mgr.get_by_addon("addon-b").len(), 1);
    }

    #[test]
    fn infer_by_source_prefers_window_then_session_then_addon() {
        let mgr = ConnectionManager::new();
        mgr.register(conn("c1", "addon", "s1", Some("w1"))).unwrap();

        let by_window = mgr.infer_by_source(&Source::with_window("addon", "s1", "w1"));
        assert_eq!(by_window.len(), 1);

        let by_session = mgr.infer_by_source(&Source::new("addon", "s1"));
        assert_eq!(by_session.len(), 1);

        let by_addon = mgr.infer_by_source(&Source::new("addon", "other-session"));
        assert_eq!(by_addon.len(), 1);
    }
}
