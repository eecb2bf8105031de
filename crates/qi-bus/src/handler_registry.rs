//! The Handler Registry: maps `(topic, scope)` to handler functions, with
//! two-tier lookup, identity-based dedup, and reference-counted
//! multi-source sharing.

use std::collections::HashMap;

use parking_lot::Mutex;
use qi_core::{Handler, HandlerFn, HandlerId, Source, SourceKey};
use uuid::Uuid;

#[derive(Default)]
struct Indices {
    by_id: HashMap<HandlerId, Handler>,
    by_topic: HashMap<String, HashMap<HandlerId, ()>>,
    by_source: HashMap<SourceKey, Vec<HandlerId>>,
    handler_to_sources: HashMap<HandlerId, Vec<SourceKey>>,
}

impl Indices {
    /// Removes a source key from `by_source`, deleting the entry if it
    /// becomes empty, and returns whether the key was present.
    fn discard_from_by_source(&mut self, key: &SourceKey, handler_id: &str) {
        if let Some(ids) = self.by_source.get_mut(key) {
            ids.retain(|id| id != handler_id);
            if ids.is_empty() {
                self.by_source.remove(key);
            }
        }
    }

    /// Removes a handler from `by_id` and `by_topic`. Caller must already
    /// have detached it from `by_source`/`handler_to_sources`.
    fn purge(&mut self, handler_id: &str) {
        let Some(handler) = self.by_id.remove(handler_id) else {
            return;
        };
        if let Some(topic_map) = self.by_topic.get_mut(&handler.topic) {
            topic_map.remove(handler_id);
            if topic_map.is_empty() {
                self.by_topic.remove(&handler.topic);
            }
        }
    }

    #[cfg(debug_assertions)]
    fn assert_consistency(&self) {
        for (handler_id, scopes) in &self.handler_to_sources {
            let handler = self
                .by_id
                .get(handler_id)
                .unwrap_or_else(|| panic!("handler {handler_id} in reverse map but not in by_id"));
            debug_assert!(
                self.by_topic
                    .get(&handler.topic)
                    .is_some_and(|m| m.contains_key(handler_id)),
                "handler {handler_id} missing from by_topic"
            );
            for scope in scopes {
                debug_assert!(
                    self.by_source
                        .get(scope)
                        .is_some_and(|ids| ids.iter().any(|id| id == handler_id)),
                    "handler {handler_id} missing from by_source[{scope:?}]"
                );
            }
        }
        for (scope, ids) in &self.by_source {
            for id in ids {
                debug_assert!(
                    self.handler_to_sources
                        .get(id)
                        .is_some_and(|scopes| scopes.contains(scope)),
                    "source {scope:?} missing from reverse map for handler {id}"
                );
            }
        }
        debug_assert!(self.by_source.values().all(|ids| !ids.is_empty()));
        debug_assert!(self.handler_to_sources.values().all(|s| !s.is_empty()));
    }

    #[cfg(not(debug_assertions))]
    fn assert_consistency(&self) {}
}

/// Async-safe registry of handlers by topic and source scope. A single
/// mutex serializes mutators and readers; lookups never invoke user
/// handlers while the lock is held.
#[derive(Default)]
pub struct HandlerRegistry {
    indices: Mutex<Indices>,
}

impl HandlerRegistry {
    /// Builds an empty handler registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` for `topic` under `source`'s scope.
    ///
    /// Dedup rule: if `by_topic[topic]` already contains a handler
    /// wrapping the exact same function (by `Arc` identity), that
    /// handler's id is reused and `source.key()` is added to its scope
    /// set. Otherwise a new id is minted.
    pub fn register(&self, function: HandlerFn, topic: impl Into<String>, source: &Source) -> HandlerId {
        let topic = topic.into();
        let key = source.key();
        let mut indices = self.indices.lock();

        let topic_map = indices.by_topic.entry(topic.clone()).or_default();
        let existing_id = topic_map.keys().find(|id| {
            indices
                .by_id
                .get(*id)
                .is_some_and(|h| h.is_same_function(&function))
        });

        if let Some(id) = existing_id.cloned() {
            let by_source_ids = indices.by_source.entry(key.clone()).or_default();
            if !by_source_ids.contains(&id) {
                by_source_ids.push(id.clone());
            }
            let scopes = indices.handler_to_sources.entry(id.clone()).or_default();
            if !scopes.contains(&key) {
                scopes.push(key);
            }
            indices.assert_consistency();
            return id;
        }

        let id = Uuid::new_v4().to_string();
        let handler = Handler::new(id.clone(), topic.clone(), function);
        indices.by_id.insert(id.clone(), handler);
        indices
            .by_topic
            .entry(topic)
            .or_default()
            .insert(id.clone(), ());
        indices.by_source.entry(key.clone()).or_default().push(id.clone());
        indices.handler_to_sources.insert(id.clone(), vec![key]);
        indices.assert_consistency();
        id
    }

    /// Fully removes a single handler by id from every index.
    pub fn remove_by_id(&self, handler_id: &str) {
        let mut indices = self.indices.lock();
        let Some(scopes) = indices.handler_to_sources.remove(handler_id) else {
            return;
        };
        for scope in &scopes {
            indices.discard_from_by_source(scope, handler_id);
        }
        indices.purge(handler_id);
        indices.assert_consistency();
    }

    /// Detaches every handler registered under `source`'s scope. A
    /// handler still referenced by another scope is left in place
    /// (reference-counting law); one whose scope set becomes empty is
    /// fully purged. This is the hot path on client disconnect.
    pub fn remove_by_source(&self, source: &Source) {
        let key = source.key();
        let mut indices = self.indices.lock();
        let Some(handler_ids) = indices.by_source.remove(&key) else {
            return;
        };
        for handler_id in handler_ids {
            let Some(scopes) = indices.handler_to_sources.get_mut(&handler_id) else {
                continue;
            };
            scopes.retain(|s| s != &key);
            if scopes.is_empty() {
                indices.handler_to_sources.remove(&handler_id);
                indices.purge(&handler_id);
            }
        }
        indices.assert_consistency();
    }

    /// Removes every handler bound to `topic`, across all scopes.
    pub fn clear_by_topic(&self, topic: &str) {
        let mut indices = self.indices.lock();
        let Some(topic_map) = indices.by_topic.remove(topic) else {
            return;
        };
        let handler_ids: Vec<HandlerId> = topic_map.into_keys().collect();
        for handler_id in handler_ids {
            if let Some(scopes) = indices.handler_to_sources.remove(&handler_id) {
                for scope in scopes {
                    indices.discard_from_by_source(&scope, &handler_id);
                }
            }
            indices.by_id.remove(&handler_id);
        }
        indices.assert_consistency();
    }

    /// Two-tier lookup: handlers registered under the exact window scope
    /// (if `source.window_id` is set) first, then handlers registered
    /// under the session-wide scope. Each handler appears at most once,
    /// in first-seen order; only handlers still bound to `topic` are
    /// returned.
    pub fn get_handlers(&self, topic: &str, source: &Source) -> Vec<Handler> {
        let mut keys = Vec::with_capacity(2);
        if source.window_id.is_some() {
            keys.push(source.key());
        }
        let session_key = source.session_key();
        if !keys.contains(&session_key) {
            keys.push(session_key);
        }

        let indices = self.indices.lock();
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for key in &keys {
            let Some(ids) = indices.by_source.get(key) else {
                continue;
            };
            for id in ids {
                if !seen.insert(id.clone()) {
                    continue;
                }
                if let Some(handler) = indices.by_id.get(id) {
                    if handler.topic == topic {
                        out.push(handler.clone());
                    }
                }
            }
        }
        out
    }

    /// Purges every handler and every source mapping. Used for shutdown
    /// and tests.
    pub fn clear(&self) {
        let mut indices = self.indices.lock();
        indices.by_id.clear();
        indices.by_topic.clear();
        indices.by_source.clear();
        indices.handler_to_sources.clear();
        indices.assert_consistency();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qi_core::message::{Message, MessageType};
    use qi_core::{from_sync, Session};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn noop_handler() -> HandlerFn {
        from_sync(|_msg: Message| None)
    }

    #[test]
    fn register_twice_same_function_dedups_to_one_id() {
        let registry = HandlerRegistry::new();
        let f = noop_handler();
        let source = Source::new("addon", "s1");

        let id1 = registry.register(f.clone(), "t", &source);
        let id2 = registry.register(f, "t", &source);
        assert_eq!(id1, id2);
    }

    #[test]
    fn register_twice_under_same_scope_does_not_duplicate_source_entry() {
        let registry = HandlerRegistry::new();
        let f = noop_handler();
        let source = Source::new("addon", "s1");

        registry.register(f.clone(), "t", &source);
        registry.register(f, "t", &source);

        assert_eq!(registry.get_handlers("t", &source).len(), 1);
        registry.remove_by_source(&source);
        assert!(registry.get_handlers("t", &source).is_empty());
    }

    #[test]
    fn reference_counting_keeps_handler_until_all_sources_removed() {
        let registry = HandlerRegistry::new();
        let f = noop_handler();
        let a = Source::new("addon", "s1");
        let b = Source::with_window("addon", "s2", "w1");

        let id = registry.register(f.clone(), "t", &a);
        registry.register(f, "t", &b);

        registry.remove_by_source(&a);
        assert_eq!(registry.get_handlers("t", &b).len(), 1);

        registry.remove_by_source(&b);
        assert!(registry.get_handlers("t", &b).is_empty());
        assert!(registry.get_handlers("t", &a).is_empty());
        // handler fully purged
        registry.remove_by_id(&id);
    }

    #[tokio::test]
    async fn two_tier_lookup_returns_window_then_session_in_order() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let window_calls = calls.clone();
        let h_w = from_sync(move |_m: Message| {
            window_calls.fetch_add(1, Ordering::SeqCst);
            None
        });
        let session_calls = calls.clone();
        let h_s = from_sync(move |_m: Message| {
            session_calls.fetch_add(1, Ordering::SeqCst);
            None
        });

        let window_source = Source::with_window("p", "s1", "w1");
        let session_source = Source::new("p", "s1");

        registry.register(h_w, "T", &window_source);
        registry.register(h_s, "T", &session_source);

        let handlers = registry.get_handlers("T", &window_source);
        assert_eq!(handlers.len(), 2);

        let sender = Session::new("caller").unwrap();
        let msg = Message::builder(MessageType::Event, sender, "T").build().unwrap();
        for h in &handlers {
            h.function.call(&msg).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let other_window = Source::with_window("p", "s1", "w2");
        assert_eq!(registry.get_handlers("T", &other_window).len(), 1);
    }
}
