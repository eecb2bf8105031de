//! Handler identity and the normalized handler-invocation adapter.
//!
//! Rust has no duck typing for "sync or async callable", so every handler
//! is normalized at registration time into a single "awaitable returning
//! value-or-null" shape ([`CallableHandler`]); synchronous handlers are
//! wrapped with [`from_sync`] to run on the blocking thread pool instead.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::message::Message;

/// A boxed, owned future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Unique identifier for a registered [`Handler`].
pub type HandlerId = String;

/// The normalized handler shape every registered function is adapted to.
///
/// Returns `Some(value)` to contribute a reply candidate for a REQUEST,
/// or `None` to decline (equivalent to a Python handler returning `None`
/// or raising nothing of interest).
#[async_trait]
pub trait CallableHandler: Send + Sync {
    /// Invokes the handler with the dispatched message.
    async fn call(&self, message: &Message) -> Option<Value>;
}

/// Reference-counted handle to a normalized handler callable.
///
/// Dedup at registration time compares two `HandlerFn`s with
/// [`Arc::ptr_eq`] — an identity check, not a behavioral one.
pub type HandlerFn = Arc<dyn CallableHandler>;

struct AsyncAdapter<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> CallableHandler for AsyncAdapter<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Value>> + Send + 'static,
{
    async fn call(&self, message: &Message) -> Option<Value> {
        (self.func)(message.clone()).await
    }
}

/// Wraps an async closure `Fn(Message) -> impl Future<Output = Option<Value>>`
/// into a [`HandlerFn`].
pub fn from_async<F, Fut>(func: F) -> HandlerFn
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Value>> + Send + 'static,
{
    Arc::new(AsyncAdapter { func })
}

struct SyncAdapter<F> {
    func: Arc<F>,
}

#[async_trait]
impl<F> CallableHandler for SyncAdapter<F>
where
    F: Fn(Message) -> Option<Value> + Send + Sync + 'static,
{
    async fn call(&self, message: &Message) -> Option<Value> {
        let func = self.func.clone();
        let message = message.clone();
        tokio::task::spawn_blocking(move || func(message))
            .await
            .unwrap_or(None)
    }
}

/// Wraps a synchronous closure `Fn(Message) -> Option<Value>` to run on
/// the blocking thread pool, so it never stalls the event loop.
pub fn from_sync<F>(func: F) -> HandlerFn
where
    F: Fn(Message) -> Option<Value> + Send + Sync + 'static,
{
    Arc::new(SyncAdapter {
        func: Arc::new(func),
    })
}

/// A registered handler: a stable id, the topic it answers, and the
/// normalized function. The set of source-scopes it is registered under
/// lives in the handler registry's indices, not on this value, so that a
/// single `Handler` can be shared (by id) across many scopes without
/// cloning the function.
#[derive(Clone)]
pub struct Handler {
    /// Stable identifier, minted once per distinct `(function, topic)`.
    pub id: HandlerId,
    /// The topic this handler answers.
    pub topic: String,
    /// The normalized callable.
    pub function: HandlerFn,
}

impl Handler {
    /// Builds a new handler entry.
    pub fn new(id: HandlerId, topic: impl Into<String>, function: HandlerFn) -> Self {
        Self {
            id,
            topic: topic.into(),
            function,
        }
    }

    /// True if `function` is the exact same callable this handler wraps,
    /// by reference identity (not by behavior).
    pub fn is_same_function(&self, function: &HandlerFn) -> bool {
        Arc::ptr_eq(&self.function, function)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// An outstanding REQUEST awaiting its REPLY.
///
/// Created by `request()`, resolved by a matching REPLY, and cancelled on
/// timeout, session unregister, or explicit cancellation. The reply
/// channel is a `tokio::sync::oneshot` pair, one per pending request.
pub struct PendingRequest {
    /// The request id, equal to the REQUEST message's `message_id`.
    pub request_id: String,
    /// The session that issued the request, used to cancel its pending
    /// requests in bulk on unregister.
    pub requesting_session_id: String,
    /// Consumed exactly once: either to deliver the REPLY payload, or
    /// dropped (which the receiver observes as a cancellation) on
    /// timeout/unregister/explicit cancellation.
    pub reply_tx: oneshot::Sender<Value>,
}

impl PendingRequest {
    /// Builds a new pending request and its paired receiver.
    pub fn new(
        request_id: impl Into<String>,
        requesting_session_id: impl Into<String>,
    ) -> (Self, oneshot::Receiver<Value>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        (
            Self {
                request_id: request_id.into(),
                requesting_session_id: requesting_session_id.into(),
                reply_tx,
            },
            reply_rx,
        )
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("request_id", &self.request_id)
            .field("requesting_session_id", &self.requesting_session_id)
            .finish_non_exhaustive()
    }
}
