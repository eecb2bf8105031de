//! Error taxonomy for the Qi message bus.
//!
//! Each narrow enum corresponds to one failure category; [`BusError`] is
//! the umbrella type the public bus API returns, wrapping each narrower
//! error in its own variant.

use thiserror::Error;

/// Malformed session handshake or message envelope.
///
/// Reported to the client as an error frame when possible; a per-message
/// validation failure never closes the connection. Handshake validation
/// failures do close the connection (see `qi-transport`'s close codes).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// `logical_id` was empty or longer than 100 characters.
    #[error("invalid logical_id: {logical_id:?}")]
    InvalidLogicalId {
        /// The offending value.
        logical_id: String,
    },

    /// `topic` was empty, longer than 200 characters, or contained a
    /// wildcard (`*` or `>`).
    #[error("invalid topic: {topic:?}")]
    InvalidTopic {
        /// The offending value.
        topic: String,
    },

    /// `target` contained more than 50 entries.
    #[error("target list too large: {len} entries (max 50)")]
    TargetTooLarge {
        /// The offending length.
        len: usize,
    },

    /// `payload` contained more than 100 top-level keys.
    #[error("payload too large: {len} keys (max 100)")]
    PayloadTooLarge {
        /// The offending length.
        len: usize,
    },

    /// A REPLY message was missing `reply_to`.
    #[error("reply message missing reply_to")]
    MissingReplyTo,

    /// The handshake frame was not valid JSON, was a binary frame, or did
    /// not contain a `logical_id` field.
    #[error("invalid handshake: {reason}")]
    InvalidHandshake {
        /// Human-readable reason.
        reason: String,
    },
}

/// A handler raised while processing a message.
///
/// Logged with the topic; never propagated to the caller of `publish`. If
/// the message was a REQUEST, the failing handler's contribution is
/// treated as "no reply" — other handlers still run.
#[derive(Debug, Clone, Error)]
#[error("handler for topic {topic:?} failed: {reason}")]
pub struct HandlerError {
    /// The topic the failing handler was registered under.
    pub topic: String,
    /// Human-readable failure reason.
    pub reason: String,
}

/// Bad inputs to internal APIs — a programming error in the caller, not a
/// runtime condition. Fails fast with a clear message.
#[derive(Debug, Clone, Error)]
#[error("programming error: {0}")]
pub struct ProgrammingError(pub String);

impl ProgrammingError {
    /// Builds a programming error from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Top-level error returned by `qi-bus`'s public API.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// See [`ValidationError`].
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// `request`'s `timeout_secs` argument was outside `(0, 300]`.
    #[error("timeout {timeout_secs}s out of range (0, 300]")]
    InvalidTimeout {
        /// The rejected timeout value.
        timeout_secs: f64,
    },

    /// Raised synchronously from `request` when the sender's session has
    /// reached `max_pending_requests_per_session`.
    #[error(
        "session {session_id:?} has {pending} pending requests, at or above the cap of {cap}"
    )]
    PendingRequestLimitExceeded {
        /// The session that hit the cap.
        session_id: String,
        /// The session's pending count at the time of rejection.
        pending: usize,
        /// The configured cap.
        cap: usize,
    },

    /// Raised from `request` when the reply future does not resolve
    /// within the configured timeout. The pending entry is always cleaned
    /// up before this error surfaces.
    #[error("request {request_id:?} timed out after {timeout_secs}s")]
    Timeout {
        /// The timed-out request's id.
        request_id: String,
        /// The timeout that elapsed, in seconds.
        timeout_secs: f64,
    },

    /// A request was cancelled because its session unregistered, or the
    /// request was explicitly cancelled, before a reply arrived.
    #[error("request {request_id:?} was cancelled: {reason}")]
    Cancelled {
        /// The cancelled request's id.
        request_id: String,
        /// Human-readable reason (e.g. "session disconnected").
        reason: String,
    },

    /// Socket write or close failure. Logged per connection; never
    /// propagated to other recipients of a fan-out.
    #[error("transport error: {0}")]
    Transport(String),

    /// See [`HandlerError`]. Surfaced only to callers that explicitly ask
    /// for per-handler outcomes; normal `publish` dispatch logs and
    /// swallows these.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// See [`ProgrammingError`].
    #[error(transparent)]
    Programming(#[from] ProgrammingError),
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;
