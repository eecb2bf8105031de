//! # Qi Bus
//!
//! The message bus's core: connection registry, handler registry, and the
//! dispatcher that ties them together.
//!
//! - [`connection`] tracks live WebSocket connections by source scope and
//!   logical identity.
//! - [`handler_registry`] tracks registered handler functions by topic and
//!   scope, with two-tier (window-then-session) lookup.
//! - [`bus`] dispatches published messages, correlates REQUEST/REPLY pairs,
//!   and fans messages out to their resolved destinations.
//!
//! None of these modules know about axum or tokio-tungstenite; the
//! WebSocket endpoint that drives them lives in `qi-transport`.

pub mod bus;
pub mod connection;
pub mod handler_registry;

pub use bus::{MessageBus, DEFAULT_MAX_PENDING_REQUESTS_PER_SESSION, DEFAULT_REPLY_TIMEOUT_SECS};
pub use connection::{Connection, ConnectionHandle, ConnectionManager};
pub use handler_registry::HandlerRegistry;
