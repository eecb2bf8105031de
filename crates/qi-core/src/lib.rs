//! # Qi Core
//!
//! Data model and error taxonomy shared by every layer of the Qi message bus.
//!
//! ## Layers
//!
//! - **Identity**: [`Session`], [`Source`], [`SourceKey`] — who is talking and
//!   under what scope.
//! - **Envelope**: [`Context`], [`Message`], [`MessageType`] — what is being
//!   said and how it is routed.
//! - **Errors**: [`BusError`] and its narrower members — what can go wrong
//!   and how callers are expected to react.
//!
//! None of these types know about WebSockets, tokio tasks, or any particular
//! registry implementation; those live in `qi-bus` and `qi-transport`. This
//! crate only defines the shapes that flow between them.

pub mod constants;
pub mod context;
pub mod error;
pub mod handler;
pub mod message;
pub mod session;
pub mod source;

pub use constants::HUB_ID;
pub use context::Context;
pub use error::{BusError, BusResult, HandlerError, ProgrammingError, ValidationError};
pub use handler::{from_async, from_sync, CallableHandler, Handler, HandlerFn, HandlerId, PendingRequest};
pub use message::{Message, MessageBuilder, MessageType};
pub use session::Session;
pub use source::{Source, SourceKey};

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        from_async, from_sync, BusError, BusResult, CallableHandler, Context, HUB_ID, Handler,
        HandlerFn, HandlerId, Message, MessageBuilder, MessageType, PendingRequest, Session,
        Source, SourceKey,
    };
}
