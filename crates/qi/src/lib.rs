//! # Qi
//!
//! A WebSocket message bus for an addon/plugin host application: clients
//! (UI windows, external tools, plugins) open persistent bidirectional
//! connections and exchange typed messages routed by topic, session, and
//! logical identity, with fire-and-forget events, broadcast, and
//! request/reply patterns.
//!
//! This crate is a thin re-export over the workspace's layered crates —
//! the binary target (`src/main.rs`) is the actual entry point; this
//! library exists so the pieces can be composed into a different binary
//! (an embedding host, an integration test) without going through it.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────┐
//! │ qi-transport │  WebSocket endpoint: accept loop, handshake, framing
//! ├──────────────┤
//! │  qi-runtime  │  Hub facade, configuration, logging, process orchestration
//! ├──────────────┤
//! │    qi-bus    │  Connection Manager, Handler Registry, Message Bus
//! ├──────────────┤
//! │   qi-core    │  Session, Source, Message, error taxonomy
//! └──────────────┘
//! ```
//!
//! ```rust,ignore
//! use qi::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = qi_runtime::config::load_config()?;
//!     qi_runtime::runtime::init_logging_once(tracing::Level::INFO);
//!     let hub = std::sync::Arc::new(Hub::new(config.clone()));
//!     qi_transport::serve(hub, config.bind_addr, &config.ws_path, qi_runtime::runtime::shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

pub use qi_bus::{Connection, ConnectionHandle, ConnectionManager, HandlerRegistry, MessageBus};
pub use qi_core::{BusError, Message, MessageType, Session, Source};
pub use qi_runtime::{BusConfig, Hub};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{BusConfig, BusError, Connection, Hub, Message, MessageType, Session, Source};
    pub use qi_core::{from_async, from_sync, Handler};
}
