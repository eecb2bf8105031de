//! # Qi Transport
//!
//! The WebSocket endpoint a `qi` binary serves: one route, JSON text
//! framing, a handshake that mints a [`qi_bus::Connection`] and registers
//! it with a [`qi_runtime::Hub`], then a message loop that decodes each
//! frame into a [`qi_core::Message`] and hands it to the hub's bus.
//!
//! ```rust,ignore
//! use qi_transport::serve;
//! use qi_runtime::{config::load_config, Hub, runtime};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let config = load_config().expect("invalid configuration");
//!     let hub = std::sync::Arc::new(Hub::new(config.clone()));
//!     serve(hub, config.bind_addr, &config.ws_path, runtime::shutdown_signal()).await
//! }
//! ```

mod server;

pub use server::serve;
