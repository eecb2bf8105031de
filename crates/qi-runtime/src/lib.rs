//! # Qi Runtime
//!
//! The Hub facade and the ambient machinery around it: layered
//! configuration, structured logging, and process orchestration.
//!
//! ```rust,ignore
//! use qi_runtime::{config::load_config, hub::Hub, runtime};
//! use tracing::Level;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = load_config().expect("invalid configuration");
//!     runtime::init_logging_once(Level::INFO);
//!     let hub = Hub::new(config);
//!     // wire `hub` into qi-transport's accept loop, then:
//!     runtime::shutdown_signal().await;
//! }
//! ```

pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod runtime;

pub use config::BusConfig;
pub use error::{RuntimeError, RuntimeResult};
pub use hub::{Hook, Hub};
pub use logging::{LoggingBuilder, SpanEvents};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{hub::Hub, BusConfig};
    pub use tracing::{debug, error, info, instrument, span, trace, warn, Level};
}
