//! Runtime orchestration error type. Narrower than `qi_bus::BusError`:
//! covers only startup/shutdown concerns (config load, bind failure),
//! since in-flight message errors never leave the bus.

use thiserror::Error;

/// Errors that can occur while starting up or running the Hub.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    /// Catch-all for orchestration failures (e.g. signal handler setup).
    #[error("{0}")]
    Other(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
