//! Configuration module: `BusConfig` and its layered loader.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_from_file};
pub use schema::{BusConfig, LogLevel};
pub use validation::validate_config;
