//! The `BusConfig` schema: every tunable knob the bus and its transport
//! endpoint read at startup, with TOML-then-env layering and a `dev_mode`
//! promotion rule for `log_level`. Deliberately narrow in scope — no addon
//! discovery, no SSL cert paths.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Minimum logging verbosity, mirrored onto a `tracing::Level` by
/// [`crate::logging`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Converts to the `tracing::Level` this crate's logging module
    /// expects, for binaries that want to call
    /// [`crate::runtime::init_logging_once`] directly from a `BusConfig`.
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

fn default_reply_timeout_secs() -> f64 {
    5.0
}

fn default_max_pending_requests_per_session() -> usize {
    100
}

fn default_bind_addr() -> SocketAddr {
    "127.0.0.1:8000".parse().expect("valid default bind address")
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

/// Layered configuration for the bus and its WebSocket endpoint.
///
/// Loaded by [`crate::config::load_config`] as defaults, then a
/// `qi.toml` file, then `QI_`-prefixed environment variables, each layer
/// overriding the one before it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// REQUEST/REPLY timeout, in seconds. Must be in (0, 300].
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: f64,
    /// Cap on outstanding REQUESTs per session before `request` fails fast.
    #[serde(default = "default_max_pending_requests_per_session")]
    pub max_pending_requests_per_session: usize,
    /// Enables strict message validation and promotes the default log
    /// level to `debug`, matching `QiSettings`'s `dev_mode` behavior.
    #[serde(default)]
    pub dev_mode: bool,
    /// Minimum logging verbosity. Promoted to `debug` under `dev_mode`
    /// unless explicitly set (see [`super::validation::validate_config`]).
    #[serde(default)]
    pub log_level: LogLevel,
    /// Address the WebSocket endpoint binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// HTTP path the WebSocket upgrade is served under.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            reply_timeout_secs: default_reply_timeout_secs(),
            max_pending_requests_per_session: default_max_pending_requests_per_session(),
            dev_mode: false,
            log_level: LogLevel::default(),
            bind_addr: default_bind_addr(),
            ws_path: default_ws_path(),
        }
    }
}
