//! Process orchestration: the one-shot logging guard and shutdown signal
//! wait that a binary entry point needs around a [`crate::hub::Hub`].
//!
//! A Ctrl+C / SIGTERM select pairs with a compare-exchange guard so logging
//! initializes exactly once per process; a binary wires `Hub` and the
//! transport server's accept loop together directly (see `crates/qi`).

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal;
use tracing::{info, Level};

use crate::logging::{LoggingBuilder, SpanEvents};

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes logging exactly once per process. A second call (e.g. from
/// a test harness that also constructs a [`crate::hub::Hub`]) is a no-op
/// rather than a panic.
pub fn init_logging_once(level: Level) {
    if LOGGING_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        let span_events = if matches!(level, Level::TRACE | Level::DEBUG) {
            SpanEvents::LIFECYCLE
        } else {
            SpanEvents::NONE
        };
        LoggingBuilder::new().with_level(level).with_span_events(span_events).init();
    }
}

/// Returns whether [`init_logging_once`] has already run in this process.
pub fn is_logging_initialized() -> bool {
    LOGGING_INITIALIZED.load(Ordering::SeqCst)
}

/// Resolves once Ctrl+C or (on Unix) SIGTERM is received. Intended as the
/// shutdown future a binary races its transport accept loop against.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            signal::unix::signal(signal::unix::SignalKind::terminate()).expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down");
    }
}
