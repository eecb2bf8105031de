//! Source scope: the `(addon, session_id, window_id?)` triple that indexes
//! both connections and handlers.

use serde::{Deserialize, Serialize};

/// Canonical key derived from a [`Source`]. Used directly as a map key by
/// the connection manager's `by_source` index and the handler registry's
/// `by_source` / `handler_to_sources` indices.
pub type SourceKey = (String, String, Option<String>);

/// The scope a connection or handler registration is attached to.
///
/// Immutable once attached to a connection or handler: a source never
/// changes after the registration that introduced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    /// The addon (plugin) this source belongs to.
    pub addon: String,
    /// The session this source belongs to.
    pub session_id: String,
    /// Optional window scope. `None` means "session-wide".
    pub window_id: Option<String>,
}

impl Source {
    /// Creates a new session-wide source (no window scope).
    pub fn new(addon: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            addon: addon.into(),
            session_id: session_id.into(),
            window_id: None,
        }
    }

    /// Creates a new source scoped to a specific window.
    pub fn with_window(
        addon: impl Into<String>,
        session_id: impl Into<String>,
        window_id: impl Into<String>,
    ) -> Self {
        Self {
            addon: addon.into(),
            session_id: session_id.into(),
            window_id: Some(window_id.into()),
        }
    }

    /// Returns the canonical `(addon, session_id, window_id)` key used by
    /// every index keyed by source scope.
    pub fn key(&self) -> SourceKey {
        (self.addon.clone(), self.session_id.clone(), self.window_id.clone())
    }

    /// Returns the session-wide key for this source, regardless of whether
    /// this source itself carries a window scope. Used by two-tier handler
    /// lookup to build the broader fallback key.
    pub fn session_key(&self) -> SourceKey {
        (self.addon.clone(), self.session_id.clone(), None)
    }
}
