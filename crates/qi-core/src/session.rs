//! Session identity: one connected client.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// A registered client identity.
///
/// `id` is generated fresh on every register and uniquely names one
/// WebSocket connection's lifetime. `logical_id` is the caller-supplied
/// routing name; at most one live session exists per `logical_id` at a
/// time — registering a second session under the same `logical_id`
/// evicts the first (see `qi_bus::ConnectionManager::register`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Globally unique connection identifier, generated on register.
    pub id: String,
    /// Caller-supplied routing name, 1-100 characters.
    pub logical_id: String,
    /// Optional back-reference to a parent session's `logical_id`, used
    /// for cascade-unregister and bubble routing.
    pub parent_logical_id: Option<String>,
    /// Opaque list of caller-supplied tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Session {
    /// Builds a new session with a freshly generated connection id.
    ///
    /// Fails if `logical_id` is empty or longer than 100 characters.
    pub fn new(logical_id: impl Into<String>) -> Result<Self, ValidationError> {
        let logical_id = logical_id.into();
        Self::validate_logical_id(&logical_id)?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            logical_id,
            parent_logical_id: None,
            tags: Vec::new(),
        })
    }

    /// Sets the parent logical id, returning `self` for chaining.
    pub fn with_parent(mut self, parent_logical_id: impl Into<String>) -> Self {
        self.parent_logical_id = Some(parent_logical_id.into());
        self
    }

    /// Sets the tag list, returning `self` for chaining.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    fn validate_logical_id(logical_id: &str) -> Result<(), ValidationError> {
        if logical_id.is_empty() || logical_id.chars().count() > 100 {
            return Err(ValidationError::InvalidLogicalId {
                logical_id: logical_id.to_string(),
            });
        }
        Ok(())
    }

    /// Returns the reserved hub session, used as the sender of
    /// server-originated messages (auto-replies, lifecycle publishes).
    pub fn hub() -> Self {
        Self {
            id: crate::constants::HUB_ID.to_string(),
            logical_id: crate::constants::HUB_ID.to_string(),
            parent_logical_id: None,
            tags: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_logical_id() {
        assert!(Session::new("").is_err());
    }

    #[test]
    fn rejects_logical_id_over_100_chars() {
        let too_long = "a".repeat(101);
        assert!(Session::new(too_long).is_err());
    }

    #[test]
    fn hub_session_uses_reserved_identity() {
        let hub = Session::hub();
        assert_eq!(hub.id, crate::constants::HUB_ID);
        assert_eq!(hub.logical_id, crate::constants::HUB_ID);
    }
}
