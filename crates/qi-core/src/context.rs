//! Business metadata carried on messages, not used for routing.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque business metadata attached to a [`crate::Message`]. Never
/// consulted by routing; purely informational for handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Generated identifier for this context instance.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Owning project name.
    pub project: String,
    /// Entity the message concerns.
    pub entity: String,
    /// Task the message concerns.
    pub task: String,
}

impl Context {
    /// Builds a new context with a freshly generated id.
    pub fn new(
        project: impl Into<String>,
        entity: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project: project.into(),
            entity: entity.into(),
            task: task.into(),
        }
    }

    /// Returns the `(project, entity, task)` key.
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.project, &self.entity, &self.task)
    }
}
