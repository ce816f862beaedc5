//! Domain error type shared by every scheduler component.

use crate::types::DbId;

/// Domain-level error for scheduler operations.
///
/// Task-level provider failures are *not* represented here — they are
/// recorded on the task itself and surfaced through status queries.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A malformed request, rejected before any entity is created.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The referenced entity does not exist.
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    /// The operation is not legal in the entity's current state
    /// (e.g. pausing a batch that already reached a terminal status).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a [`CoreError::NotFound`] on a batch id.
    pub fn batch_not_found(id: DbId) -> Self {
        Self::NotFound { entity: "Batch", id }
    }

    /// Shorthand for a [`CoreError::NotFound`] on a task id.
    pub fn task_not_found(id: DbId) -> Self {
        Self::NotFound { entity: "Task", id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_entity_and_id() {
        let err = CoreError::batch_not_found(42);
        assert_eq!(err.to_string(), "Batch with id 42 not found");
    }

    #[test]
    fn validation_message_passes_through() {
        let err = CoreError::Validation("tasks must not be empty".into());
        assert!(err.to_string().contains("tasks must not be empty"));
    }
}
