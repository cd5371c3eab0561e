//! Typed error taxonomy for the board service.
//!
//! Store methods return `anyhow::Result` and raise these variants inside the
//! `anyhow::Error` when the caller needs to react to them; the HTTP layer
//! recovers them by downcast (see `board::api::ApiError`).

use thiserror::Error;

use crate::board::models::EntityKind;

#[derive(Debug, Error)]
pub enum BoardError {
    /// Referenced entity, or the declared parent on create, does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    #[error("Invalid value for '{field}': {constraint}")]
    Validation { field: String, constraint: String },

    #[error("Could not validate credentials: {0}")]
    Unauthorized(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl BoardError {
    pub fn not_found(kind: EntityKind, id: i64) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn validation(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
        }
    }

    /// Finds a `BoardError` anywhere in an `anyhow` chain.
    pub fn find(err: &anyhow::Error) -> Option<&BoardError> {
        err.chain().find_map(|e| e.downcast_ref::<BoardError>())
    }
}
