//! Error taxonomy of the allocation engine.

use std::fmt;

use thiserror::Error;

use crate::model::ValidationError;
use crate::persistence::PersistenceError;
use crate::types::CapacityInvariantViolation;

/// Kinds of entities that can be looked up by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    StorageUnit,
    Carrier,
    Item,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::StorageUnit => write!(f, "storage unit"),
            EntityKind::Carrier => write!(f, "carrier"),
            EntityKind::Item => write!(f, "item"),
        }
    }
}

/// Errors surfaced by the engine operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Malformed input; nothing was mutated.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    /// No unit or subset satisfies the constraints. A normal outcome.
    #[error("no fit found for {subject} (size {size})")]
    NoFitFound { subject: String, size: f64 },

    /// The external store rejected a transaction; in-memory changes of the
    /// same operation have been rolled back.
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    CapacityInvariant(#[from] CapacityInvariantViolation),
}

impl CoreError {
    pub fn not_found(kind: EntityKind, id: impl ToString) -> Self {
        CoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Only a capacity invariant breach indicates a logic bug.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CoreError::CapacityInvariant(_))
    }
}
