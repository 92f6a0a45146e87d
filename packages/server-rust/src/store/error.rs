use opsdeck_core::{EntityKind, IncidentTransitionError, OperationTransitionError};

/// Errors returned by [`EntityStore`](super::EntityStore) accessors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: EntityKind, id: String },

    #[error("invalid {kind} {id}: {reason}")]
    InvalidEntity {
        kind: EntityKind,
        id: String,
        reason: String,
    },

    #[error(transparent)]
    Transition(#[from] IncidentTransitionError),

    /// The stored operation is terminal and can no longer be updated.
    #[error(transparent)]
    OperationTransition(#[from] OperationTransitionError),
}

impl StoreError {
    pub(crate) fn not_found(kind: EntityKind, id: &str) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn already_exists(kind: EntityKind, id: &str) -> Self {
        Self::AlreadyExists {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid(kind: EntityKind, id: &str, reason: impl ToString) -> Self {
        Self::InvalidEntity {
            kind,
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// `true` for [`StoreError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
