use opsdeck_core::{EntityKind, OperationTransitionError, ServiceInvariantError};

use crate::store::StoreError;

/// Synchronous rejections from [`OperationEngine::trigger`](super::OperationEngine::trigger).
///
/// When `trigger` returns one of these, no operation has been created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("operation engine is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Store(other),
        }
    }
}

/// Operation arguments that failed fast validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },

    #[error("invalid `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("cannot scale {service_id} to {requested} replicas while it is down")]
    ScaleWhileDown { service_id: String, requested: u32 },
}

/// Failures that happen after `trigger` returned. Recorded on the operation
/// under its failure-reason key and never surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionFault {
    #[error("target vanished")]
    TargetVanished,

    #[error("invalid metadata `{key}`: {reason}")]
    InvalidMetadata { key: &'static str, reason: String },

    #[error(transparent)]
    Rejected(#[from] ServiceInvariantError),

    #[error(transparent)]
    Transition(#[from] OperationTransitionError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ExecutionFault {
    fn from(err: StoreError) -> Self {
        if err.is_not_found() {
            Self::TargetVanished
        } else {
            Self::Store(err)
        }
    }
}
