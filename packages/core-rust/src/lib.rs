//! opsdeck Core: service, incident, operation, and log records with their
//! state machines and invariants.

pub mod entity;
pub mod incident;
pub mod log;
pub mod operation;
pub mod service;

pub use entity::{EntityKind, UnknownVariant};
pub use incident::{
    Incident, IncidentInvariantError, IncidentStatus, IncidentTransitionError, NewIncident,
    Severity,
};
pub use log::{LogLevel, LogLine};
pub use operation::{
    Metadata, NewOperation, Operation, OperationStatus, OperationTransitionError, OperationType,
    TargetType, FAILURE_REASON_KEY, REPLICAS_KEY, VERSION_KEY,
};
pub use service::{Service, ServiceInvariantError, ServiceStatus};
