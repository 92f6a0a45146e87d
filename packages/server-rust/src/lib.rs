//! opsdeck Server: in-memory entity store and asynchronous operation engine.

pub mod config;
pub mod engine;
pub mod seed;
pub mod store;

pub use config::{EngineConfig, StepDelays};
pub use engine::{
    DelayPoint, DelayProvider, EngineError, EngineState, ExecutionFault, OperationEngine,
    SleepDelay, ValidationError,
};
pub use seed::{SeedData, SeedSummary};
pub use store::{EntityStore, LogPage, LogWindow, StoreError};

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};
    use opsdeck_core::{Metadata, Service, ServiceStatus};

    pub(crate) fn make_service(id: &str, status: ServiceStatus, replicas: u32) -> Service {
        Service {
            id: id.to_string(),
            name: format!("{id}-api"),
            status,
            version: "1.0.0".to_string(),
            replicas,
            desired_replicas: replicas,
            owner: "sre".to_string(),
            last_deploy_at: Utc.with_ymd_and_hms(2025, 6, 28, 12, 0, 0).unwrap(),
        }
    }

    pub(crate) fn metadata(value: serde_json::Value) -> Metadata {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected a JSON object, got {other}"),
        }
    }
}
