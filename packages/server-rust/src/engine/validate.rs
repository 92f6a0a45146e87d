//! Fail-fast argument checks run by `trigger` before an operation exists.

use opsdeck_core::{
    Metadata, OperationType, Service, ServiceStatus, REPLICAS_KEY, VERSION_KEY,
};
use serde_json::Value;

use super::error::ValidationError;

const REPLICAS_REASON: &str = "must be a non-negative integer that fits in 32 bits";

/// Reads a replica count from a JSON integer or a numeric string.
pub(crate) fn parse_replicas(value: &Value) -> Result<u32, &'static str> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or(REPLICAS_REASON),
        Value::String(s) => s.trim().parse::<u32>().map_err(|_| REPLICAS_REASON),
        _ => Err(REPLICAS_REASON),
    }
}

/// Reads a deploy version, which must be a non-blank string.
pub(crate) fn parse_version(value: &Value) -> Result<&str, &'static str> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.as_str()),
        Value::String(_) => Err("must not be empty"),
        _ => Err("must be a string"),
    }
}

/// Checks `metadata` for `op_type` against the current `service` snapshot
/// and returns it normalized (replica counts become JSON integers).
pub(crate) fn normalize(
    op_type: OperationType,
    service: &Service,
    mut metadata: Metadata,
) -> Result<Metadata, ValidationError> {
    match op_type {
        OperationType::Restart => {}
        OperationType::Scale => {
            let raw = metadata
                .get(REPLICAS_KEY)
                .ok_or(ValidationError::MissingField {
                    field: REPLICAS_KEY,
                })?;
            let replicas = parse_replicas(raw).map_err(|reason| ValidationError::InvalidField {
                field: REPLICAS_KEY,
                reason: reason.to_string(),
            })?;
            if service.status == ServiceStatus::Down && replicas > 0 {
                return Err(ValidationError::ScaleWhileDown {
                    service_id: service.id.clone(),
                    requested: replicas,
                });
            }
            metadata.insert(REPLICAS_KEY.to_string(), Value::from(replicas));
        }
        OperationType::Deploy => {
            let raw = metadata
                .get(VERSION_KEY)
                .ok_or(ValidationError::MissingField { field: VERSION_KEY })?;
            parse_version(raw).map_err(|reason| ValidationError::InvalidField {
                field: VERSION_KEY,
                reason: reason.to_string(),
            })?;
        }
    }
    Ok(metadata)
}
