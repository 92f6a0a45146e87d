//! Type-specific effects applied while an operation is `running`.
//!
//! Each effect re-reads what it needs from the store at every step and
//! never carries a copy of service state across a delay.

use chrono::Utc;
use opsdeck_core::{
    LogLine, Operation, OperationType, ServiceStatus, REPLICAS_KEY, VERSION_KEY,
};
use tracing::debug;

use super::delay::{DelayPoint, DelayProvider};
use super::error::ExecutionFault;
use super::validate::{parse_replicas, parse_version};
use crate::store::EntityStore;

pub(crate) async fn apply(
    store: &EntityStore,
    delays: &dyn DelayProvider,
    op: &Operation,
) -> Result<(), ExecutionFault> {
    match op.op_type {
        OperationType::Restart => restart(store, delays, &op.target_id).await,
        OperationType::Scale => scale(store, delays, op).await,
        OperationType::Deploy => deploy(store, delays, op).await,
    }
}

async fn restart(
    store: &EntityStore,
    delays: &dyn DelayProvider,
    target: &str,
) -> Result<(), ExecutionFault> {
    store.append_log(target, LogLine::info("restart requested"))?;
    delays.pause(DelayPoint::Effect(OperationType::Restart)).await;

    store.update_service(target, |svc| svc.status = ServiceStatus::Healthy)?;
    store.append_log(target, LogLine::info("service restarted status=healthy"))?;
    debug!(target_id = target, "restart applied");
    Ok(())
}

async fn scale(
    store: &EntityStore,
    delays: &dyn DelayProvider,
    op: &Operation,
) -> Result<(), ExecutionFault> {
    let target = op.target_id.as_str();
    let requested = op
        .metadata
        .get(REPLICAS_KEY)
        .map(parse_replicas)
        .transpose()
        .map_err(|reason| ExecutionFault::InvalidMetadata {
            key: REPLICAS_KEY,
            reason: reason.to_string(),
        })?;

    // Desired and running counts are applied in two separately observable
    // steps, with the delay in between.
    let replicas = store.update_service(target, |svc| {
        let n = requested.unwrap_or(svc.replicas);
        svc.desired_replicas = n;
        n
    })?;
    store.append_log(target, LogLine::info(format!("scaling to replicas={replicas}")))?;
    delays.pause(DelayPoint::Effect(OperationType::Scale)).await;

    store.update_service(target, |svc| svc.apply_replicas(replicas))??;
    store.append_log(
        target,
        LogLine::info(format!("scale complete replicas={replicas}")),
    )?;
    debug!(target_id = target, replicas, "scale applied");
    Ok(())
}

async fn deploy(
    store: &EntityStore,
    delays: &dyn DelayProvider,
    op: &Operation,
) -> Result<(), ExecutionFault> {
    let target = op.target_id.as_str();
    let requested = op
        .metadata
        .get(VERSION_KEY)
        .map(parse_version)
        .transpose()
        .map_err(|reason| ExecutionFault::InvalidMetadata {
            key: VERSION_KEY,
            reason: reason.to_string(),
        })?;
    let version = match requested {
        Some(v) => v.to_string(),
        None => store.get_service(target)?.version,
    };

    store.append_log(target, LogLine::info(format!("deploying version={version}")))?;
    delays.pause(DelayPoint::Effect(OperationType::Deploy)).await;

    store.update_service(target, |svc| svc.apply_deploy(&version, Utc::now()))?;
    store.append_log(
        target,
        LogLine::info(format!("deploy complete version={version}")),
    )?;
    debug!(target_id = target, version = %version, "deploy applied");
    Ok(())
}
