//! Asynchronous operation engine.
//!
//! [`OperationEngine::trigger`] validates a request, records a `pending`
//! operation, and returns it immediately. Execution continues on its own
//! Tokio task:
//!
//! ```text
//! pending --settle--> running --work--> effect --> succeeded | failed
//! ```
//!
//! A semaphore bounds how many operations execute at once; excess
//! operations stay `pending` until a permit frees up. Every spawned task holds
//! an [`InFlightGuard`] so [`OperationEngine::shutdown`] can drain them.

pub mod delay;
mod effects;
pub mod error;
pub mod lifecycle;
mod validate;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use opsdeck_core::{
    Metadata, NewOperation, Operation, OperationTransitionError, OperationType, Service,
    TargetType,
};
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, warn, Instrument};

pub use delay::{DelayPoint, DelayProvider, SleepDelay};
pub use error::{EngineError, ExecutionFault, ValidationError};
pub use lifecycle::{EngineState, InFlightGuard, Lifecycle};

use crate::config::EngineConfig;
use crate::store::{EntityStore, StoreError};

// ---------------------------------------------------------------------------
// OperationEngine
// ---------------------------------------------------------------------------

/// Creates operations and drives each one to a terminal state.
pub struct OperationEngine {
    store: Arc<EntityStore>,
    delays: Arc<dyn DelayProvider>,
    permits: Arc<Semaphore>,
    lifecycle: Lifecycle,
}

impl OperationEngine {
    /// Creates an engine that sleeps for `config.delays` at each step.
    #[must_use]
    pub fn new(store: Arc<EntityStore>, config: &EngineConfig) -> Self {
        Self::with_delay_provider(
            store,
            Arc::new(SleepDelay::new(config.delays)),
            config.max_concurrent_operations,
        )
    }

    /// Creates an engine with a custom [`DelayProvider`].
    #[must_use]
    pub fn with_delay_provider(
        store: Arc<EntityStore>,
        delays: Arc<dyn DelayProvider>,
        max_concurrent_operations: u32,
    ) -> Self {
        Self {
            store,
            delays,
            permits: Arc::new(Semaphore::new(max_concurrent_operations.max(1) as usize)),
            lifecycle: Lifecycle::new(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.lifecycle.state()
    }

    /// Number of triggered operations that have not yet finished executing.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.lifecycle.in_flight_count()
    }

    /// Validates and records a new operation, then starts it in the
    /// background. The returned record is always `pending`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ShuttingDown`] once [`shutdown`](Self::shutdown) began.
    /// - [`EngineError::NotFound`] if the target does not exist.
    /// - [`EngineError::Validation`] if `metadata` is unusable for `op_type`.
    ///
    /// No operation is created when an error is returned.
    pub fn trigger(
        &self,
        op_type: OperationType,
        target_type: TargetType,
        target_id: &str,
        metadata: Metadata,
    ) -> Result<Operation, EngineError> {
        let guard = self.lifecycle.admit().ok_or(EngineError::ShuttingDown)?;
        let target = self.resolve_target(target_type, target_id)?;
        let metadata = validate::normalize(op_type, &target, metadata)?;

        let op = self.store.create_operation(NewOperation {
            op_type,
            target_type,
            target_id: target_id.to_string(),
            metadata,
        });
        info!(
            op_id = %op.id,
            op_type = %op_type,
            target_id = target_id,
            "operation triggered"
        );

        self.spawn(&op, guard);
        Ok(op)
    }

    /// Polls the store until the operation is terminal.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no operation has this id.
    pub async fn wait_for(
        &self,
        op_id: &str,
        poll_interval: Duration,
    ) -> Result<Operation, StoreError> {
        loop {
            let op = self.store.get_operation(op_id)?;
            if op.status.is_terminal() {
                return Ok(op);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Stops accepting triggers and waits up to `timeout` for in-flight
    /// operations to finish. In-flight operations are never cancelled.
    ///
    /// Returns `true` if everything drained in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.lifecycle.begin_drain();
        info!(
            in_flight = self.lifecycle.in_flight_count(),
            "draining operation engine"
        );

        let drained = self.lifecycle.wait_for_drain(timeout).await;
        if drained {
            info!(state = self.lifecycle.state().as_str(), "operation engine stopped");
        } else {
            warn!(
                state = self.lifecycle.state().as_str(),
                in_flight = self.lifecycle.in_flight_count(),
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "operation engine drain timed out"
            );
        }
        drained
    }

    fn resolve_target(&self, target_type: TargetType, id: &str) -> Result<Service, EngineError> {
        match target_type {
            TargetType::Service => Ok(self.store.get_service(id)?),
        }
    }

    fn spawn(&self, op: &Operation, guard: InFlightGuard) {
        let store = Arc::clone(&self.store);
        let delays = Arc::clone(&self.delays);
        let permits = Arc::clone(&self.permits);
        let op_id = op.id.clone();

        let span = info_span!(
            "operation",
            op_id = %op.id,
            op_type = %op.op_type,
            target_id = %op.target_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        tokio::spawn(
            async move {
                let _guard = guard;
                // The semaphore is never closed, so acquisition only waits.
                let _permit = permits.acquire_owned().await.ok();

                let start = Instant::now();
                let outcome = execute(&store, delays.as_ref(), &op_id).await;

                let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                info!(duration_ms = duration_ms, outcome = outcome, "operation complete");
            }
            .instrument(span),
        );
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Runs one operation to a terminal state and returns the outcome label.
async fn execute(store: &EntityStore, delays: &dyn DelayProvider, op_id: &str) -> &'static str {
    delays.pause(DelayPoint::Settle).await;

    let running = match record(store, op_id, |op, now| op.start(now)) {
        Ok(op) => op,
        Err(err) => {
            warn!(error = %err, "operation could not start");
            return "error";
        }
    };
    debug!("operation running");
    delays.pause(DelayPoint::Work).await;

    let finished = match effects::apply(store, delays, &running).await {
        Ok(()) => record(store, op_id, |op, now| op.succeed(now)),
        Err(fault) => {
            let reason = fault.to_string();
            warn!(reason = %reason, "operation failed");
            record(store, op_id, |op, now| op.fail(&reason, now))
        }
    };

    match finished {
        Ok(op) => op.status.as_str(),
        Err(err) => {
            warn!(error = %err, "operation could not finish");
            "error"
        }
    }
}

/// Applies one state-machine step to the stored operation and returns the
/// updated record.
fn record(
    store: &EntityStore,
    op_id: &str,
    step: impl FnOnce(&mut Operation, DateTime<Utc>) -> Result<(), OperationTransitionError>,
) -> Result<Operation, ExecutionFault> {
    let now = Utc::now();
    store
        .update_operation(op_id, |op| step(&mut *op, now).map(|()| op.clone()))
        .map_err(|err| match err {
            StoreError::OperationTransition(transition) => ExecutionFault::Transition(transition),
            other => ExecutionFault::Store(other),
        })?
        .map_err(ExecutionFault::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
