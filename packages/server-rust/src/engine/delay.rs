//! Suspension points of an operation, behind an injectable provider.

use async_trait::async_trait;
use opsdeck_core::OperationType;
use tracing::debug;

use crate::config::StepDelays;

/// A named point at which an executing operation pauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DelayPoint {
    /// Before `pending -> running`.
    Settle,
    /// After entering `running`, before the effect.
    Work,
    /// Inside the effect of the given operation type.
    Effect(OperationType),
}

impl DelayPoint {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Settle => "settle",
            Self::Work => "work",
            Self::Effect(OperationType::Restart) => "restart",
            Self::Effect(OperationType::Scale) => "scale",
            Self::Effect(OperationType::Deploy) => "deploy",
        }
    }
}

/// Source of the pauses an operation takes while executing.
///
/// Swapped out in tests to gate or remove the waits.
#[async_trait]
pub trait DelayProvider: Send + Sync {
    async fn pause(&self, point: DelayPoint);
}

/// Sleeps on the Tokio timer for the configured [`StepDelays`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepDelay {
    delays: StepDelays,
}

impl SleepDelay {
    #[must_use]
    pub fn new(delays: StepDelays) -> Self {
        Self { delays }
    }
}

#[async_trait]
impl DelayProvider for SleepDelay {
    async fn pause(&self, point: DelayPoint) {
        let duration = match point {
            DelayPoint::Settle => self.delays.settle,
            DelayPoint::Work => self.delays.work,
            DelayPoint::Effect(OperationType::Restart) => self.delays.restart,
            DelayPoint::Effect(OperationType::Scale) => self.delays.scale,
            DelayPoint::Effect(OperationType::Deploy) => self.delays.deploy,
        };
        if duration.is_zero() {
            return;
        }
        debug!(
            point = point.as_str(),
            delay_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "pausing"
        );
        tokio::time::sleep(duration).await;
    }
}
