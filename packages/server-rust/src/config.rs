use std::time::Duration;

/// Pauses taken by an operation as it moves through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDelays {
    /// Wait between creation and the `pending -> running` transition.
    pub settle: Duration,
    /// Wait after entering `running`, before the effect starts.
    pub work: Duration,
    /// Gap between the two halves of a restart effect.
    pub restart: Duration,
    /// Gap between `desired_replicas` and `replicas` being applied.
    pub scale: Duration,
    /// Gap between the deploy announcement and the version switch.
    pub deploy: Duration,
}

impl StepDelays {
    /// All delays zero. Operations still complete asynchronously.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            work: Duration::ZERO,
            restart: Duration::ZERO,
            scale: Duration::ZERO,
            deploy: Duration::ZERO,
        }
    }
}

impl Default for StepDelays {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(300),
            work: Duration::from_millis(1000),
            restart: Duration::from_millis(400),
            scale: Duration::from_millis(500),
            deploy: Duration::from_millis(600),
        }
    }
}

/// Configuration for the operation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Step timings used by the default sleeping delay provider.
    pub delays: StepDelays,
    /// Maximum number of operations executing at once. Excess operations
    /// stay `pending` until a slot frees up. Values below 1 are treated as 1.
    pub max_concurrent_operations: u32,
    /// How long a graceful shutdown waits for in-flight operations.
    pub drain_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delays: StepDelays::default(),
            max_concurrent_operations: 64,
            drain_timeout: Duration::from_secs(10),
        }
    }
}
