//! Engine admission state with in-flight operation tracking.
//!
//! Uses `ArcSwap` for lock-free state transitions and an atomic counter with
//! RAII guards so a drain knows when every spawned operation has finished.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

/// Admission state of the operation engine.
///
/// State machine: Accepting -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// New triggers are admitted.
    Accepting,
    /// Triggers are rejected; in-flight operations keep running.
    Draining,
    /// Every in-flight operation has reached a terminal state.
    Stopped,
}

impl EngineState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepting => "accepting",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    in_flight: Arc<AtomicU64>,
    state: Arc<ArcSwap<EngineState>>,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(AtomicU64::new(0)),
            state: Arc::new(ArcSwap::from_pointee(EngineState::Accepting)),
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        **self.state.load()
    }

    /// Tries to admit one operation.
    ///
    /// The guard is taken before the state is checked, so a concurrent drain
    /// either sees the guard or this call sees `Draining`.
    #[must_use]
    pub fn admit(&self) -> Option<InFlightGuard> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        };
        (self.state() == EngineState::Accepting).then_some(guard)
    }

    /// Stops admitting new operations.
    pub fn begin_drain(&self) {
        self.state.rcu(|current| match **current {
            EngineState::Accepting => Arc::new(EngineState::Draining),
            other => Arc::new(other),
        });
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits for every admitted operation to finish, up to `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` once the counter reaches zero.
    /// Returns `false` on timeout, leaving the state `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                self.state.store(Arc::new(EngineState::Stopped));
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped, including
/// during unwinding of a panicking operation task.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
