//! Operation records: tracked asynchronous remediation actions.
//!
//! State machine: `pending -> running -> succeeded | failed`. An operation
//! may also fail straight from `pending`. `succeeded` and `failed` are
//! terminal; every transition method refuses to touch a terminal record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::UnknownVariant;

/// Free-form operation arguments and results.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key under which a failed operation records its reason.
pub const FAILURE_REASON_KEY: &str = "error";

/// Metadata key carrying the requested replica count of a scale operation.
pub const REPLICAS_KEY: &str = "replicas";

/// Metadata key carrying the requested version of a deploy operation.
pub const VERSION_KEY: &str = "version";

/// Kind of remediation an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Restart,
    Scale,
    Deploy,
}

impl OperationType {
    pub const ALL: [Self; 3] = [Self::Restart, Self::Scale, Self::Deploy];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Scale => "scale",
            Self::Deploy => "deploy",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("operation type", s))
    }
}

/// Class of entity an operation targets. Only services today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Service,
}

impl TargetType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Service => "service",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of an operation in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl OperationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// `true` for `succeeded` and `failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected operation transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationTransitionError {
    #[error("operation is already terminal ({status})")]
    AlreadyTerminal { status: OperationStatus },
    #[error("operation cannot move from {from} to {to}")]
    Invalid {
        from: OperationStatus,
        to: OperationStatus,
    },
}

/// Caller-supplied fields for a new operation. The store assigns the id,
/// status, and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub op_type: OperationType,
    pub target_type: TargetType,
    pub target_id: String,
    pub metadata: Metadata,
}

/// A tracked remediation action against a target entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub target_type: TargetType,
    pub target_id: String,
    pub status: OperationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Operation {
    /// Builds a pending operation from caller fields.
    #[must_use]
    pub fn pending(id: String, fields: NewOperation, now: DateTime<Utc>) -> Self {
        Self {
            id,
            op_type: fields.op_type,
            target_type: fields.target_type,
            target_id: fields.target_id,
            status: OperationStatus::Pending,
            created_at: now,
            updated_at: now,
            metadata: fields.metadata,
        }
    }

    /// Moves `pending -> running`.
    ///
    /// # Errors
    ///
    /// Fails if the operation is not pending.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), OperationTransitionError> {
        self.transition(OperationStatus::Running, now)
    }

    /// Moves `running -> succeeded`.
    ///
    /// # Errors
    ///
    /// Fails if the operation is not running.
    pub fn succeed(&mut self, now: DateTime<Utc>) -> Result<(), OperationTransitionError> {
        self.transition(OperationStatus::Succeeded, now)
    }

    /// Moves a non-terminal operation to `failed`, recording `reason` under
    /// [`FAILURE_REASON_KEY`].
    ///
    /// # Errors
    ///
    /// Fails if the operation is already terminal. The metadata is left
    /// untouched in that case.
    pub fn fail(
        &mut self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), OperationTransitionError> {
        self.transition(OperationStatus::Failed, now)?;
        self.metadata.insert(
            FAILURE_REASON_KEY.to_string(),
            serde_json::Value::String(reason.to_string()),
        );
        Ok(())
    }

    /// The recorded failure reason, if any.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        self.metadata
            .get(FAILURE_REASON_KEY)
            .and_then(serde_json::Value::as_str)
    }

    fn transition(
        &mut self,
        to: OperationStatus,
        now: DateTime<Utc>,
    ) -> Result<(), OperationTransitionError> {
        use OperationStatus::{Failed, Pending, Running, Succeeded};

        let from = self.status;
        if from.is_terminal() {
            return Err(OperationTransitionError::AlreadyTerminal { status: from });
        }
        let allowed = matches!(
            (from, to),
            (Pending, Running) | (Running, Succeeded) | (Pending | Running, Failed)
        );
        if !allowed {
            return Err(OperationTransitionError::Invalid { from, to });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 28, 12, 0, 0).unwrap()
    }

    fn make_op() -> Operation {
        let mut metadata = Metadata::new();
        metadata.insert(REPLICAS_KEY.to_string(), json!(5));
        Operation::pending(
            "op-0000abcd".to_string(),
            NewOperation {
                op_type: OperationType::Scale,
                target_type: TargetType::Service,
                target_id: "svc-a".to_string(),
                metadata,
            },
            t0(),
        )
    }

    #[test]
    fn pending_operation_has_matching_timestamps() {
        let op = make_op();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.created_at, op.updated_at);
    }

    #[test]
    fn happy_path_updates_timestamp_on_every_step() {
        let mut op = make_op();
        op.start(t0() + Duration::milliseconds(300)).unwrap();
        assert_eq!(op.status, OperationStatus::Running);
        assert_eq!(op.updated_at, t0() + Duration::milliseconds(300));

        op.succeed(t0() + Duration::milliseconds(1800)).unwrap();
        assert_eq!(op.status, OperationStatus::Succeeded);
        assert_eq!(op.updated_at, t0() + Duration::milliseconds(1800));
        assert_eq!(op.created_at, t0());
    }

    #[test]
    fn fail_records_reason_in_metadata() {
        let mut op = make_op();
        op.start(t0()).unwrap();
        op.fail("target vanished", t0()).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.failure_reason(), Some("target vanished"));
        assert_eq!(op.metadata[REPLICAS_KEY], json!(5));
    }

    #[test]
    fn succeed_requires_running() {
        let mut op = make_op();
        assert_eq!(
            op.succeed(t0()),
            Err(OperationTransitionError::Invalid {
                from: OperationStatus::Pending,
                to: OperationStatus::Succeeded,
            })
        );
    }

    #[test]
    fn operation_type_parses_its_own_name() {
        for op_type in OperationType::ALL {
            assert_eq!(op_type.as_str().parse::<OperationType>(), Ok(op_type));
        }
        let err = "reboot".parse::<OperationType>().unwrap_err();
        assert_eq!(err, UnknownVariant::new("operation type", "reboot"));
    }

    #[test]
    fn serializes_type_field_name() {
        let value = serde_json::to_value(make_op()).unwrap();
        assert_eq!(value["type"], "scale");
        assert_eq!(value["target_type"], "service");
        assert_eq!(value["status"], "pending");
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Start,
        Succeed,
        Fail,
    }

    proptest! {
        #[test]
        fn prop_terminal_operations_never_change(
            steps in proptest::collection::vec(
                prop_oneof![Just(Step::Start), Just(Step::Succeed), Just(Step::Fail)],
                0..10,
            )
        ) {
            let mut op = make_op();
            let mut terminal: Option<Operation> = None;
            for step in steps {
                let result = match step {
                    Step::Start => op.start(t0()),
                    Step::Succeed => op.succeed(t0()),
                    Step::Fail => op.fail("boom", t0()),
                };
                if let Some(frozen) = &terminal {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(&op, frozen);
                } else if op.status.is_terminal() {
                    terminal = Some(op.clone());
                }
            }
        }
    }
}
