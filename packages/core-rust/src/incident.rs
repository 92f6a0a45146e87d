//! Incident records and their forward-only lifecycle.
//!
//! ```text
//! open ──ack──> acknowledged ──resolve──> resolved
//!   └──────────────resolve──────────────────┘
//! ```
//!
//! Re-acknowledging an acknowledged incident replaces the acknowledging
//! actor. Nothing leaves `resolved`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::UnknownVariant;

/// Incident severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sev| sev.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("severity", s))
    }
}

/// Lifecycle status of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl IncidentStatus {
    pub const ALL: [Self; 3] = [Self::Open, Self::Acknowledged, Self::Resolved];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("incident status", s))
    }
}

/// Rejected incident transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IncidentTransitionError {
    #[error("incident cannot be acknowledged in its current state ({from})")]
    CannotAcknowledge { from: IncidentStatus },
    #[error("incident already resolved")]
    AlreadyResolved,
}

/// Violations of the actor/status consistency rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IncidentInvariantError {
    #[error("acked_by must be set exactly when status is acknowledged or resolved (status {status})")]
    AckActorMismatch { status: IncidentStatus },
    #[error("resolved_by must be set exactly when status is resolved (status {status})")]
    ResolveActorMismatch { status: IncidentStatus },
}

/// An incident raised against a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub service_id: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub acked_by: Option<String>,
    pub resolved_by: Option<String>,
}

/// Caller-supplied fields for a new incident. The store assigns the id,
/// status, and creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIncident {
    pub service_id: String,
    pub title: String,
    #[serde(default)]
    pub severity: Severity,
}

impl Incident {
    /// Builds an open incident from caller fields.
    #[must_use]
    pub fn open(id: String, fields: NewIncident, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            service_id: fields.service_id,
            severity: fields.severity,
            status: IncidentStatus::Open,
            title: fields.title,
            created_at,
            acked_by: None,
            resolved_by: None,
        }
    }

    /// Checks that the actor fields agree with the status.
    ///
    /// # Errors
    ///
    /// Returns the first [`IncidentInvariantError`] found.
    pub fn validate(&self) -> Result<(), IncidentInvariantError> {
        let expects_ack = matches!(
            self.status,
            IncidentStatus::Acknowledged | IncidentStatus::Resolved
        );
        if self.acked_by.is_some() != expects_ack {
            return Err(IncidentInvariantError::AckActorMismatch {
                status: self.status,
            });
        }
        if self.resolved_by.is_some() != (self.status == IncidentStatus::Resolved) {
            return Err(IncidentInvariantError::ResolveActorMismatch {
                status: self.status,
            });
        }
        Ok(())
    }

    /// Acknowledges the incident on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// Returns [`IncidentTransitionError::CannotAcknowledge`] if the incident
    /// is resolved.
    pub fn acknowledge(&mut self, actor: &str) -> Result<(), IncidentTransitionError> {
        match self.status {
            IncidentStatus::Open | IncidentStatus::Acknowledged => {
                self.status = IncidentStatus::Acknowledged;
                self.acked_by = Some(actor.to_string());
                Ok(())
            }
            IncidentStatus::Resolved => {
                Err(IncidentTransitionError::CannotAcknowledge { from: self.status })
            }
        }
    }

    /// Resolves the incident on behalf of `actor`.
    ///
    /// Resolving straight from `open` records `actor` as the acknowledger too.
    ///
    /// # Errors
    ///
    /// Returns [`IncidentTransitionError::AlreadyResolved`] if the incident is
    /// already resolved.
    pub fn resolve(&mut self, actor: &str) -> Result<(), IncidentTransitionError> {
        if self.status == IncidentStatus::Resolved {
            return Err(IncidentTransitionError::AlreadyResolved);
        }
        if self.acked_by.is_none() {
            self.acked_by = Some(actor.to_string());
        }
        self.status = IncidentStatus::Resolved;
        self.resolved_by = Some(actor.to_string());
        Ok(())
    }
}
