//! Service records: the catalog entries that remediation operations act on.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::UnknownVariant;

/// Operational status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Down,
    Maintenance,
    Scaling,
}

impl ServiceStatus {
    /// All statuses, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Healthy,
        Self::Degraded,
        Self::Down,
        Self::Maintenance,
        Self::Scaling,
    ];

    /// Returns the lowercase wire name of this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
            Self::Maintenance => "maintenance",
            Self::Scaling => "scaling",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("service status", s))
    }
}

/// Violations of the service data-model invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceInvariantError {
    #[error("service is down but reports {replicas} replicas")]
    DownWithReplicas { replicas: u32 },
    #[error("cannot run {requested} replicas while the service is down")]
    ScaleWhileDown { requested: u32 },
}

/// A deployable service in the catalog.
///
/// Invariant: `replicas == 0` whenever `status` is [`ServiceStatus::Down`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub status: ServiceStatus,
    pub version: String,
    pub replicas: u32,
    pub desired_replicas: u32,
    pub owner: String,
    pub last_deploy_at: DateTime<Utc>,
}

impl Service {
    /// Checks the data-model invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceInvariantError::DownWithReplicas`] if a down service
    /// reports running replicas.
    pub fn validate(&self) -> Result<(), ServiceInvariantError> {
        if self.status == ServiceStatus::Down && self.replicas != 0 {
            return Err(ServiceInvariantError::DownWithReplicas {
                replicas: self.replicas,
            });
        }
        Ok(())
    }

    /// Sets the running replica count, keeping the down-means-zero invariant.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceInvariantError::ScaleWhileDown`] if the service is
    /// down and `replicas` is non-zero. The record is left unchanged.
    pub fn apply_replicas(&mut self, replicas: u32) -> Result<(), ServiceInvariantError> {
        if self.status == ServiceStatus::Down && replicas != 0 {
            return Err(ServiceInvariantError::ScaleWhileDown {
                requested: replicas,
            });
        }
        self.replicas = replicas;
        Ok(())
    }

    /// Records a completed rollout of `version` at `at`.
    pub fn apply_deploy(&mut self, version: &str, at: DateTime<Utc>) {
        self.version = version.to_string();
        self.last_deploy_at = at;
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn make_service(id: &str, status: ServiceStatus, replicas: u32) -> Service {
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

    #[test]
    fn status_round_trips_through_str() {
        for status in ServiceStatus::ALL {
            assert_eq!(status.as_str().parse::<ServiceStatus>().unwrap(), status);
        }
        assert!("rebooting".parse::<ServiceStatus>().is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ServiceStatus::Maintenance).unwrap();
        assert_eq!(json, "\"maintenance\"");
    }

    #[test]
    fn down_service_with_replicas_is_invalid() {
        let svc = make_service("svc-a", ServiceStatus::Down, 2);
        assert_eq!(
            svc.validate(),
            Err(ServiceInvariantError::DownWithReplicas { replicas: 2 })
        );
        assert!(make_service("svc-b", ServiceStatus::Down, 0).validate().is_ok());
    }

    #[test]
    fn apply_replicas_rejects_nonzero_on_down_service() {
        let mut svc = make_service("svc-a", ServiceStatus::Down, 0);
        assert!(svc.apply_replicas(3).is_err());
        assert_eq!(svc.replicas, 0);

        assert!(svc.apply_replicas(0).is_ok());

        svc.status = ServiceStatus::Healthy;
        svc.apply_replicas(3).unwrap();
        assert_eq!(svc.replicas, 3);
    }

    #[test]
    fn apply_deploy_sets_version_and_timestamp() {
        let mut svc = make_service("svc-a", ServiceStatus::Healthy, 1);
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        svc.apply_deploy("9.9.9", at);
        assert_eq!(svc.version, "9.9.9");
        assert_eq!(svc.last_deploy_at, at);
    }
}
