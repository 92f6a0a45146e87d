//! In-memory entity store backed by one [`DashMap`] per entity class.
//!
//! Every read returns an owned clone, so callers never hold a shard lock
//! after an accessor returns. Every mutation runs inside one exclusive shard
//! section, so a reader sees either none or all of a mutator's changes.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use opsdeck_core::{
    EntityKind, Incident, LogLine, NewIncident, NewOperation, Operation,
    OperationTransitionError, Service,
};
use uuid::Uuid;

use super::error::StoreError;

const OPERATION_ID_HEX_LEN: usize = 8;
const INCIDENT_ID_HEX_LEN: usize = 6;

/// Default number of lines returned by [`EntityStore::read_logs`].
pub const DEFAULT_LOG_LIMIT: usize = 100;

/// Which slice of a service log to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogWindow {
    /// Maximum number of lines returned.
    pub limit: usize,
    /// Take the newest `limit` lines instead of the oldest.
    pub tail: bool,
}

impl Default for LogWindow {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LOG_LIMIT,
            tail: false,
        }
    }
}

/// A window of log lines plus the full length of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPage {
    pub lines: Vec<LogLine>,
    pub total: usize,
}

/// Authoritative holder of all services, incidents, operations, and logs.
///
/// Shared between the operation engine and readers via `Arc`.
#[derive(Debug, Default)]
pub struct EntityStore {
    services: DashMap<String, Service>,
    incidents: DashMap<String, Incident>,
    operations: DashMap<String, Operation>,
    logs: DashMap<String, Vec<LogLine>>,
}

fn short_id(prefix: &str, hex_len: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &hex[..hex_len])
}

impl EntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Point lookups
    // -----------------------------------------------------------------------

    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no service has this id.
    pub fn get_service(&self, id: &str) -> Result<Service, StoreError> {
        self.services
            .get(id)
            .map(|s| s.clone())
            .ok_or_else(|| StoreError::not_found(EntityKind::Service, id))
    }

    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no incident has this id.
    pub fn get_incident(&self, id: &str) -> Result<Incident, StoreError> {
        self.incidents
            .get(id)
            .map(|i| i.clone())
            .ok_or_else(|| StoreError::not_found(EntityKind::Incident, id))
    }

    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no operation has this id.
    pub fn get_operation(&self, id: &str) -> Result<Operation, StoreError> {
        self.operations
            .get(id)
            .map(|o| o.clone())
            .ok_or_else(|| StoreError::not_found(EntityKind::Operation, id))
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// All services, ordered by id.
    #[must_use]
    pub fn list_services(&self) -> Vec<Service> {
        let mut items: Vec<Service> = self.services.iter().map(|e| e.value().clone()).collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// All incidents, ordered by id.
    #[must_use]
    pub fn list_incidents(&self) -> Vec<Incident> {
        let mut items: Vec<Incident> =
            self.incidents.iter().map(|e| e.value().clone()).collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// All operations, ordered by id.
    #[must_use]
    pub fn list_operations(&self) -> Vec<Operation> {
        let mut items: Vec<Operation> =
            self.operations.iter().map(|e| e.value().clone()).collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    #[must_use]
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn incident_count(&self) -> usize {
        self.incidents.len()
    }

    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    // -----------------------------------------------------------------------
    // Atomic single-entity updates
    // -----------------------------------------------------------------------

    /// Applies `mutate` to a copy of the service while holding its shard
    /// exclusively, and stores the copy only if it still satisfies the
    /// service invariants.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no service has this id. `mutate` is not
    /// called in that case. [`StoreError::InvalidEntity`] if the mutated
    /// service is invalid or has a different id; the stored record is left
    /// untouched.
    pub fn update_service<R>(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut Service) -> R,
    ) -> Result<R, StoreError> {
        let mut entry = self
            .services
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Service, id))?;
        let mut draft = entry.value().clone();
        let out = mutate(&mut draft);
        if draft.id != id {
            return Err(StoreError::invalid(EntityKind::Service, id, "id cannot change"));
        }
        draft
            .validate()
            .map_err(|e| StoreError::invalid(EntityKind::Service, id, e))?;
        *entry.value_mut() = draft;
        Ok(out)
    }

    /// Applies `mutate` to a copy of the incident while holding its shard
    /// exclusively, and stores the copy only if it is still consistent.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no incident has this id, or
    /// [`StoreError::InvalidEntity`] if the mutated incident is invalid or
    /// has a different id.
    pub fn update_incident<R>(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut Incident) -> R,
    ) -> Result<R, StoreError> {
        let mut entry = self
            .incidents
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Incident, id))?;
        let mut draft = entry.value().clone();
        let out = mutate(&mut draft);
        if draft.id != id {
            return Err(StoreError::invalid(EntityKind::Incident, id, "id cannot change"));
        }
        draft
            .validate()
            .map_err(|e| StoreError::invalid(EntityKind::Incident, id, e))?;
        *entry.value_mut() = draft;
        Ok(out)
    }

    /// Applies `mutate` to the operation while holding its shard exclusively.
    ///
    /// Terminal operations are frozen: `mutate` is never called on them.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no operation has this id, or
    /// [`StoreError::OperationTransition`] if it is already terminal.
    pub fn update_operation<R>(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut Operation) -> R,
    ) -> Result<R, StoreError> {
        let mut entry = self
            .operations
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Operation, id))?;
        let status = entry.status;
        if status.is_terminal() {
            return Err(OperationTransitionError::AlreadyTerminal { status }.into());
        }
        Ok(mutate(entry.value_mut()))
    }

    // -----------------------------------------------------------------------
    // Logs
    // -----------------------------------------------------------------------

    /// Appends one line to the service's log.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the service does not exist.
    pub fn append_log(&self, service_id: &str, line: LogLine) -> Result<(), StoreError> {
        if !self.services.contains_key(service_id) {
            return Err(StoreError::not_found(EntityKind::Service, service_id));
        }
        self.logs.entry(service_id.to_string()).or_default().push(line);
        Ok(())
    }

    /// Returns the oldest (or, with `tail`, newest) `window.limit` lines.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the service does not exist.
    pub fn read_logs(&self, service_id: &str, window: LogWindow) -> Result<LogPage, StoreError> {
        if !self.services.contains_key(service_id) {
            return Err(StoreError::not_found(EntityKind::Service, service_id));
        }
        let Some(log) = self.logs.get(service_id) else {
            return Ok(LogPage {
                lines: Vec::new(),
                total: 0,
            });
        };
        let total = log.len();
        let take = window.limit.min(total);
        let skip = if window.tail { total - take } else { 0 };
        Ok(LogPage {
            lines: log.iter().skip(skip).take(take).cloned().collect(),
            total,
        })
    }

    /// Lines appended after the first `offset` lines.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the service does not exist.
    pub fn logs_since(&self, service_id: &str, offset: usize) -> Result<Vec<LogLine>, StoreError> {
        if !self.services.contains_key(service_id) {
            return Err(StoreError::not_found(EntityKind::Service, service_id));
        }
        Ok(self
            .logs
            .get(service_id)
            .map(|log| log.iter().skip(offset).cloned().collect())
            .unwrap_or_default())
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Inserts a `pending` operation under a fresh `op-<8 hex>` id.
    pub fn create_operation(&self, fields: NewOperation) -> Operation {
        let now = Utc::now();
        loop {
            let id = short_id("op", OPERATION_ID_HEX_LEN);
            if let Entry::Vacant(slot) = self.operations.entry(id.clone()) {
                let op = Operation::pending(id, fields, now);
                slot.insert(op.clone());
                return op;
            }
        }
    }

    /// Inserts an `open` incident under a fresh `inc-<6 hex>` id.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the referenced service does not exist, or
    /// [`StoreError::InvalidEntity`] if the title is blank.
    pub fn create_incident(&self, fields: NewIncident) -> Result<Incident, StoreError> {
        if !self.services.contains_key(&fields.service_id) {
            return Err(StoreError::not_found(
                EntityKind::Service,
                &fields.service_id,
            ));
        }
        if fields.title.trim().is_empty() {
            return Err(StoreError::invalid(
                EntityKind::Incident,
                "(new)",
                "title is required",
            ));
        }
        let now = Utc::now();
        loop {
            let id = short_id("inc", INCIDENT_ID_HEX_LEN);
            if let Entry::Vacant(slot) = self.incidents.entry(id.clone()) {
                let incident = Incident::open(id, fields, now);
                slot.insert(incident.clone());
                return Ok(incident);
            }
        }
    }

    /// Adds a seed service after checking its invariants.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidEntity`] on an invariant violation, or
    /// [`StoreError::AlreadyExists`] on a duplicate id.
    pub fn insert_service(&self, service: Service) -> Result<(), StoreError> {
        service
            .validate()
            .map_err(|e| StoreError::invalid(EntityKind::Service, &service.id, e))?;
        match self.services.entry(service.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::already_exists(
                EntityKind::Service,
                &service.id,
            )),
            Entry::Vacant(slot) => {
                slot.insert(service);
                Ok(())
            }
        }
    }

    /// Adds a seed incident after checking its invariants and service link.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidEntity`] on an invariant violation,
    /// [`StoreError::NotFound`] if the service is missing, or
    /// [`StoreError::AlreadyExists`] on a duplicate id.
    pub fn insert_incident(&self, incident: Incident) -> Result<(), StoreError> {
        incident
            .validate()
            .map_err(|e| StoreError::invalid(EntityKind::Incident, &incident.id, e))?;
        if !self.services.contains_key(&incident.service_id) {
            return Err(StoreError::not_found(
                EntityKind::Service,
                &incident.service_id,
            ));
        }
        match self.incidents.entry(incident.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::already_exists(
                EntityKind::Incident,
                &incident.id,
            )),
            Entry::Vacant(slot) => {
                slot.insert(incident);
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Incident lifecycle
    // -----------------------------------------------------------------------

    /// Acknowledges an open or acknowledged incident on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the incident is missing, or
    /// [`StoreError::Transition`] if it is already resolved.
    pub fn acknowledge_incident(&self, id: &str, actor: &str) -> Result<Incident, StoreError> {
        let updated = self.update_incident(id, |inc| {
            inc.acknowledge(actor).map(|()| inc.clone())
        })??;
        Ok(updated)
    }

    /// Resolves an incident on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the incident is missing, or
    /// [`StoreError::Transition`] if it is already resolved.
    pub fn resolve_incident(&self, id: &str, actor: &str) -> Result<Incident, StoreError> {
        let updated = self.update_incident(id, |inc| inc.resolve(actor).map(|()| inc.clone()))??;
        Ok(updated)
    }

    #[cfg(test)]
    pub(crate) fn remove_service(&self, id: &str) -> Option<Service> {
        self.services.remove(id).map(|(_, s)| s)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use opsdeck_core::{
        IncidentStatus, IncidentTransitionError, OperationStatus, OperationType, ServiceStatus,
        Severity, TargetType,
    };

    use super::*;
    use crate::test_support::make_service;

    fn store_with(services: &[(&str, ServiceStatus, u32)]) -> EntityStore {
        let store = EntityStore::new();
        for (id, status, replicas) in services {
            store
                .insert_service(make_service(id, *status, *replicas))
                .unwrap();
        }
        store
    }

    fn new_restart(target: &str) -> NewOperation {
        NewOperation {
            op_type: OperationType::Restart,
            target_type: TargetType::Service,
            target_id: target.to_string(),
            metadata: opsdeck_core::Metadata::new(),
        }
    }

    #[test]
    fn get_missing_entities_is_not_found() {
        let store = EntityStore::new();
        assert!(store.get_service("nope").unwrap_err().is_not_found());
        assert!(store.get_incident("nope").unwrap_err().is_not_found());
        assert!(store.get_operation("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn list_services_is_sorted_snapshot() {
        let store = store_with(&[
            ("svc-c", ServiceStatus::Healthy, 1),
            ("svc-a", ServiceStatus::Healthy, 1),
            ("svc-b", ServiceStatus::Degraded, 2),
        ]);
        let snapshot = store.list_services();
        let ids: Vec<&str> = snapshot.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["svc-a", "svc-b", "svc-c"]);

        store.update_service("svc-a", |s| s.replicas = 9).unwrap();
        assert_eq!(snapshot[0].replicas, 1);
        assert_eq!(store.service_count(), 3);
    }

    #[test]
    fn update_returns_mutator_result() {
        let store = store_with(&[("svc-a", ServiceStatus::Healthy, 2)]);
        let before = store
            .update_service("svc-a", |s| {
                let old = s.replicas;
                s.replicas = 4;
                s.desired_replicas = 4;
                old
            })
            .unwrap();
        assert_eq!(before, 2);
        let svc = store.get_service("svc-a").unwrap();
        assert_eq!((svc.replicas, svc.desired_replicas), (4, 4));
    }

    #[test]
    fn update_missing_does_not_call_mutator() {
        let store = EntityStore::new();
        let mut called = false;
        let err = store.update_service("ghost", |_| called = true).unwrap_err();
        assert!(err.is_not_found());
        assert!(!called);
    }

    #[test]
    fn concurrent_updates_to_one_service_are_serialized() {
        let store = Arc::new(store_with(&[("svc-a", ServiceStatus::Healthy, 0)]));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for _ in 0..250 {
                        store.update_service("svc-a", |s| s.replicas += 1).unwrap();
                    }
                });
            }
        });
        assert_eq!(store.get_service("svc-a").unwrap().replicas, 2000);
    }

    #[test]
    fn append_log_requires_existing_service() {
        let store = EntityStore::new();
        let err = store
            .append_log("ghost", LogLine::info("hello"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn read_logs_honours_window() {
        let store = store_with(&[("svc-a", ServiceStatus::Healthy, 1)]);
        for i in 0..5 {
            store
                .append_log("svc-a", LogLine::info(format!("line {i}")))
                .unwrap();
        }

        let head = store
            .read_logs("svc-a", LogWindow { limit: 2, tail: false })
            .unwrap();
        assert_eq!(head.total, 5);
        let messages: Vec<&str> = head.lines.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, ["line 0", "line 1"]);

        let tail = store
            .read_logs("svc-a", LogWindow { limit: 2, tail: true })
            .unwrap();
        let messages: Vec<&str> = tail.lines.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, ["line 3", "line 4"]);

        let all = store.read_logs("svc-a", LogWindow::default()).unwrap();
        assert_eq!(all.lines.len(), 5);

        let since = store.logs_since("svc-a", 3).unwrap();
        assert_eq!(since.len(), 2);
    }

    #[test]
    fn read_logs_of_quiet_service_is_empty() {
        let store = store_with(&[("svc-a", ServiceStatus::Healthy, 1)]);
        let page = store.read_logs("svc-a", LogWindow::default()).unwrap();
        assert!(page.lines.is_empty());
        assert_eq!(page.total, 0);
        assert!(store.read_logs("ghost", LogWindow::default()).is_err());
    }

    #[test]
    fn create_operation_assigns_prefixed_id_and_pending_status() {
        let store = store_with(&[("svc-a", ServiceStatus::Healthy, 1)]);
        let op = store.create_operation(new_restart("svc-a"));
        assert!(op.id.starts_with("op-"));
        assert_eq!(op.id.len(), 3 + OPERATION_ID_HEX_LEN);
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(store.get_operation(&op.id).unwrap(), op);

        let other = store.create_operation(new_restart("svc-a"));
        assert_ne!(op.id, other.id);
        assert_eq!(store.operation_count(), 2);
    }

    #[test]
    fn create_incident_checks_service_and_title() {
        let store = store_with(&[("svc-a", ServiceStatus::Healthy, 1)]);
        let err = store
            .create_incident(NewIncident {
                service_id: "ghost".to_string(),
                title: "Outage".to_string(),
                severity: Severity::High,
            })
            .unwrap_err();
        assert!(err.is_not_found());

        let err = store
            .create_incident(NewIncident {
                service_id: "svc-a".to_string(),
                title: "  ".to_string(),
                severity: Severity::High,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidEntity { .. }));

        let inc = store
            .create_incident(NewIncident {
                service_id: "svc-a".to_string(),
                title: "Outage".to_string(),
                severity: Severity::High,
            })
            .unwrap();
        assert!(inc.id.starts_with("inc-"));
        assert_eq!(inc.id.len(), 4 + INCIDENT_ID_HEX_LEN);
        assert_eq!(inc.status, IncidentStatus::Open);
        assert_eq!(store.incident_count(), 1);
    }

    #[test]
    fn incident_lifecycle_through_store() {
        let store = store_with(&[("svc-a", ServiceStatus::Healthy, 1)]);
        let inc = store
            .create_incident(NewIncident {
                service_id: "svc-a".to_string(),
                title: "Latency".to_string(),
                severity: Severity::Medium,
            })
            .unwrap();

        let acked = store.acknowledge_incident(&inc.id, "alice").unwrap();
        assert_eq!(acked.status, IncidentStatus::Acknowledged);

        let resolved = store.resolve_incident(&inc.id, "bob").unwrap();
        assert_eq!(resolved.resolved_by.as_deref(), Some("bob"));

        let err = store.acknowledge_incident(&inc.id, "carol").unwrap_err();
        assert!(matches!(
            err,
            StoreError::Transition(IncidentTransitionError::CannotAcknowledge { .. })
        ));
        let err = store.resolve_incident(&inc.id, "carol").unwrap_err();
        assert_eq!(
            err,
            StoreError::Transition(IncidentTransitionError::AlreadyResolved)
        );
        assert_eq!(store.get_incident(&inc.id).unwrap(), resolved);
    }

    #[test]
    fn insert_rejects_duplicates_and_invalid_records() {
        let store = store_with(&[("svc-a", ServiceStatus::Healthy, 1)]);
        let dup = store
            .insert_service(make_service("svc-a", ServiceStatus::Healthy, 1))
            .unwrap_err();
        assert!(matches!(dup, StoreError::AlreadyExists { .. }));

        let bad = store
            .insert_service(make_service("svc-x", ServiceStatus::Down, 3))
            .unwrap_err();
        assert!(matches!(bad, StoreError::InvalidEntity { .. }));
        assert_eq!(store.service_count(), 1);
    }

    #[test]
    fn update_service_refuses_down_service_with_replicas() {
        let store = store_with(&[("svc-a", ServiceStatus::Healthy, 3)]);
        let err = store
            .update_service("svc-a", |s| s.status = ServiceStatus::Down)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidEntity { .. }));

        let svc = store.get_service("svc-a").unwrap();
        assert_eq!((svc.status, svc.replicas), (ServiceStatus::Healthy, 3));

        store
            .update_service("svc-a", |s| {
                s.status = ServiceStatus::Down;
                s.replicas = 0;
            })
            .unwrap();
        assert_eq!(store.get_service("svc-a").unwrap().status, ServiceStatus::Down);
    }

    #[test]
    fn update_cannot_rename_entities() {
        let store = store_with(&[("svc-a", ServiceStatus::Healthy, 1)]);
        let err = store
            .update_service("svc-a", |s| s.id = "svc-z".to_string())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidEntity { .. }));
        assert!(store.get_service("svc-a").is_ok());
        assert!(store.get_service("svc-z").unwrap_err().is_not_found());
    }

    #[test]
    fn update_incident_refuses_inconsistent_actors() {
        let store = store_with(&[("svc-a", ServiceStatus::Healthy, 1)]);
        let inc = store
            .create_incident(NewIncident {
                service_id: "svc-a".to_string(),
                title: "Errors".to_string(),
                severity: Severity::High,
            })
            .unwrap();

        let err = store
            .update_incident(&inc.id, |i| i.status = IncidentStatus::Resolved)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidEntity { .. }));
        assert_eq!(store.get_incident(&inc.id).unwrap(), inc);
    }

    #[test]
    fn terminal_operation_is_frozen() {
        let store = store_with(&[("svc-a", ServiceStatus::Healthy, 1)]);
        let op = store.create_operation(new_restart("svc-a"));
        store
            .update_operation(&op.id, |o| o.fail("boom", Utc::now()))
            .unwrap()
            .unwrap();
        let failed = store.get_operation(&op.id).unwrap();
        assert_eq!(failed.status, OperationStatus::Failed);

        let mut called = false;
        let err = store
            .update_operation(&op.id, |o| {
                called = true;
                o.status = OperationStatus::Pending;
            })
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::OperationTransition(OperationTransitionError::AlreadyTerminal {
                status: OperationStatus::Failed,
            })
        );
        assert!(!called);
        assert_eq!(store.get_operation(&op.id).unwrap(), failed);
    }

    #[test]
    fn list_operations_is_sorted_snapshot() {
        let store = store_with(&[("svc-a", ServiceStatus::Healthy, 1)]);
        for _ in 0..4 {
            store.create_operation(new_restart("svc-a"));
        }
        let ops = store.list_operations();
        assert_eq!(ops.len(), 4);
        assert!(ops.windows(2).all(|pair| pair[0].id < pair[1].id));
    }
}
