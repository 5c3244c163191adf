//! In-memory implementation of every storage collaborator.
//!
//! Each collection sits behind its own `std::sync::RwLock`. Guards are
//! never held across an `.await`, so the async trait methods complete
//! without yielding while a lock is taken.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::{
    NotificationInbox, NotificationSink, RequestFilter, RequestStore, ScheduleStore, SlaLogFilter,
    SlaLogStore, StoreError, StoreResult, TechnicianDirectory, WriteExpectation,
};
use crate::context::Role;
use crate::model::{
    AssignmentSlaLog, Notification, ScheduleEntry, ServiceRequest, TechnicianFilter,
    TechnicianProfile, TechnicianRef,
};

/// Shared reference to MemoryStore
pub type SharedMemoryStore = Arc<MemoryStore>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    requests: RwLock<BTreeMap<String, ServiceRequest>>,
    schedule: RwLock<Vec<ScheduleEntry>>,
    sla_logs: RwLock<Vec<AssignmentSlaLog>>,
    notifications: RwLock<Vec<Notification>>,
    technicians: RwLock<Vec<TechnicianProfile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedMemoryStore {
        Arc::new(self)
    }

    /// Add or replace a directory record (matched on tenant and id).
    pub fn add_technician(&self, profile: TechnicianProfile) -> StoreResult<()> {
        let mut techs = self
            .technicians
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        techs.retain(|t| !(t.tenant_id == profile.tenant_id && t.id == profile.id));
        techs.push(profile);
        Ok(())
    }

    pub fn technicians(&self) -> StoreResult<Vec<TechnicianProfile>> {
        let techs = self
            .technicians
            .read()
            .map_err(|_| StoreError::LockPoisoned)?;
        Ok(techs.clone())
    }

    pub fn sla_logs(&self) -> StoreResult<Vec<AssignmentSlaLog>> {
        let logs = self.sla_logs.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(logs.clone())
    }

    pub fn schedule_entries(&self) -> StoreResult<Vec<ScheduleEntry>> {
        let entries = self.schedule.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.clone())
    }

    pub fn notifications(&self) -> StoreResult<Vec<Notification>> {
        let notes = self
            .notifications
            .read()
            .map_err(|_| StoreError::LockPoisoned)?;
        Ok(notes.clone())
    }

    pub fn requests(&self) -> StoreResult<Vec<ServiceRequest>> {
        let reqs = self.requests.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(reqs.values().cloned().collect())
    }

    pub(crate) fn from_parts(
        requests: Vec<ServiceRequest>,
        schedule: Vec<ScheduleEntry>,
        sla_logs: Vec<AssignmentSlaLog>,
        notifications: Vec<Notification>,
        technicians: Vec<TechnicianProfile>,
    ) -> Self {
        Self {
            requests: RwLock::new(requests.into_iter().map(|r| (r.id.clone(), r)).collect()),
            schedule: RwLock::new(schedule),
            sla_logs: RwLock::new(sla_logs),
            notifications: RwLock::new(notifications),
            technicians: RwLock::new(technicians),
        }
    }
}

fn find_technician<'a>(
    techs: &'a [TechnicianProfile],
    tenant_id: &str,
    technician: &TechnicianRef,
) -> Option<&'a TechnicianProfile> {
    let mut in_tenant = techs.iter().filter(|t| t.tenant_id == tenant_id);
    match technician {
        TechnicianRef::Id(id) => {
            in_tenant.find(|t| t.id == *id || t.aliases.iter().any(|a| a == id))
        }
        TechnicianRef::Email(email) => in_tenant.find(|t| {
            t.email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(email))
        }),
    }
}

// ============================================================================
// Requests
// ============================================================================

#[async_trait]
impl RequestStore for MemoryStore {
    async fn insert(&self, request: ServiceRequest) -> StoreResult<ServiceRequest> {
        let mut reqs = self.requests.write().map_err(|_| StoreError::LockPoisoned)?;
        if reqs.contains_key(&request.id) {
            return Err(StoreError::AlreadyExists(request.id));
        }
        reqs.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    async fn get(&self, tenant_id: &str, id: &str) -> StoreResult<Option<ServiceRequest>> {
        let reqs = self.requests.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(reqs.get(id).filter(|r| r.tenant_id == tenant_id).cloned())
    }

    async fn list(
        &self,
        tenant_id: &str,
        filter: &RequestFilter,
    ) -> StoreResult<Vec<ServiceRequest>> {
        let reqs = self.requests.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut found: Vec<ServiceRequest> = reqs
            .values()
            .filter(|r| r.tenant_id == tenant_id && filter.matches(r))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn compare_and_swap(
        &self,
        expected: &WriteExpectation,
        mut request: ServiceRequest,
    ) -> StoreResult<ServiceRequest> {
        let mut reqs = self.requests.write().map_err(|_| StoreError::LockPoisoned)?;
        let stored = reqs
            .get_mut(&expected.request_id)
            .ok_or_else(|| StoreError::NotFound(expected.request_id.clone()))?;

        if !expected.matches(stored) || stored.tenant_id != request.tenant_id {
            return Err(StoreError::Conflict {
                request_id: expected.request_id.clone(),
                expected_version: expected.version,
            });
        }

        request.version = stored.version + 1;
        *stored = request.clone();
        Ok(request)
    }
}

// ============================================================================
// Schedule
// ============================================================================

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn upsert(&self, entry: ScheduleEntry) -> StoreResult<ScheduleEntry> {
        let mut entries = self.schedule.write().map_err(|_| StoreError::LockPoisoned)?;
        for existing in entries.iter_mut().filter(|e| {
            e.tenant_id == entry.tenant_id
                && e.is_active()
                && e.belongs_to(&entry.request_id, &entry.technician_id)
        }) {
            existing.cancel(entry.created_at);
        }
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn cancel(
        &self,
        tenant_id: &str,
        request_id: &str,
        technician_id: &str,
        at: NaiveDateTime,
    ) -> StoreResult<Vec<ScheduleEntry>> {
        let mut entries = self.schedule.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut cancelled = Vec::new();
        for entry in entries.iter_mut().filter(|e| {
            e.tenant_id == tenant_id && e.is_active() && e.belongs_to(request_id, technician_id)
        }) {
            entry.cancel(at);
            cancelled.push(entry.clone());
        }
        Ok(cancelled)
    }

    async fn list_for_request(
        &self,
        tenant_id: &str,
        request_id: &str,
    ) -> StoreResult<Vec<ScheduleEntry>> {
        let entries = self.schedule.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.request_id == request_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// SLA logs
// ============================================================================

#[async_trait]
impl SlaLogStore for MemoryStore {
    async fn append(&self, log: AssignmentSlaLog) -> StoreResult<()> {
        let mut logs = self.sla_logs.write().map_err(|_| StoreError::LockPoisoned)?;
        if logs.iter().any(|l| l.id == log.id) {
            return Err(StoreError::AlreadyExists(log.id));
        }
        logs.push(log);
        Ok(())
    }

    async fn list(&self, filter: &SlaLogFilter) -> StoreResult<Vec<AssignmentSlaLog>> {
        let logs = self.sla_logs.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(logs.iter().filter(|l| filter.matches(l)).cloned().collect())
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[async_trait]
impl NotificationSink for MemoryStore {
    async fn append(&self, notification: Notification) -> StoreResult<()> {
        let mut notes = self
            .notifications
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        notes.push(notification);
        Ok(())
    }
}

#[async_trait]
impl NotificationInbox for MemoryStore {
    async fn list_for(
        &self,
        tenant_id: &str,
        identifiers: &[String],
        roles: &[Role],
    ) -> StoreResult<Vec<Notification>> {
        let notes = self
            .notifications
            .read()
            .map_err(|_| StoreError::LockPoisoned)?;
        let mut found: Vec<Notification> = notes
            .iter()
            .filter(|n| {
                n.tenant_id == tenant_id
                    && n.is_addressed_to(identifiers.iter().map(String::as_str), roles)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn mark_read(
        &self,
        tenant_id: &str,
        id: &str,
        at: NaiveDateTime,
    ) -> StoreResult<Notification> {
        let mut notes = self
            .notifications
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;
        let note = notes
            .iter_mut()
            .find(|n| n.tenant_id == tenant_id && n.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if note.read_at.is_none() {
            note.read_at = Some(at);
        }
        Ok(note.clone())
    }
}

// ============================================================================
// Technician directory
// ============================================================================

#[async_trait]
impl TechnicianDirectory for MemoryStore {
    async fn lookup(
        &self,
        tenant_id: &str,
        technician: &TechnicianRef,
    ) -> StoreResult<Option<TechnicianProfile>> {
        let techs = self
            .technicians
            .read()
            .map_err(|_| StoreError::LockPoisoned)?;
        Ok(find_technician(&techs, tenant_id, technician).cloned())
    }

    async fn list(
        &self,
        tenant_id: &str,
        filter: &TechnicianFilter,
    ) -> StoreResult<Vec<TechnicianProfile>> {
        let techs = self
            .technicians
            .read()
            .map_err(|_| StoreError::LockPoisoned)?;
        let mut found: Vec<TechnicianProfile> = techs
            .iter()
            .filter(|t| t.tenant_id == tenant_id && filter.matches(t))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewServiceRequest, ScheduleSlot, ScheduleStatus};
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn request(tenant: &str) -> ServiceRequest {
        ServiceRequest::create(tenant, NewServiceRequest::new("Printer jam"), "desk", now())
    }

    #[tokio::test]
    async fn test_compare_and_swap_bumps_version() {
        let store = MemoryStore::new();
        let req = store.insert(request("acme")).await.unwrap();

        let mut changed = req.clone();
        changed.title = "Printer jam (tray 2)".into();
        let committed = store
            .compare_and_swap(&WriteExpectation::of(&req), changed)
            .await
            .unwrap();
        assert_eq!(committed.version, 1);

        // Stale expectation loses.
        let err = store
            .compare_and_swap(&WriteExpectation::of(&req), req.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let stored = store.get("acme", &req.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Printer jam (tray 2)");
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let store = MemoryStore::new();
        let req = store.insert(request("acme")).await.unwrap();
        assert!(store.get("globex", &req.id).await.unwrap().is_none());
        assert!(RequestStore::list(&store, "globex", &RequestFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemoryStore::new();
        let req = store.insert(request("acme")).await.unwrap();
        assert!(matches!(
            store.insert(req).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_cancels_previous_entry() {
        let store = MemoryStore::new();
        let first = ScheduleEntry::new(
            "acme",
            "r1",
            "tech-a",
            &ScheduleSlot::at(now()),
            ScheduleStatus::Scheduled,
            now(),
        );
        store.upsert(first).await.unwrap();
        let second = ScheduleEntry::new(
            "acme",
            "r1",
            "tech-a",
            &ScheduleSlot::at(now() + chrono::Duration::hours(2)),
            ScheduleStatus::Accepted,
            now(),
        );
        store.upsert(second).await.unwrap();

        let entries = store.list_for_request("acme", "r1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, ScheduleStatus::Cancelled);
        assert_eq!(entries[1].status, ScheduleStatus::Accepted);
        assert_eq!(entries.iter().filter(|e| e.is_active()).count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_without_entries_is_empty() {
        let store = MemoryStore::new();
        let cancelled = store.cancel("acme", "r1", "tech-a", now()).await.unwrap();
        assert!(cancelled.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_by_alias_and_email() {
        let store = MemoryStore::new();
        store
            .add_technician(
                TechnicianProfile::new("acme", "tech-a", "Asha")
                    .with_email("Asha@Acme.test")
                    .with_alias("u-1001"),
            )
            .unwrap();

        let by_alias = store
            .lookup("acme", &TechnicianRef::Id("u-1001".into()))
            .await
            .unwrap();
        assert_eq!(by_alias.unwrap().id, "tech-a");

        let by_email = store
            .lookup("acme", &TechnicianRef::Email("asha@acme.test".into()))
            .await
            .unwrap();
        assert_eq!(by_email.unwrap().id, "tech-a");

        assert!(store
            .lookup("globex", &TechnicianRef::Id("tech-a".into()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_mark_read_keeps_first_timestamp() {
        let store = MemoryStore::new();
        let note = Notification::new(
            "acme",
            "r1",
            "SR-20260302-ABCDEF",
            crate::model::NotificationKind::AssignmentCreated,
            "Assigned",
            "body",
            now(),
        )
        .to_user("tech-a");
        let id = note.id.clone();
        NotificationSink::append(&store, note).await.unwrap();

        let first = store.mark_read("acme", &id, now()).await.unwrap();
        let later = now() + chrono::Duration::hours(1);
        let second = store.mark_read("acme", &id, later).await.unwrap();
        assert_eq!(first.read_at, second.read_at);

        let inbox = store
            .list_for("acme", &["tech-a".to_string()], &[Role::Technician])
            .await
            .unwrap();
        assert_eq!(inbox.len(), 1);
    }
}
