//! Storage collaborators for the dispatch engine.
//!
//! The coordinator never locks anything itself: the request store's
//! compare-and-set is the only serialization point. Schedule, SLA-log and
//! notification writes are secondary and may fail independently.

pub mod memory;
pub mod snapshot;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::context::Role;
use crate::model::{
    AssignmentSlaLog, AssignmentStatus, Notification, ScheduleEntry, ServiceRequest,
    TechnicianFilter, TechnicianProfile, TechnicianRef,
};
use crate::lifecycle::ServiceState;

pub use memory::{MemoryStore, SharedMemoryStore};
pub use snapshot::StoreSnapshot;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The stored request no longer matches the caller's expectation.
    #[error("Write conflict on request {request_id} (expected version {expected_version})")]
    Conflict {
        request_id: String,
        expected_version: u64,
    },

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Key already exists: {0}")]
    AlreadyExists(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Loaded data violates an invariant (e.g. history does not replay).
    #[error("Inconsistent data: {0}")]
    Inconsistent(String),
}

impl StoreError {
    /// Failures that may clear up on their own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Precondition for a conditional request write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteExpectation {
    pub request_id: String,
    pub state: ServiceState,
    pub assignment_status: Option<AssignmentStatus>,
    pub version: u64,
}

impl WriteExpectation {
    /// Expect the request to still look exactly like `request`.
    pub fn of(request: &ServiceRequest) -> Self {
        Self {
            request_id: request.id.clone(),
            state: request.current_state,
            assignment_status: request.assignment_status,
            version: request.version,
        }
    }

    pub fn matches(&self, stored: &ServiceRequest) -> bool {
        stored.id == self.request_id
            && stored.current_state == self.state
            && stored.assignment_status == self.assignment_status
            && stored.version == self.version
    }
}

/// Filter for request listings. Empty filter lists everything.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    /// Any of these identifiers in `assigned_to`.
    pub assigned_to: Option<Vec<String>>,
    pub assignment_status: Option<AssignmentStatus>,
    pub open_only: bool,
}

impl RequestFilter {
    pub fn pending() -> Self {
        Self {
            assignment_status: Some(AssignmentStatus::Pending),
            open_only: true,
            ..Default::default()
        }
    }

    pub fn assigned_to<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assigned_to = Some(identifiers.into_iter().map(Into::into).collect());
        self
    }

    pub fn open(mut self) -> Self {
        self.open_only = true;
        self
    }

    pub fn matches(&self, request: &ServiceRequest) -> bool {
        if self.open_only && !request.is_open() {
            return false;
        }
        if let Some(status) = self.assignment_status {
            if request.assignment_status != Some(status) {
                return false;
            }
        }
        match (&self.assigned_to, &request.assigned_to) {
            (Some(ids), Some(assignee)) => ids.iter().any(|id| id == assignee),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Filter for SLA-log listings.
#[derive(Debug, Clone, Default)]
pub struct SlaLogFilter {
    pub tenant_id: String,
    /// Any of these identifiers as `technician_id`.
    pub technician_ids: Option<Vec<String>>,
    /// Only decisions responded at or after this instant.
    pub since: Option<NaiveDateTime>,
}

impl SlaLogFilter {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    pub fn for_technician<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.technician_ids = Some(identifiers.into_iter().map(Into::into).collect());
        self
    }

    pub fn since(mut self, since: NaiveDateTime) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, log: &AssignmentSlaLog) -> bool {
        log.tenant_id == self.tenant_id
            && self
                .technician_ids
                .as_ref()
                .map_or(true, |ids| ids.iter().any(|id| *id == log.technician_id))
            && self.since.map_or(true, |since| log.responded_at >= since)
    }
}

/// Durable home of service requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Store a new request. Fails with `AlreadyExists` on id reuse.
    async fn insert(&self, request: ServiceRequest) -> StoreResult<ServiceRequest>;

    async fn get(&self, tenant_id: &str, id: &str) -> StoreResult<Option<ServiceRequest>>;

    async fn list(&self, tenant_id: &str, filter: &RequestFilter)
        -> StoreResult<Vec<ServiceRequest>>;

    /// Atomically replace the stored request if it still matches
    /// `expected`, bumping its version. Returns the committed request.
    async fn compare_and_swap(
        &self,
        expected: &WriteExpectation,
        request: ServiceRequest,
    ) -> StoreResult<ServiceRequest>;
}

/// Calendar bookings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Cancel every active entry for the entry's (request, technician) pair,
    /// then insert `entry`.
    async fn upsert(&self, entry: ScheduleEntry) -> StoreResult<ScheduleEntry>;

    /// Cancel active entries for (request, technician). Returns what was
    /// cancelled; an empty result is not an error.
    async fn cancel(
        &self,
        tenant_id: &str,
        request_id: &str,
        technician_id: &str,
        at: NaiveDateTime,
    ) -> StoreResult<Vec<ScheduleEntry>>;

    async fn list_for_request(
        &self,
        tenant_id: &str,
        request_id: &str,
    ) -> StoreResult<Vec<ScheduleEntry>>;
}

/// Write-once acceptance-SLA records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SlaLogStore: Send + Sync {
    /// Append a record. Fails with `AlreadyExists` on id reuse.
    async fn append(&self, log: AssignmentSlaLog) -> StoreResult<()>;

    async fn list(&self, filter: &SlaLogFilter) -> StoreResult<Vec<AssignmentSlaLog>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn append(&self, notification: Notification) -> StoreResult<()>;
}

/// Polled read side of notifications.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationInbox: Send + Sync {
    /// Notifications addressed to any of `identifiers` or `roles`, newest
    /// first.
    async fn list_for(
        &self,
        tenant_id: &str,
        identifiers: &[String],
        roles: &[Role],
    ) -> StoreResult<Vec<Notification>>;

    /// Mark read. Already-read notifications keep their original `read_at`.
    async fn mark_read(
        &self,
        tenant_id: &str,
        id: &str,
        at: NaiveDateTime,
    ) -> StoreResult<Notification>;
}

/// External, read-only technician records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TechnicianDirectory: Send + Sync {
    /// Find a technician by id (or alias) or by email.
    async fn lookup(
        &self,
        tenant_id: &str,
        technician: &TechnicianRef,
    ) -> StoreResult<Option<TechnicianProfile>>;

    async fn list(
        &self,
        tenant_id: &str,
        filter: &TechnicianFilter,
    ) -> StoreResult<Vec<TechnicianProfile>>;
}
