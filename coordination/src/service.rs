//! Dispatch service: the operation contracts, addressed by request id.
//!
//! Resolves the caller's canonical identity, enforces role checks, and
//! delegates to the coordinator, advisor and monitor.

use std::sync::Arc;

use chrono::NaiveDateTime;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::advisor::{Candidate, ReassignmentAdvisor};
use crate::assignment::AssignmentCoordinator;
use crate::config::DispatchConfig;
use crate::context::OperationContext;
use crate::error::{DispatchError, DispatchResult, EntityKind};
use crate::escalation::{EscalationItem, EscalationMonitor};
use crate::identity::{CanonicalIdentity, IdentityResolver};
use crate::lifecycle::{self, ServiceState, TransitionOption, TransitionPayload};
use crate::model::{
    DeclineReason, NewServiceRequest, Notification, Priority, ScheduleSlot, ServiceRequest,
    SlaStats, TechnicianProfile,
};
use crate::operations::Operation;
use crate::resilience::DegradedResponse;
use crate::store::{
    NotificationInbox, NotificationSink, RequestFilter, RequestStore, ScheduleStore,
    SharedMemoryStore, SlaLogFilter, SlaLogStore, StoreError, TechnicianDirectory,
};

/// Shared reference to DispatchService
pub type SharedDispatchService = Arc<DispatchService>;

/// External collaborators the service is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub requests: Arc<dyn RequestStore>,
    pub schedule: Arc<dyn ScheduleStore>,
    pub sla_logs: Arc<dyn SlaLogStore>,
    pub notifications: Arc<dyn NotificationSink>,
    pub inbox: Arc<dyn NotificationInbox>,
    pub directory: Arc<dyn TechnicianDirectory>,
}

impl Collaborators {
    /// Every collaborator backed by one in-memory store.
    pub fn memory(store: &SharedMemoryStore) -> Self {
        Self {
            requests: store.clone(),
            schedule: store.clone(),
            sla_logs: store.clone(),
            notifications: store.clone(),
            inbox: store.clone(),
            directory: store.clone(),
        }
    }
}

/// A pending assignment as shown to a technician.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PendingAssignment {
    pub request_id: String,
    pub ticket_code: String,
    pub title: String,
    pub priority: Priority,
    pub assigned_to: String,
    pub assigned_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<NaiveDateTime>,
    pub waiting_minutes: i64,
    /// Already past the acceptance SLA.
    pub overdue: bool,
}

pub struct DispatchService {
    requests: Arc<dyn RequestStore>,
    sla_logs: Arc<dyn SlaLogStore>,
    inbox: Arc<dyn NotificationInbox>,
    identity: IdentityResolver,
    coordinator: AssignmentCoordinator,
    advisor: ReassignmentAdvisor,
    monitor: EscalationMonitor,
    config: DispatchConfig,
}

impl DispatchService {
    pub fn new(collaborators: Collaborators, config: DispatchConfig) -> Self {
        let Collaborators {
            requests,
            schedule,
            sla_logs,
            notifications,
            inbox,
            directory,
        } = collaborators;

        let coordinator = AssignmentCoordinator::new(
            requests.clone(),
            schedule,
            sla_logs.clone(),
            notifications,
        )
        .with_decline_notify_roles(config.decline_notify_roles.clone());
        let advisor = ReassignmentAdvisor::new(
            requests.clone(),
            directory.clone(),
            sla_logs.clone(),
            config.clone(),
        );
        let monitor = EscalationMonitor::new(requests.clone(), config.acceptance_sla());

        Self {
            requests,
            sla_logs,
            inbox,
            identity: IdentityResolver::new(directory),
            coordinator,
            advisor,
            monitor,
            config,
        }
    }

    pub fn in_memory(store: &SharedMemoryStore, config: DispatchConfig) -> Self {
        Self::new(Collaborators::memory(store), config)
    }

    /// Create a shared reference to this service
    pub fn shared(self) -> SharedDispatchService {
        Arc::new(self)
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    // =========================================================================
    // Requests
    // =========================================================================

    pub async fn create_request(
        &self,
        ctx: &OperationContext,
        new: NewServiceRequest,
    ) -> DispatchResult<ServiceRequest> {
        require_privileged(ctx, "create requests")?;
        if new.title.trim().is_empty() {
            return Err(DispatchError::InvalidInput(
                "title must not be empty".to_string(),
            ));
        }
        if let Some(starts_at) = new.scheduled_at {
            ScheduleSlot {
                starts_at,
                ends_at: new.scheduled_end_at,
                notes: None,
            }
            .validate()?;
        } else if new.scheduled_end_at.is_some() {
            return Err(DispatchError::InvalidSchedule {
                reason: "end given without a start".to_string(),
            });
        }

        let request = ServiceRequest::create(&ctx.tenant_id, new, &ctx.actor.id, ctx.now());
        let request = self.requests.insert(request).await?;
        info!(
            request_id = %request.id,
            ticket_code = %request.ticket_code,
            actor = %ctx.actor.id,
            "Request created"
        );
        Ok(request)
    }

    pub async fn get_request(
        &self,
        ctx: &OperationContext,
        request_id: &str,
    ) -> DispatchResult<ServiceRequest> {
        self.requests
            .get(&ctx.tenant_id, request_id)
            .await?
            .ok_or_else(|| DispatchError::request_not_found(request_id))
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    pub async fn assign(
        &self,
        ctx: &OperationContext,
        request_id: &str,
        technician_id: &str,
        schedule: Option<ScheduleSlot>,
    ) -> DispatchResult<ServiceRequest> {
        require_privileged(ctx, "assign requests")?;
        let technician = self.active_technician(ctx, technician_id).await?;
        self.coordinator
            .assign(ctx, request_id, &technician, schedule)
            .await
    }

    /// Pending assignments for `technician` (default: the caller), oldest
    /// first.
    pub async fn list_pending(
        &self,
        ctx: &OperationContext,
        technician: Option<&str>,
    ) -> DispatchResult<Vec<PendingAssignment>> {
        let identity = self.scope(ctx, technician, "list another technician's work").await?;
        let now = ctx.now();
        let sla = self.config.acceptance_sla();

        let filter = RequestFilter::pending().assigned_to(identity.identifier_list());
        let mut pending: Vec<PendingAssignment> = self
            .requests
            .list(&ctx.tenant_id, &filter)
            .await?
            .into_iter()
            .filter(|r| r.current_state == ServiceState::Assigned)
            .filter_map(|r| {
                let assigned_at = r.assigned_at?;
                let waiting = now - assigned_at;
                Some(PendingAssignment {
                    request_id: r.id,
                    ticket_code: r.ticket_code,
                    title: r.title,
                    priority: r.priority,
                    assigned_to: r.assigned_to.unwrap_or_default(),
                    assigned_at,
                    scheduled_at: r.scheduled_at,
                    waiting_minutes: waiting.num_minutes(),
                    overdue: waiting >= sla,
                })
            })
            .collect();
        pending.sort_by(|a, b| {
            a.assigned_at
                .cmp(&b.assigned_at)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        Ok(pending)
    }

    pub async fn accept(
        &self,
        ctx: &OperationContext,
        request_id: &str,
        proposed: Option<ScheduleSlot>,
    ) -> DispatchResult<ServiceRequest> {
        let identity = self.identity.resolve_actor(&ctx.tenant_id, &ctx.actor).await?;
        self.coordinator
            .accept(ctx, request_id, &identity, proposed)
            .await
    }

    pub async fn decline(
        &self,
        ctx: &OperationContext,
        request_id: &str,
        reason: DeclineReason,
        detail: Option<String>,
    ) -> DispatchResult<ServiceRequest> {
        let identity = self.identity.resolve_actor(&ctx.tenant_id, &ctx.actor).await?;
        self.coordinator
            .decline(ctx, request_id, &identity, reason, detail)
            .await
    }

    pub async fn reschedule(
        &self,
        ctx: &OperationContext,
        request_id: &str,
        schedule: ScheduleSlot,
    ) -> DispatchResult<ServiceRequest> {
        let identity = self.identity.resolve_actor(&ctx.tenant_id, &ctx.actor).await?;
        self.coordinator
            .reschedule(ctx, request_id, &identity, schedule)
            .await
    }

    pub async fn suggest_reassignment(
        &self,
        ctx: &OperationContext,
        request_id: &str,
    ) -> DispatchResult<DegradedResponse<Vec<Candidate>>> {
        require_privileged(ctx, "view reassignment suggestions")?;
        let request = self.get_request(ctx, request_id).await?;
        Ok(self.advisor.suggest(ctx, &request, &[]).await)
    }

    pub async fn reassign(
        &self,
        ctx: &OperationContext,
        request_id: &str,
        technician_id: &str,
        schedule: Option<ScheduleSlot>,
    ) -> DispatchResult<ServiceRequest> {
        require_privileged(ctx, "reassign requests")?;
        let technician = self.active_technician(ctx, technician_id).await?;
        self.coordinator
            .reassign(ctx, request_id, &technician, schedule)
            .await
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    /// Acceptance statistics, tenant-wide or for one technician.
    ///
    /// Technicians may only see their own numbers; `None` means "me" for
    /// them and "everyone" for privileged callers.
    pub async fn sla_stats(
        &self,
        ctx: &OperationContext,
        technician: Option<&str>,
    ) -> DispatchResult<SlaStats> {
        let mut filter = SlaLogFilter::tenant(&ctx.tenant_id);
        if technician.is_some() || !ctx.actor.is_privileged() {
            let identity = self.scope(ctx, technician, "view another technician's stats").await?;
            filter = filter.for_technician(identity.identifier_list());
        }
        let logs = self.sla_logs.list(&filter).await?;
        Ok(SlaStats::from_logs(&logs))
    }

    pub async fn check_escalations(
        &self,
        ctx: &OperationContext,
    ) -> DispatchResult<DegradedResponse<Vec<EscalationItem>>> {
        require_privileged(ctx, "view escalations")?;
        Ok(self.monitor.check_escalations(ctx).await)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub async fn available_transitions(
        &self,
        ctx: &OperationContext,
        request_id: &str,
    ) -> DispatchResult<Vec<TransitionOption>> {
        let request = self.get_request(ctx, request_id).await?;
        Ok(lifecycle::available_transitions(&request))
    }

    /// Generic transition. Allowed for privileged callers and for the
    /// technician currently assigned to the request.
    pub async fn transition(
        &self,
        ctx: &OperationContext,
        request_id: &str,
        target: ServiceState,
        payload: &TransitionPayload,
    ) -> DispatchResult<ServiceRequest> {
        if !ctx.actor.is_privileged() {
            let request = self.get_request(ctx, request_id).await?;
            let identity = self.identity.resolve_actor(&ctx.tenant_id, &ctx.actor).await?;
            let is_assignee = request
                .assigned_to
                .as_deref()
                .is_some_and(|assignee| identity.matches(assignee));
            if !is_assignee {
                return Err(DispatchError::Forbidden {
                    actor: ctx.actor.id.clone(),
                    operation: "transition a request assigned to someone else",
                });
            }
        }
        self.coordinator
            .transition(ctx, request_id, target, payload)
            .await
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Notifications addressed to the caller or any of the caller's roles.
    pub async fn notifications(
        &self,
        ctx: &OperationContext,
        unread_only: bool,
    ) -> DispatchResult<Vec<Notification>> {
        let identity = self.identity.resolve_actor(&ctx.tenant_id, &ctx.actor).await?;
        let mut found = self
            .inbox
            .list_for(&ctx.tenant_id, &identity.identifier_list(), &ctx.actor.roles)
            .await?;
        if unread_only {
            found.retain(|n| !n.is_read());
        }
        Ok(found)
    }

    pub async fn mark_notification_read(
        &self,
        ctx: &OperationContext,
        notification_id: &str,
    ) -> DispatchResult<Notification> {
        let not_found = || DispatchError::NotFound {
            kind: EntityKind::Notification,
            id: notification_id.to_string(),
        };

        let visible = self.notifications(ctx, false).await?;
        if !visible.iter().any(|n| n.id == notification_id) {
            return Err(not_found());
        }
        match self
            .inbox
            .mark_read(&ctx.tenant_id, notification_id, ctx.now())
            .await
        {
            Ok(notification) => Ok(notification),
            Err(StoreError::NotFound(_)) => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // RPC entry point
    // =========================================================================

    /// Run one [`Operation`] and serialize its result.
    pub async fn execute(
        &self,
        ctx: &OperationContext,
        operation: Operation,
    ) -> DispatchResult<serde_json::Value> {
        tracing::debug!(op = operation.name(), actor = %ctx.actor.id, "Executing operation");
        if operation.is_privileged() {
            require_privileged(ctx, operation.name())?;
        }
        match operation {
            Operation::CreateRequest(new) => to_json(&self.create_request(ctx, new).await?),
            Operation::GetRequest(r) => to_json(&self.get_request(ctx, &r.request_id).await?),
            Operation::Assign(p) => to_json(
                &self
                    .assign(ctx, &p.request_id, &p.technician_id, p.schedule)
                    .await?,
            ),
            Operation::ListPending(p) => {
                to_json(&self.list_pending(ctx, p.technician.as_deref()).await?)
            }
            Operation::Accept(p) => to_json(&self.accept(ctx, &p.request_id, p.proposed).await?),
            Operation::Decline(p) => to_json(
                &self
                    .decline(ctx, &p.request_id, p.reason, p.detail)
                    .await?,
            ),
            Operation::Reschedule(p) => {
                to_json(&self.reschedule(ctx, &p.request_id, p.schedule).await?)
            }
            Operation::SuggestReassignment(r) => {
                to_json(&self.suggest_reassignment(ctx, &r.request_id).await?)
            }
            Operation::Reassign(p) => to_json(
                &self
                    .reassign(ctx, &p.request_id, &p.technician_id, p.schedule)
                    .await?,
            ),
            Operation::SlaStats(p) => to_json(&self.sla_stats(ctx, p.technician.as_deref()).await?),
            Operation::CheckEscalations => to_json(&self.check_escalations(ctx).await?),
            Operation::AvailableTransitions(r) => {
                to_json(&self.available_transitions(ctx, &r.request_id).await?)
            }
            Operation::Transition(p) => to_json(
                &self
                    .transition(ctx, &p.request_id, p.target, &p.payload)
                    .await?,
            ),
            Operation::Notifications(p) => to_json(&self.notifications(ctx, p.unread_only).await?),
            Operation::MarkNotificationRead(r) => {
                to_json(&self.mark_notification_read(ctx, &r.notification_id).await?)
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn active_technician(
        &self,
        ctx: &OperationContext,
        technician_id: &str,
    ) -> DispatchResult<TechnicianProfile> {
        let technician = self
            .identity
            .resolve_technician(&ctx.tenant_id, technician_id)
            .await?;
        if !technician.active {
            return Err(DispatchError::InvalidInput(format!(
                "technician {} is inactive",
                technician.id
            )));
        }
        Ok(technician)
    }

    /// Identity whose data the caller asked for. Non-privileged callers may
    /// only ask about themselves.
    async fn scope(
        &self,
        ctx: &OperationContext,
        technician: Option<&str>,
        operation: &'static str,
    ) -> DispatchResult<CanonicalIdentity> {
        let me = self.identity.resolve_actor(&ctx.tenant_id, &ctx.actor).await?;
        let Some(raw) = technician else {
            return Ok(me);
        };
        if me.matches(raw.trim()) {
            return Ok(me);
        }
        if !ctx.actor.is_privileged() {
            return Err(DispatchError::Forbidden {
                actor: ctx.actor.id.clone(),
                operation,
            });
        }
        self.identity.resolve(&ctx.tenant_id, raw).await
    }
}

fn require_privileged(ctx: &OperationContext, operation: &'static str) -> DispatchResult<()> {
    if ctx.actor.is_privileged() {
        Ok(())
    } else {
        Err(DispatchError::Forbidden {
            actor: ctx.actor.id.clone(),
            operation,
        })
    }
}

fn to_json<T: Serialize>(value: &T) -> DispatchResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| DispatchError::Store(StoreError::Serialization(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Actor, FixedClock};
    use crate::operations::{AssignParams, NotificationsParams, RequestRef};
    use crate::store::MemoryStore;
    use chrono::{Duration, NaiveDate};

    fn nine() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn setup() -> (DispatchService, Arc<FixedClock>, OperationContext) {
        let store = MemoryStore::new().shared();
        store
            .add_technician(
                TechnicianProfile::new("acme", "tech-a", "Asha").with_email("asha@acme.test"),
            )
            .unwrap();
        let mut retired = TechnicianProfile::new("acme", "tech-r", "Ravi");
        retired.active = false;
        store.add_technician(retired).unwrap();

        let clock = Arc::new(FixedClock::new(nine()));
        let desk = OperationContext::new("acme", Actor::dispatcher("desk"), clock.clone());
        (
            DispatchService::in_memory(&store, DispatchConfig::builtin()),
            clock,
            desk,
        )
    }

    #[tokio::test]
    async fn test_technician_cannot_assign() {
        let (service, _, desk) = setup();
        let req = service
            .create_request(&desk, NewServiceRequest::new("x"))
            .await
            .unwrap();
        let tech = desk.as_actor(Actor::technician("tech-a"));
        let err = service
            .assign(&tech, &req.id, "tech-a", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_assign_inactive_technician_rejected() {
        let (service, _, desk) = setup();
        let req = service
            .create_request(&desk, NewServiceRequest::new("x"))
            .await
            .unwrap();
        let err = service
            .assign(&desk, &req.id, "tech-r", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_blank_title_rejected() {
        let (service, _, desk) = setup();
        let err = service
            .create_request(&desk, NewServiceRequest::new("  "))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_technician_accepts_via_email_identity() {
        let (service, clock, desk) = setup();
        let req = service
            .create_request(&desk, NewServiceRequest::new("x"))
            .await
            .unwrap();
        service
            .assign(&desk, &req.id, "asha@acme.test", None)
            .await
            .unwrap();

        let sso = desk.as_actor(Actor::technician("sso|77").with_email("asha@acme.test"));
        let pending = service.list_pending(&sso, None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].assigned_to, "tech-a");

        clock.advance(Duration::minutes(5));
        let accepted = service.accept(&sso, &req.id, None).await.unwrap();
        assert_eq!(accepted.current_state, ServiceState::Accepted);

        let stats = service.sla_stats(&sso, None).await.unwrap();
        assert_eq!(stats.accepted, 1);
    }

    #[tokio::test]
    async fn test_pending_marks_overdue() {
        let (service, clock, desk) = setup();
        let req = service
            .create_request(&desk, NewServiceRequest::new("x"))
            .await
            .unwrap();
        service.assign(&desk, &req.id, "tech-a", None).await.unwrap();

        clock.advance(Duration::hours(5));
        let pending = service.list_pending(&desk, Some("tech-a")).await.unwrap();
        assert!(pending[0].overdue);
        assert_eq!(pending[0].waiting_minutes, 300);
    }

    #[tokio::test]
    async fn test_technician_cannot_view_others() {
        let (service, _, desk) = setup();
        let other = desk.as_actor(Actor::technician("tech-b"));
        let err = service
            .list_pending(&other, Some("tech-a"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
        assert_eq!(
            service.sla_stats(&other, Some("tech-a")).await.unwrap_err().code(),
            "FORBIDDEN"
        );
    }

    #[tokio::test]
    async fn test_transition_requires_assignee_or_privilege() {
        let (service, _, desk) = setup();
        let req = service
            .create_request(&desk, NewServiceRequest::new("x"))
            .await
            .unwrap();
        service.assign(&desk, &req.id, "tech-a", None).await.unwrap();
        let tech = desk.as_actor(Actor::technician("tech-a"));
        service.accept(&tech, &req.id, None).await.unwrap();

        let stranger = desk.as_actor(Actor::technician("tech-b"));
        let err = service
            .transition(
                &stranger,
                &req.id,
                ServiceState::VisitInProgress,
                &TransitionPayload::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let started = service
            .transition(
                &tech,
                &req.id,
                ServiceState::VisitInProgress,
                &TransitionPayload::default(),
            )
            .await
            .unwrap();
        assert_eq!(started.current_state, ServiceState::VisitInProgress);
    }

    #[tokio::test]
    async fn test_mark_read_only_own_notifications() {
        let (service, _, desk) = setup();
        let req = service
            .create_request(&desk, NewServiceRequest::new("x"))
            .await
            .unwrap();
        service.assign(&desk, &req.id, "tech-a", None).await.unwrap();

        let tech = desk.as_actor(Actor::technician("tech-a"));
        let inbox = service.notifications(&tech, true).await.unwrap();
        assert_eq!(inbox.len(), 1);

        // Dispatch is not a recipient of the assignment notice.
        let err = service
            .mark_notification_read(&desk, &inbox[0].id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let read = service
            .mark_notification_read(&tech, &inbox[0].id)
            .await
            .unwrap();
        assert!(read.is_read());
        assert!(service.notifications(&tech, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_dispatches_operations() {
        let (service, _, desk) = setup();
        let created = service
            .execute(&desk, Operation::CreateRequest(NewServiceRequest::new("x")))
            .await
            .unwrap();
        let request_id = created["id"].as_str().unwrap().to_string();

        let assigned = service
            .execute(
                &desk,
                Operation::Assign(AssignParams {
                    request_id: request_id.clone(),
                    technician_id: "tech-a".into(),
                    schedule: None,
                }),
            )
            .await
            .unwrap();
        assert_eq!(assigned["current_state"], "ASSIGNED");

        let options = service
            .execute(
                &desk,
                Operation::AvailableTransitions(RequestRef { request_id }),
            )
            .await
            .unwrap();
        assert_eq!(options.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_execute_gates_privileged_operations() {
        let (service, _, desk) = setup();
        let tech = desk.as_actor(Actor::technician("tech-a"));

        for op in [
            Operation::CreateRequest(NewServiceRequest::new("x")),
            Operation::CheckEscalations,
            Operation::SuggestReassignment(RequestRef {
                request_id: "missing".into(),
            }),
        ] {
            let name = op.name();
            let err = service.execute(&tech, op).await.unwrap_err();
            assert!(
                matches!(err, DispatchError::Forbidden { operation, .. } if operation == name),
                "{name}: {err}"
            );
        }

        let own = service
            .execute(
                &tech,
                Operation::Notifications(NotificationsParams { unread_only: false }),
            )
            .await
            .unwrap();
        assert!(own.as_array().unwrap().is_empty());
    }
}
