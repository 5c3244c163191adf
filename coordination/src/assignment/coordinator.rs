//! Assignment coordinator: the accept/decline/reschedule/reassign protocol.
//!
//! Every mutation follows the same shape:
//!
//! ```text
//! read request ─► validate + mutate copy ─► compare-and-set ─┬─► secondary writes (best effort)
//!                                                            └─► lost race: re-read and explain
//! ```
//!
//! Secondary writes (schedule, SLA log, notification) happen after the
//! request commit and never fail the operation.

use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, error, info};

use crate::context::{OperationContext, Role};
use crate::error::{DispatchError, DispatchResult};
use crate::identity::CanonicalIdentity;
use crate::lifecycle::{self, ServiceState, TransitionPayload};
use crate::model::{
    AssignmentSlaLog, AssignmentStatus, DeclineReason, Notification, NotificationKind,
    ScheduleEntry, ScheduleSlot, ScheduleStatus, ServiceRequest, TechnicianProfile,
};
use crate::store::{
    NotificationSink, RequestStore, ScheduleStore, SlaLogStore, StoreError, StoreResult,
    WriteExpectation,
};

/// Shared reference to AssignmentCoordinator
pub type SharedAssignmentCoordinator = Arc<AssignmentCoordinator>;

/// What a write assumed about the stored request, used to explain a lost
/// compare-and-set race.
#[derive(Debug, Clone, Copy)]
enum Guard {
    /// The assignment had to be pending.
    PendingAssignment { target: ServiceState },
    /// `target` had to be reachable from the state that was read.
    Reachable { target: ServiceState },
    /// Any non-terminal state was acceptable.
    NonTerminal { target: ServiceState },
}

pub struct AssignmentCoordinator {
    requests: Arc<dyn RequestStore>,
    schedule: Arc<dyn ScheduleStore>,
    sla_logs: Arc<dyn SlaLogStore>,
    notifications: Arc<dyn NotificationSink>,
    decline_notify_roles: Vec<Role>,
}

impl AssignmentCoordinator {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        schedule: Arc<dyn ScheduleStore>,
        sla_logs: Arc<dyn SlaLogStore>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            requests,
            schedule,
            sla_logs,
            notifications,
            decline_notify_roles: vec![Role::Dispatcher, Role::BackOffice],
        }
    }

    pub fn with_decline_notify_roles(mut self, roles: Vec<Role>) -> Self {
        self.decline_notify_roles = roles;
        self
    }

    /// Create a shared reference to this coordinator
    pub fn shared(self) -> SharedAssignmentCoordinator {
        Arc::new(self)
    }

    // =========================================================================
    // Assignment operations
    // =========================================================================

    /// Offer a `CREATED` or `DECLINED` request to `technician`.
    pub async fn assign(
        &self,
        ctx: &OperationContext,
        request_id: &str,
        technician: &TechnicianProfile,
        slot: Option<ScheduleSlot>,
    ) -> DispatchResult<ServiceRequest> {
        if let Some(slot) = &slot {
            slot.validate()?;
        }

        let before = self.fetch(ctx, request_id).await?;
        if !matches!(
            before.current_state,
            ServiceState::Created | ServiceState::Declined
        ) {
            return Err(DispatchError::InvalidTransition {
                from: before.current_state,
                to: ServiceState::Assigned,
            });
        }

        let now = ctx.now();
        let mut next = before.clone();
        next.begin_assignment(&technician.id, now);
        if let Some(slot) = &slot {
            next.scheduled_at = Some(slot.starts_at);
            next.scheduled_end_at = slot.ends_at;
        }
        lifecycle::transition(
            &mut next,
            ServiceState::Assigned,
            &ctx.actor.id,
            &TransitionPayload::default().with_reason(format!("assigned to {}", technician.id)),
            now,
        )?;

        let committed = self
            .commit(
                ctx,
                &before,
                next,
                Guard::Reachable {
                    target: ServiceState::Assigned,
                },
            )
            .await?;

        info!(
            request_id = %committed.id,
            technician_id = %technician.id,
            actor = %ctx.actor.id,
            "Request assigned"
        );

        self.book_offer(ctx, &committed, &technician.id, slot, now)
            .await;
        self.notify_assignee(ctx, &committed, technician, now).await;

        Ok(committed)
    }

    /// Accept the pending assignment, optionally moving the visit.
    pub async fn accept(
        &self,
        ctx: &OperationContext,
        request_id: &str,
        technician: &CanonicalIdentity,
        proposed: Option<ScheduleSlot>,
    ) -> DispatchResult<ServiceRequest> {
        self.respond_accept(ctx, request_id, technician, proposed, "Assignment accepted")
            .await
    }

    /// Accept with a mandatory new time. The existing booking is always
    /// cancelled and a fresh one inserted.
    pub async fn reschedule(
        &self,
        ctx: &OperationContext,
        request_id: &str,
        technician: &CanonicalIdentity,
        slot: ScheduleSlot,
    ) -> DispatchResult<ServiceRequest> {
        self.respond_accept(
            ctx,
            request_id,
            technician,
            Some(slot),
            "Assignment accepted with new schedule",
        )
        .await
    }

    async fn respond_accept(
        &self,
        ctx: &OperationContext,
        request_id: &str,
        technician: &CanonicalIdentity,
        proposed: Option<ScheduleSlot>,
        message: &'static str,
    ) -> DispatchResult<ServiceRequest> {
        let before = self.fetch(ctx, request_id).await?;
        ensure_pending(&before, ServiceState::Accepted)?;
        let assignee = ensure_responder(ctx, &before, technician)?;

        let now = ctx.now();
        let mut next = before.clone();

        let moved = match &proposed {
            Some(proposed) => {
                let mut slot = ScheduleSlot::moved(
                    proposed.starts_at,
                    proposed.ends_at,
                    before.scheduled_at,
                    before.scheduled_end_at,
                );
                slot.notes = proposed.notes.clone();
                slot.validate()?;
                next.scheduled_at = Some(slot.starts_at);
                next.scheduled_end_at = slot.ends_at;
                Some(slot)
            }
            None => None,
        };

        next.assignment_status = Some(AssignmentStatus::Accepted);
        next.responded_at = Some(now);
        let payload = match &moved {
            Some(slot) => {
                TransitionPayload::default().with_reason(format!("accepted for {}", slot.starts_at))
            }
            None => TransitionPayload::default(),
        };
        lifecycle::transition(&mut next, ServiceState::Accepted, &ctx.actor.id, &payload, now)?;

        let committed = self
            .commit(
                ctx,
                &before,
                next,
                Guard::PendingAssignment {
                    target: ServiceState::Accepted,
                },
            )
            .await?;

        info!(
            request_id = %committed.id,
            technician_id = %assignee,
            rescheduled = moved.is_some(),
            "{message}"
        );

        // Booking: the moved slot, else the already agreed time, else now.
        let slot = moved.unwrap_or_else(|| ScheduleSlot {
            starts_at: committed.scheduled_at.unwrap_or(now),
            ends_at: committed.scheduled_end_at,
            notes: None,
        });
        if proposed.is_some() {
            self.secondary(
                "schedule cancel",
                &committed.id,
                self.schedule
                    .cancel(&ctx.tenant_id, &committed.id, &assignee, now),
            )
            .await;
        }
        let entry = ScheduleEntry::new(
            &ctx.tenant_id,
            &committed.id,
            &assignee,
            &slot,
            ScheduleStatus::Accepted,
            now,
        );
        self.secondary("schedule upsert", &committed.id, self.schedule.upsert(entry))
            .await;

        let log = AssignmentSlaLog::accepted(
            &ctx.tenant_id,
            &committed.id,
            &assignee,
            before.assigned_at.unwrap_or(now),
            now,
        );
        self.secondary("SLA log", &committed.id, self.sla_logs.append(log))
            .await;

        Ok(committed)
    }

    /// Decline the pending assignment.
    pub async fn decline(
        &self,
        ctx: &OperationContext,
        request_id: &str,
        technician: &CanonicalIdentity,
        reason: DeclineReason,
        detail: Option<String>,
    ) -> DispatchResult<ServiceRequest> {
        let before = self.fetch(ctx, request_id).await?;
        ensure_pending(&before, ServiceState::Declined)?;
        let assignee = ensure_responder(ctx, &before, technician)?;

        let detail = detail.filter(|d| !d.trim().is_empty());
        let now = ctx.now();
        let mut next = before.clone();
        next.assignment_status = Some(AssignmentStatus::Declined);
        next.responded_at = Some(now);
        lifecycle::transition(
            &mut next,
            ServiceState::Declined,
            &ctx.actor.id,
            &TransitionPayload::declined(reason, detail.clone()),
            now,
        )?;

        let committed = self
            .commit(
                ctx,
                &before,
                next,
                Guard::PendingAssignment {
                    target: ServiceState::Declined,
                },
            )
            .await?;

        info!(
            request_id = %committed.id,
            technician_id = %assignee,
            reason = %reason,
            "Assignment declined"
        );

        self.secondary(
            "schedule cancel",
            &committed.id,
            self.schedule
                .cancel(&ctx.tenant_id, &committed.id, &assignee, now),
        )
        .await;

        let body = match &detail {
            Some(detail) => format!(
                "{assignee} declined {}: {} ({detail})",
                committed.ticket_code,
                reason.label()
            ),
            None => format!(
                "{assignee} declined {}: {}",
                committed.ticket_code,
                reason.label()
            ),
        };
        let notification = Notification::new(
            &ctx.tenant_id,
            &committed.id,
            &committed.ticket_code,
            NotificationKind::AssignmentDeclined,
            format!("Assignment declined: {}", committed.ticket_code),
            body,
            now,
        )
        .to_roles(&self.decline_notify_roles);
        self.secondary(
            "decline notification",
            &committed.id,
            self.notifications.append(notification),
        )
        .await;

        let log = AssignmentSlaLog::declined(
            &ctx.tenant_id,
            &committed.id,
            &assignee,
            before.assigned_at.unwrap_or(now),
            now,
            reason,
            detail,
        );
        self.secondary("SLA log", &committed.id, self.sla_logs.append(log))
            .await;

        Ok(committed)
    }

    /// Hand a non-terminal request to `technician`, starting a new
    /// assignment cycle.
    pub async fn reassign(
        &self,
        ctx: &OperationContext,
        request_id: &str,
        technician: &TechnicianProfile,
        slot: Option<ScheduleSlot>,
    ) -> DispatchResult<ServiceRequest> {
        if let Some(slot) = &slot {
            slot.validate()?;
        }

        let before = self.fetch(ctx, request_id).await?;
        let previous = before.assigned_to.clone();

        let now = ctx.now();
        let mut next = before.clone();
        next.begin_assignment(&technician.id, now);
        if let Some(slot) = &slot {
            next.scheduled_at = Some(slot.starts_at);
            next.scheduled_end_at = slot.ends_at;
        }
        let reason = match &previous {
            Some(prev) => format!("reassigned from {prev} to {}", technician.id),
            None => format!("reassigned to {}", technician.id),
        };
        lifecycle::reenter_assigned(&mut next, &ctx.actor.id, Some(reason), now)?;

        let committed = self
            .commit(
                ctx,
                &before,
                next,
                Guard::NonTerminal {
                    target: ServiceState::Assigned,
                },
            )
            .await?;

        info!(
            request_id = %committed.id,
            from = previous.as_deref().unwrap_or("-"),
            to = %technician.id,
            actor = %ctx.actor.id,
            "Request reassigned"
        );

        if let Some(prev) = &previous {
            self.secondary(
                "schedule cancel",
                &committed.id,
                self.schedule.cancel(&ctx.tenant_id, &committed.id, prev, now),
            )
            .await;
        }
        if let Some(slot) = slot {
            let entry = ScheduleEntry::new(
                &ctx.tenant_id,
                &committed.id,
                &technician.id,
                &slot,
                ScheduleStatus::Scheduled,
                now,
            );
            self.secondary("schedule upsert", &committed.id, self.schedule.upsert(entry))
                .await;
        }
        self.notify_assignee(ctx, &committed, technician, now).await;

        Ok(committed)
    }

    // =========================================================================
    // Generic transitions
    // =========================================================================

    /// Apply a plain lifecycle transition.
    ///
    /// Targets owned by the assignment protocol (`ASSIGNED`, `ACCEPTED`,
    /// `DECLINED`) are refused; they need the side effects only the
    /// dedicated operations perform.
    pub async fn transition(
        &self,
        ctx: &OperationContext,
        request_id: &str,
        target: ServiceState,
        payload: &TransitionPayload,
    ) -> DispatchResult<ServiceRequest> {
        let before = self.fetch(ctx, request_id).await?;
        if !before.current_state.can_transition_to(target) {
            return Err(DispatchError::InvalidTransition {
                from: before.current_state,
                to: target,
            });
        }
        if target.is_assignment_owned() {
            return Err(DispatchError::AssignmentOperationRequired { target });
        }

        let now = ctx.now();
        let mut next = before.clone();
        lifecycle::transition(&mut next, target, &ctx.actor.id, payload, now)?;

        let committed = self
            .commit(ctx, &before, next, Guard::Reachable { target })
            .await?;

        info!(
            request_id = %committed.id,
            from = %before.current_state,
            to = %target,
            actor = %ctx.actor.id,
            "Request transitioned"
        );

        if target == ServiceState::Cancelled {
            if let Some(assignee) = &committed.assigned_to {
                self.secondary(
                    "schedule cancel",
                    &committed.id,
                    self.schedule
                        .cancel(&ctx.tenant_id, &committed.id, assignee, now),
                )
                .await;
            }
        }

        Ok(committed)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn fetch(&self, ctx: &OperationContext, request_id: &str) -> DispatchResult<ServiceRequest> {
        self.requests
            .get(&ctx.tenant_id, request_id)
            .await?
            .ok_or_else(|| DispatchError::request_not_found(request_id))
    }

    /// Conditional write of `next` over `before`.
    async fn commit(
        &self,
        ctx: &OperationContext,
        before: &ServiceRequest,
        next: ServiceRequest,
        guard: Guard,
    ) -> DispatchResult<ServiceRequest> {
        let expected = WriteExpectation::of(before);
        match self.requests.compare_and_swap(&expected, next).await {
            Ok(committed) => Ok(committed),
            Err(StoreError::Conflict { .. }) => {
                debug!(request_id = %before.id, version = before.version, "Lost write race");
                Err(self.explain_conflict(ctx, before, guard).await)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Map a lost race to the error the caller would have seen had it read
    /// the winning write first.
    async fn explain_conflict(
        &self,
        ctx: &OperationContext,
        before: &ServiceRequest,
        guard: Guard,
    ) -> DispatchError {
        let current = match self.requests.get(&ctx.tenant_id, &before.id).await {
            Ok(Some(current)) => current,
            Ok(None) => return DispatchError::request_not_found(&before.id),
            Err(e) => return e.into(),
        };

        match guard {
            Guard::PendingAssignment { target } => {
                if let Err(e) = ensure_pending(&current, target) {
                    return e;
                }
            }
            Guard::Reachable { target } => {
                if !current.current_state.can_transition_to(target) {
                    return DispatchError::InvalidTransition {
                        from: current.current_state,
                        to: target,
                    };
                }
            }
            Guard::NonTerminal { target } => {
                if current.current_state.is_terminal() {
                    return DispatchError::InvalidTransition {
                        from: current.current_state,
                        to: target,
                    };
                }
            }
        }

        DispatchError::ConcurrentModification {
            request_id: before.id.clone(),
        }
    }

    /// Schedule entry for a fresh offer, when a time is known.
    async fn book_offer(
        &self,
        ctx: &OperationContext,
        request: &ServiceRequest,
        technician_id: &str,
        slot: Option<ScheduleSlot>,
        now: NaiveDateTime,
    ) {
        let slot = slot.or_else(|| {
            request.scheduled_at.map(|starts_at| ScheduleSlot {
                starts_at,
                ends_at: request.scheduled_end_at,
                notes: None,
            })
        });
        if let Some(slot) = slot {
            let entry = ScheduleEntry::new(
                &ctx.tenant_id,
                &request.id,
                technician_id,
                &slot,
                ScheduleStatus::Scheduled,
                now,
            );
            self.secondary("schedule upsert", &request.id, self.schedule.upsert(entry))
                .await;
        }
    }

    async fn notify_assignee(
        &self,
        ctx: &OperationContext,
        request: &ServiceRequest,
        technician: &TechnicianProfile,
        now: NaiveDateTime,
    ) {
        let when = match request.scheduled_at {
            Some(at) => format!(" (visit {at})"),
            None => String::new(),
        };
        let notification = Notification::new(
            &ctx.tenant_id,
            &request.id,
            &request.ticket_code,
            NotificationKind::AssignmentCreated,
            format!("New assignment: {}", request.ticket_code),
            format!("{}{when}", request.title),
            now,
        )
        .to_user(technician.id.clone());
        self.secondary(
            "assignment notification",
            &request.id,
            self.notifications.append(notification),
        )
        .await;
    }

    /// Await a write that must not fail the operation.
    async fn secondary<T, F>(&self, what: &'static str, request_id: &str, fut: F) -> Option<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match fut.await {
            Ok(value) => Some(value),
            Err(e) => {
                error!(request_id, write = what, error = %e, "Secondary write failed");
                None
            }
        }
    }
}

/// accept/decline/reschedule precondition: pending and still `ASSIGNED`.
fn ensure_pending(request: &ServiceRequest, target: ServiceState) -> DispatchResult<()> {
    if !request.is_pending_assignment() {
        return Err(DispatchError::AssignmentNotPending {
            request_id: request.id.clone(),
            status: request.assignment_status,
        });
    }
    if request.current_state != ServiceState::Assigned {
        return Err(DispatchError::InvalidTransition {
            from: request.current_state,
            to: target,
        });
    }
    Ok(())
}

/// The responding technician must be the assignee unless the actor is
/// privileged. Returns the stored assignee id.
fn ensure_responder(
    ctx: &OperationContext,
    request: &ServiceRequest,
    technician: &CanonicalIdentity,
) -> DispatchResult<String> {
    let assignee = request.assigned_to.clone().unwrap_or_default();
    if technician.matches(&assignee) || ctx.actor.is_privileged() {
        Ok(assignee)
    } else {
        Err(DispatchError::NotAssignedTechnician {
            request_id: request.id.clone(),
            technician_id: technician.primary_id.clone(),
        })
    }
}
