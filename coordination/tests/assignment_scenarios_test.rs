//! Assignment protocol scenarios, driven through `DispatchService`.
//!
//! Covers accept, decline, retry after a committed response, the generic
//! transition guard, reassignment, the accept/decline race, and secondary
//! writes failing after the primary commit.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use futures::future::join_all;

use service_coordination::store::{NotificationSink, StoreError, StoreResult};
use service_coordination::{
    Actor, AssignmentStatus, Collaborators, DeclineReason, DispatchConfig, DispatchService,
    FixedClock, MemoryStore, NewServiceRequest, Notification, NotificationKind,
    OperationContext, ScheduleSlot, ScheduleStatus, ServiceState, SharedMemoryStore,
    SlaOutcome, TechnicianProfile, TransitionPayload,
};

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

struct Harness {
    store: SharedMemoryStore,
    service: Arc<DispatchService>,
    clock: Arc<FixedClock>,
    desk: OperationContext,
}

impl Harness {
    fn new() -> Self {
        let store = MemoryStore::new().shared();
        Self::with_collaborators(store.clone(), Collaborators::memory(&store))
    }

    fn with_collaborators(store: SharedMemoryStore, collaborators: Collaborators) -> Self {
        for (id, name) in [("tech-1", "Tomas"), ("tech-2", "Uma")] {
            store
                .add_technician(TechnicianProfile::new("acme", id, name))
                .unwrap();
        }
        let clock = Arc::new(FixedClock::new(at(9, 0)));
        let desk = OperationContext::new("acme", Actor::dispatcher("desk"), clock.clone());
        let service = DispatchService::new(collaborators, DispatchConfig::builtin()).shared();
        Self {
            store,
            service,
            clock,
            desk,
        }
    }

    fn technician(&self, id: &str) -> OperationContext {
        self.desk.as_actor(Actor::technician(id))
    }

    async fn assigned_request(&self, schedule: Option<ScheduleSlot>) -> String {
        let req = self
            .service
            .create_request(&self.desk, NewServiceRequest::new("Boiler pressure low"))
            .await
            .unwrap();
        self.service
            .assign(&self.desk, &req.id, "tech-1", schedule)
            .await
            .unwrap();
        req.id
    }
}

/// Sink that rejects every notification.
struct BrokenSink;

#[async_trait]
impl NotificationSink for BrokenSink {
    async fn append(&self, _notification: Notification) -> StoreResult<()> {
        Err(StoreError::Unavailable("mail relay down".into()))
    }
}

// ── Scenario 1: accept without a proposed time ─────────────────────

#[tokio::test]
async fn test_accept_without_proposed_time() {
    let h = Harness::new();
    let id = h.assigned_request(None).await;

    h.clock.advance(Duration::minutes(12));
    let accepted = h
        .service
        .accept(&h.technician("tech-1"), &id, None)
        .await
        .unwrap();

    assert_eq!(accepted.current_state, ServiceState::Accepted);
    assert_eq!(accepted.assignment_status, Some(AssignmentStatus::Accepted));
    assert_eq!(accepted.responded_at, Some(at(9, 12)));

    let entries = h.store.schedule_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, ScheduleStatus::Accepted);

    let logs = h.store.sla_logs().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, SlaOutcome::Accepted);
    assert_eq!(logs[0].response_minutes, 12);
}

// ── Scenario 2: decline ────────────────────────────────────────────

#[tokio::test]
async fn test_decline_cancels_booking_and_notifies_dispatch() {
    let h = Harness::new();
    let id = h.assigned_request(Some(ScheduleSlot::at(at(14, 0)))).await;

    let declined = h
        .service
        .decline(
            &h.technician("tech-1"),
            &id,
            DeclineReason::TooFar,
            Some("other side of the city".into()),
        )
        .await
        .unwrap();

    assert_eq!(declined.current_state, ServiceState::Declined);
    assert_eq!(declined.assignment_status, Some(AssignmentStatus::Declined));
    assert_eq!(declined.decline_reason, Some(DeclineReason::TooFar));

    let entries = h.store.schedule_entries().unwrap();
    assert_eq!(entries.len(), 1, "entry is cancelled, not deleted");
    assert_eq!(entries[0].status, ScheduleStatus::Cancelled);

    let declines: Vec<_> = h
        .store
        .notifications()
        .unwrap()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::AssignmentDeclined)
        .collect();
    assert_eq!(declines.len(), 1);

    let inbox = h.service.notifications(&h.desk, true).await.unwrap();
    assert!(inbox
        .iter()
        .any(|n| n.kind == NotificationKind::AssignmentDeclined));
}

// ── Scenario 5: generic transition cannot skip the lifecycle ───────

#[tokio::test]
async fn test_resolve_while_assigned_is_invalid() {
    let h = Harness::new();
    let id = h.assigned_request(None).await;

    let err = h
        .service
        .transition(
            &h.desk,
            &id,
            ServiceState::Resolved,
            &TransitionPayload::resolved("done"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");

    let req = h.service.get_request(&h.desk, &id).await.unwrap();
    assert_eq!(req.current_state, ServiceState::Assigned);
    assert_eq!(req.state_history.len(), 2);
}

// ── Scenario 6: retried accept ─────────────────────────────────────

#[tokio::test]
async fn test_retried_accept_is_not_pending() {
    let h = Harness::new();
    let id = h.assigned_request(None).await;
    let tech = h.technician("tech-1");

    h.service.accept(&tech, &id, None).await.unwrap();
    let err = h.service.accept(&tech, &id, None).await.unwrap_err();
    assert_eq!(err.code(), "ASSIGNMENT_NOT_PENDING");

    let err = h
        .service
        .decline(&tech, &id, DeclineReason::Other, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ASSIGNMENT_NOT_PENDING");

    let accepted_logs = h
        .store
        .sla_logs()
        .unwrap()
        .into_iter()
        .filter(|l| l.outcome == SlaOutcome::Accepted)
        .count();
    assert_eq!(accepted_logs, 1);
}

#[tokio::test]
async fn test_other_technician_cannot_respond() {
    let h = Harness::new();
    let id = h.assigned_request(None).await;

    let err = h
        .service
        .accept(&h.technician("tech-2"), &id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_ASSIGNED_TECHNICIAN");
}

#[tokio::test]
async fn test_accept_and_reschedule_moves_booking() {
    let h = Harness::new();
    let slot = ScheduleSlot::at(at(10, 0)).with_end(at(11, 30));
    let id = h.assigned_request(Some(slot)).await;

    let accepted = h
        .service
        .reschedule(&h.technician("tech-1"), &id, ScheduleSlot::at(at(15, 0)))
        .await
        .unwrap();
    assert_eq!(accepted.scheduled_at, Some(at(15, 0)));
    assert_eq!(accepted.scheduled_end_at, Some(at(16, 30)));

    let entries = h.store.schedule_entries().unwrap();
    let live: Vec<_> = entries.iter().filter(|e| e.is_active()).collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].status, ScheduleStatus::Accepted);
    assert_eq!(live[0].starts_at, at(15, 0));
    assert!(entries
        .iter()
        .any(|e| e.status == ScheduleStatus::Cancelled && e.starts_at == at(10, 0)));
}

#[tokio::test]
async fn test_reassign_after_decline_opens_new_cycle() {
    let h = Harness::new();
    let id = h.assigned_request(None).await;
    h.service
        .decline(&h.technician("tech-1"), &id, DeclineReason::Overloaded, None)
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(30));
    let reassigned = h
        .service
        .reassign(&h.desk, &id, "tech-2", None)
        .await
        .unwrap();
    assert_eq!(reassigned.current_state, ServiceState::Assigned);
    assert_eq!(reassigned.assigned_to.as_deref(), Some("tech-2"));
    assert_eq!(reassigned.assignment_status, Some(AssignmentStatus::Pending));
    assert_eq!(reassigned.assigned_at, Some(at(9, 30)));

    let pending = h
        .service
        .list_pending(&h.technician("tech-2"), None)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    // New cycle: the new assignee can respond.
    h.service
        .accept(&h.technician("tech-2"), &id, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_technician_cannot_reassign() {
    let h = Harness::new();
    let id = h.assigned_request(None).await;
    let err = h
        .service
        .reassign(&h.technician("tech-1"), &id, "tech-2", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

// ── Concurrency: accept races decline ──────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_accept_decline_race_has_one_winner() {
    for round in 0..20 {
        let h = Harness::new();
        let id = h.assigned_request(None).await;
        let tech = h.technician("tech-1");

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let service = h.service.clone();
                let ctx = tech.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        service.accept(&ctx, &id, None).await
                    } else {
                        service.decline(&ctx, &id, DeclineReason::Other, None).await
                    }
                })
            })
            .collect();

        let results: Vec<_> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "round {round}");
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert_eq!(err.code(), "ASSIGNMENT_NOT_PENDING", "round {round}");
        }

        let req = h.service.get_request(&h.desk, &id).await.unwrap();
        assert_eq!(req.state_history.len(), 3);
        assert_eq!(h.store.sla_logs().unwrap().len(), 1);
    }
}

// ── Secondary writes ───────────────────────────────────────────────

#[tokio::test]
async fn test_notification_failure_does_not_undo_decline() {
    let store = MemoryStore::new().shared();
    let mut collaborators = Collaborators::memory(&store);
    collaborators.notifications = Arc::new(BrokenSink);
    let h = Harness::with_collaborators(store, collaborators);

    let id = h.assigned_request(None).await;
    let declined = h
        .service
        .decline(&h.technician("tech-1"), &id, DeclineReason::OnLeave, None)
        .await
        .unwrap();

    assert_eq!(declined.current_state, ServiceState::Declined);
    assert!(h.store.notifications().unwrap().is_empty());
    assert_eq!(h.store.sla_logs().unwrap().len(), 1);
}

#[tokio::test]
async fn test_sla_stats_summarize_responses() {
    let h = Harness::new();
    let tech = h.technician("tech-1");

    let first = h.assigned_request(None).await;
    h.clock.advance(Duration::minutes(10));
    h.service.accept(&tech, &first, None).await.unwrap();

    let second = h.assigned_request(None).await;
    h.clock.advance(Duration::minutes(20));
    h.service
        .decline(&tech, &second, DeclineReason::TooFar, None)
        .await
        .unwrap();

    let stats = h.service.sla_stats(&h.desk, Some("tech-1")).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.declined, 1);
    assert_eq!(stats.acceptance_rate, 50.0);
    assert_eq!(stats.avg_response_minutes, 15.0);
    assert_eq!(stats.decline_reason_breakdown.get(&DeclineReason::TooFar), Some(&1));

    let everyone = h.service.sla_stats(&h.desk, None).await.unwrap();
    assert_eq!(everyone.total, 2);
}
