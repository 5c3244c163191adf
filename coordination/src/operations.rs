//! Request types for the exposed operation contracts.
//!
//! An RPC layer deserializes an [`Operation`] and hands it to
//! `DispatchService::execute`. The JSON schema of every operation is
//! available from [`operation_schema`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::lifecycle::{ServiceState, TransitionPayload};
use crate::model::{DeclineReason, NewServiceRequest, ScheduleSlot};

// ============================================================================
// Parameters
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RequestRef {
    #[schemars(description = "Service request id")]
    pub request_id: String,
}

/// Parameters for `assign` and `reassign`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AssignParams {
    pub request_id: String,

    #[schemars(description = "Technician id, alias or email")]
    pub technician_id: String,

    #[schemars(description = "Optional visit window to book for the technician")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSlot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AcceptParams {
    pub request_id: String,

    /// Accept & reschedule when present.
    #[schemars(description = "Proposed visit time; keeps the current visit length if no end is given")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed: Option<ScheduleSlot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeclineParams {
    pub request_id: String,

    #[schemars(description = "One of too_far, skill_mismatch, overloaded, on_leave, scheduling_conflict, other")]
    pub reason: DeclineReason,

    #[schemars(description = "Free-text explanation")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RescheduleParams {
    pub request_id: String,
    pub schedule: ScheduleSlot,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransitionParams {
    pub request_id: String,

    #[schemars(description = "Target lifecycle state, e.g. VISIT_IN_PROGRESS")]
    pub target: ServiceState,

    #[serde(default)]
    pub payload: TransitionPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TechnicianScope {
    /// Defaults to the acting user.
    #[schemars(description = "Technician id, alias or email (default: the caller)")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technician: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NotificationsParams {
    #[schemars(description = "Only unread notifications (default: false)")]
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NotificationRef {
    pub notification_id: String,
}

// ============================================================================
// Operations
// ============================================================================

/// Every operation the dispatch service exposes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateRequest(NewServiceRequest),
    GetRequest(RequestRef),
    Assign(AssignParams),
    ListPending(TechnicianScope),
    Accept(AcceptParams),
    Decline(DeclineParams),
    Reschedule(RescheduleParams),
    SuggestReassignment(RequestRef),
    Reassign(AssignParams),
    SlaStats(TechnicianScope),
    CheckEscalations,
    AvailableTransitions(RequestRef),
    Transition(TransitionParams),
    Notifications(NotificationsParams),
    MarkNotificationRead(NotificationRef),
}

impl Operation {
    /// Wire name of the operation (`suggest_reassignment`).
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRequest(_) => "create_request",
            Self::GetRequest(_) => "get_request",
            Self::Assign(_) => "assign",
            Self::ListPending(_) => "list_pending",
            Self::Accept(_) => "accept",
            Self::Decline(_) => "decline",
            Self::Reschedule(_) => "reschedule",
            Self::SuggestReassignment(_) => "suggest_reassignment",
            Self::Reassign(_) => "reassign",
            Self::SlaStats(_) => "sla_stats",
            Self::CheckEscalations => "check_escalations",
            Self::AvailableTransitions(_) => "available_transitions",
            Self::Transition(_) => "transition",
            Self::Notifications(_) => "notifications",
            Self::MarkNotificationRead(_) => "mark_notification_read",
        }
    }

    /// Whether only privileged roles may call this operation.
    pub fn is_privileged(&self) -> bool {
        matches!(
            self,
            Self::CreateRequest(_)
                | Self::Assign(_)
                | Self::SuggestReassignment(_)
                | Self::Reassign(_)
                | Self::CheckEscalations
        )
    }
}

/// JSON schema for [`Operation`].
pub fn operation_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(Operation)
}
