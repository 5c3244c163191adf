//! Applying lifecycle transitions to a service request.
//!
//! All functions here are pure with respect to storage: they validate and
//! mutate an in-memory [`ServiceRequest`]. Callers commit the result with a
//! compare-and-set write.

use std::fmt;

use chrono::NaiveDateTime;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::state::{ServiceState, Tone};
use crate::error::{DispatchError, DispatchResult};
use crate::model::{DeclineReason, HistoryEntry, ServiceRequest};

/// A field that must accompany a transition into a specific state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequiredField {
    ResolutionNotes,
    CancellationReason,
    DeclineReason,
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResolutionNotes => write!(f, "resolution_notes"),
            Self::CancellationReason => write!(f, "cancellation_reason"),
            Self::DeclineReason => write!(f, "decline_reason"),
        }
    }
}

/// Fields a transition into `target` must carry.
pub fn required_fields(target: ServiceState) -> &'static [RequiredField] {
    match target {
        ServiceState::Resolved => &[RequiredField::ResolutionNotes],
        ServiceState::Cancelled => &[RequiredField::CancellationReason],
        ServiceState::Declined => &[RequiredField::DeclineReason],
        _ => &[],
    }
}

/// Data accompanying a transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TransitionPayload {
    /// Free-text note recorded in the history entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<DeclineReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decline_detail: Option<String>,
}

impl TransitionPayload {
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn resolved(notes: impl Into<String>) -> Self {
        Self {
            resolution_notes: Some(notes.into()),
            ..Default::default()
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            cancellation_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn declined(reason: DeclineReason, detail: Option<String>) -> Self {
        Self {
            decline_reason: Some(reason),
            decline_detail: detail,
            ..Default::default()
        }
    }

    /// Cancellation reason, falling back to the generic `reason`.
    fn cancellation_text(&self) -> Option<&str> {
        non_blank(self.cancellation_reason.as_deref()).or_else(|| non_blank(self.reason.as_deref()))
    }

    fn has(&self, field: RequiredField) -> bool {
        match field {
            RequiredField::ResolutionNotes => non_blank(self.resolution_notes.as_deref()).is_some(),
            RequiredField::CancellationReason => self.cancellation_text().is_some(),
            RequiredField::DeclineReason => self.decline_reason.is_some(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// One permitted next step with display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransitionOption {
    pub state: ServiceState,
    pub label: String,
    pub action: String,
    pub tone: Tone,
    pub terminal: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<RequiredField>,
}

/// Permitted next states for the request's current state.
pub fn available_transitions(request: &ServiceRequest) -> Vec<TransitionOption> {
    options_from(request.current_state)
}

/// Permitted next states from `state`, with display metadata.
pub fn options_from(state: ServiceState) -> Vec<TransitionOption> {
    state
        .allowed_next()
        .iter()
        .map(|&next| {
            let meta = next.meta();
            TransitionOption {
                state: next,
                label: meta.label.to_string(),
                action: meta.action.to_string(),
                tone: meta.tone,
                terminal: next.is_terminal(),
                requires: required_fields(next).to_vec(),
            }
        })
        .collect()
}

/// Validate and apply `current_state → target`.
///
/// On error the request is left untouched. On success exactly one history
/// entry is appended and the state-specific fields from `payload` are
/// copied onto the request.
pub fn transition(
    request: &mut ServiceRequest,
    target: ServiceState,
    actor: &str,
    payload: &TransitionPayload,
    at: NaiveDateTime,
) -> DispatchResult<()> {
    let from = request.current_state;
    if !from.can_transition_to(target) {
        return Err(DispatchError::InvalidTransition { from, to: target });
    }

    if let Some(&field) = required_fields(target).iter().find(|f| !payload.has(**f)) {
        return Err(DispatchError::MissingRequiredField { field, target });
    }

    let mut reason = non_blank(payload.reason.as_deref()).map(str::to_string);
    match target {
        ServiceState::Resolved => {
            request.resolution_notes = payload.resolution_notes.clone();
        }
        ServiceState::Cancelled => {
            let text = payload.cancellation_text().map(str::to_string);
            request.cancellation_reason = text.clone();
            reason = reason.or(text);
        }
        ServiceState::Declined => {
            request.decline_reason = payload.decline_reason;
            request.decline_detail = payload.decline_detail.clone();
            reason = reason.or_else(|| payload.decline_reason.map(|r| r.to_string()));
        }
        _ => {}
    }

    append(request, target, actor, reason, at);
    Ok(())
}

/// Privileged re-entry into `ASSIGNED` used by reassignment.
///
/// Legal from any non-terminal state, including `ASSIGNED` itself.
pub fn reenter_assigned(
    request: &mut ServiceRequest,
    actor: &str,
    reason: Option<String>,
    at: NaiveDateTime,
) -> DispatchResult<()> {
    let from = request.current_state;
    if from.is_terminal() {
        return Err(DispatchError::InvalidTransition {
            from,
            to: ServiceState::Assigned,
        });
    }
    append(request, ServiceState::Assigned, actor, reason, at);
    Ok(())
}

fn append(
    request: &mut ServiceRequest,
    to: ServiceState,
    actor: &str,
    reason: Option<String>,
    at: NaiveDateTime,
) {
    let from = request.current_state;

    tracing::debug!(
        request_id = %request.id,
        from = %from,
        to = %to,
        actor,
        "State transition"
    );

    request.state_history.push(HistoryEntry {
        from_state: Some(from),
        to_state: to,
        actor: actor.to_string(),
        reason,
        timestamp: at,
    });
    request.current_state = to;
    request.updated_at = at;
}

/// Reconstruct the state by replaying history.
///
/// Returns `None` for an empty history or one whose entries do not chain
/// (`from_state` of each entry must equal the previous `to_state`).
pub fn replay(history: &[HistoryEntry]) -> Option<ServiceState> {
    let (first, rest) = history.split_first()?;
    if first.from_state.is_some() || first.to_state != ServiceState::Created {
        return None;
    }
    rest.iter().try_fold(first.to_state, |current, entry| {
        (entry.from_state == Some(current)).then_some(entry.to_state)
    })
}

/// Whether the cached `current_state` agrees with the history.
pub fn is_consistent(request: &ServiceRequest) -> bool {
    replay(&request.state_history) == Some(request.current_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewServiceRequest;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn request_in(state: ServiceState) -> ServiceRequest {
        let mut req = ServiceRequest::create("acme", NewServiceRequest::new("x"), "desk", now());
        // Walk a legal path to `state`.
        let path: &[ServiceState] = match state {
            ServiceState::Created => &[],
            ServiceState::Assigned => &[ServiceState::Assigned],
            ServiceState::Declined => &[ServiceState::Assigned, ServiceState::Declined],
            ServiceState::Accepted => &[ServiceState::Assigned, ServiceState::Accepted],
            ServiceState::VisitInProgress => &[
                ServiceState::Assigned,
                ServiceState::Accepted,
                ServiceState::VisitInProgress,
            ],
            ServiceState::VisitCompleted => &[
                ServiceState::Assigned,
                ServiceState::Accepted,
                ServiceState::VisitInProgress,
                ServiceState::VisitCompleted,
            ],
            ServiceState::PendingPart => &[
                ServiceState::Assigned,
                ServiceState::Accepted,
                ServiceState::VisitInProgress,
                ServiceState::PendingPart,
            ],
            ServiceState::PendingApproval => &[
                ServiceState::Assigned,
                ServiceState::Accepted,
                ServiceState::VisitInProgress,
                ServiceState::VisitCompleted,
                ServiceState::PendingApproval,
            ],
            ServiceState::RepairInProgress => &[
                ServiceState::Assigned,
                ServiceState::Accepted,
                ServiceState::VisitInProgress,
                ServiceState::PendingPart,
                ServiceState::RepairInProgress,
            ],
            ServiceState::QcPending => &[
                ServiceState::Assigned,
                ServiceState::Accepted,
                ServiceState::VisitInProgress,
                ServiceState::PendingPart,
                ServiceState::RepairInProgress,
                ServiceState::QcPending,
            ],
            ServiceState::ReadyForReturn => &[
                ServiceState::Assigned,
                ServiceState::Accepted,
                ServiceState::VisitInProgress,
                ServiceState::PendingPart,
                ServiceState::RepairInProgress,
                ServiceState::QcPending,
                ServiceState::ReadyForReturn,
            ],
            ServiceState::Resolved => &[
                ServiceState::Assigned,
                ServiceState::Accepted,
                ServiceState::VisitInProgress,
                ServiceState::VisitCompleted,
                ServiceState::Resolved,
            ],
            ServiceState::Cancelled => &[ServiceState::Cancelled],
        };
        for &step in path {
            transition(&mut req, step, "desk", &full_payload(), now()).unwrap();
        }
        req
    }

    fn full_payload() -> TransitionPayload {
        TransitionPayload {
            reason: Some("test".into()),
            resolution_notes: Some("fixed".into()),
            cancellation_reason: Some("duplicate".into()),
            decline_reason: Some(DeclineReason::TooFar),
            decline_detail: None,
        }
    }

    #[test]
    fn test_every_pair_outside_table_is_rejected_without_mutation() {
        for from in ServiceState::ALL {
            for to in ServiceState::ALL {
                if from.can_transition_to(to) {
                    continue;
                }
                let mut req = request_in(from);
                let before_history = req.state_history.clone();
                let err = transition(&mut req, to, "x", &full_payload(), now()).unwrap_err();
                assert!(
                    matches!(err, DispatchError::InvalidTransition { from: f, to: t } if f == from && t == to),
                    "{from} → {to}: {err}"
                );
                assert_eq!(req.current_state, from);
                assert_eq!(req.state_history, before_history);
            }
        }
    }

    #[test]
    fn test_every_table_edge_appends_one_entry() {
        for from in ServiceState::ALL {
            for &to in from.allowed_next() {
                let mut req = request_in(from);
                let before = req.state_history.len();
                transition(&mut req, to, "x", &full_payload(), now()).unwrap();
                assert_eq!(req.state_history.len(), before + 1);
                assert_eq!(req.current_state, to);
                assert!(is_consistent(&req), "{from} → {to}");
            }
        }
    }

    #[test]
    fn test_terminal_states_admit_nothing() {
        for terminal in [ServiceState::Resolved, ServiceState::Cancelled] {
            let req = request_in(terminal);
            assert!(available_transitions(&req).is_empty());
            for to in ServiceState::ALL {
                let mut r = req.clone();
                assert!(transition(&mut r, to, "x", &full_payload(), now()).is_err());
            }
        }
    }

    #[test]
    fn test_resolved_requires_notes() {
        let mut req = request_in(ServiceState::VisitCompleted);
        let before = req.clone();
        let err = transition(
            &mut req,
            ServiceState::Resolved,
            "x",
            &TransitionPayload::resolved("   "),
            now(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::MissingRequiredField {
                field: RequiredField::ResolutionNotes,
                ..
            }
        ));
        assert_eq!(req.state_history, before.state_history);
        assert!(req.resolution_notes.is_none());
    }

    #[test]
    fn test_cancel_accepts_generic_reason() {
        let mut req = request_in(ServiceState::Created);
        transition(
            &mut req,
            ServiceState::Cancelled,
            "x",
            &TransitionPayload::default().with_reason("customer withdrew"),
            now(),
        )
        .unwrap();
        assert_eq!(
            req.cancellation_reason.as_deref(),
            Some("customer withdrew")
        );
    }

    #[test]
    fn test_cancel_without_reason_rejected() {
        let mut req = request_in(ServiceState::Created);
        let err = transition(
            &mut req,
            ServiceState::Cancelled,
            "x",
            &TransitionPayload::default(),
            now(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "MISSING_REQUIRED_FIELD");
    }

    #[test]
    fn test_declined_requires_reason_code() {
        let mut req = request_in(ServiceState::Assigned);
        assert!(transition(
            &mut req,
            ServiceState::Declined,
            "x",
            &TransitionPayload::default().with_reason("busy"),
            now(),
        )
        .is_err());

        transition(
            &mut req,
            ServiceState::Declined,
            "x",
            &TransitionPayload::declined(DeclineReason::Overloaded, Some("3 visits".into())),
            now(),
        )
        .unwrap();
        assert_eq!(req.decline_reason, Some(DeclineReason::Overloaded));
        assert_eq!(
            req.state_history.last().unwrap().reason.as_deref(),
            Some("overloaded")
        );
    }

    #[test]
    fn test_available_transitions_metadata() {
        let req = request_in(ServiceState::VisitCompleted);
        let options = available_transitions(&req);
        let states: Vec<ServiceState> = options.iter().map(|o| o.state).collect();
        assert_eq!(states, ServiceState::VisitCompleted.allowed_next().to_vec());

        let resolve = options
            .iter()
            .find(|o| o.state == ServiceState::Resolved)
            .unwrap();
        assert!(resolve.terminal);
        assert_eq!(resolve.requires, vec![RequiredField::ResolutionNotes]);
        assert_eq!(resolve.tone, Tone::Success);
    }

    #[test]
    fn test_reenter_assigned_from_non_terminal() {
        for from in ServiceState::ALL.into_iter().filter(|s| !s.is_terminal()) {
            let mut req = request_in(from);
            reenter_assigned(&mut req, "dispatch", Some("reassigned".into()), now()).unwrap();
            assert_eq!(req.current_state, ServiceState::Assigned);
            assert!(is_consistent(&req));
        }
        let mut req = request_in(ServiceState::Resolved);
        assert!(reenter_assigned(&mut req, "dispatch", None, now()).is_err());
    }

    #[test]
    fn test_replay_rejects_broken_chain() {
        let mut req = request_in(ServiceState::Accepted);
        assert_eq!(replay(&req.state_history), Some(ServiceState::Accepted));
        req.state_history.remove(1);
        assert_eq!(replay(&req.state_history), None);
        assert_eq!(replay(&[]), None);
    }
}
