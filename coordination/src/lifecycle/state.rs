//! Lifecycle states and the legal-transition table.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The set of service-request states.
///
/// Every request starts at `Created` and terminates at either `Resolved`
/// or `Cancelled`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    /// Logged, nobody assigned yet.
    Created,
    /// Offered to a technician, waiting for accept/decline.
    Assigned,
    /// The assigned technician turned the request down.
    Declined,
    /// The technician accepted and a visit is booked.
    Accepted,
    /// Technician is on site.
    VisitInProgress,
    /// Site visit finished; outcome decides the next step.
    VisitCompleted,
    /// Waiting for a spare part.
    PendingPart,
    /// Waiting for customer or management approval (quote, warranty claim).
    PendingApproval,
    /// Bench or on-site repair under way.
    RepairInProgress,
    /// Repair done, waiting for quality check.
    QcPending,
    /// QC passed, device waiting to be handed back.
    ReadyForReturn,
    /// Closed with resolution notes. Terminal.
    Resolved,
    /// Closed without resolution. Terminal.
    Cancelled,
}

impl ServiceState {
    /// All states, in lifecycle order.
    pub const ALL: [ServiceState; 13] = [
        Self::Created,
        Self::Assigned,
        Self::Declined,
        Self::Accepted,
        Self::VisitInProgress,
        Self::VisitCompleted,
        Self::PendingPart,
        Self::PendingApproval,
        Self::RepairInProgress,
        Self::QcPending,
        Self::ReadyForReturn,
        Self::Resolved,
        Self::Cancelled,
    ];

    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Cancelled)
    }

    /// Legal next states from this state.
    ///
    /// ```text
    /// CREATED            → ASSIGNED | CANCELLED
    /// ASSIGNED           → ACCEPTED | DECLINED | CANCELLED
    /// DECLINED           → ASSIGNED | CANCELLED
    /// ACCEPTED           → VISIT_IN_PROGRESS | CANCELLED
    /// VISIT_IN_PROGRESS  → VISIT_COMPLETED | PENDING_PART | CANCELLED
    /// VISIT_COMPLETED    → RESOLVED | PENDING_PART | PENDING_APPROVAL | REPAIR_IN_PROGRESS | CANCELLED
    /// PENDING_PART       → REPAIR_IN_PROGRESS | CANCELLED
    /// PENDING_APPROVAL   → REPAIR_IN_PROGRESS | CANCELLED
    /// REPAIR_IN_PROGRESS → QC_PENDING | CANCELLED
    /// QC_PENDING         → READY_FOR_RETURN | REPAIR_IN_PROGRESS | CANCELLED
    /// READY_FOR_RETURN   → RESOLVED | CANCELLED
    /// ```
    pub fn allowed_next(self) -> &'static [ServiceState] {
        use ServiceState::*;

        match self {
            Created => &[Assigned, Cancelled],
            Assigned => &[Accepted, Declined, Cancelled],
            Declined => &[Assigned, Cancelled],
            Accepted => &[VisitInProgress, Cancelled],
            VisitInProgress => &[VisitCompleted, PendingPart, Cancelled],
            VisitCompleted => &[
                Resolved,
                PendingPart,
                PendingApproval,
                RepairInProgress,
                Cancelled,
            ],
            PendingPart => &[RepairInProgress, Cancelled],
            PendingApproval => &[RepairInProgress, Cancelled],
            RepairInProgress => &[QcPending, Cancelled],
            QcPending => &[ReadyForReturn, RepairInProgress, Cancelled],
            ReadyForReturn => &[Resolved, Cancelled],
            Resolved | Cancelled => &[],
        }
    }

    /// Whether `self → to` is an edge of the transition table.
    pub fn can_transition_to(self, to: ServiceState) -> bool {
        self.allowed_next().contains(&to)
    }

    /// Whether the assignment protocol owns transitions into this state.
    ///
    /// Entering these states has side effects (schedule entries, SLA logs,
    /// notifications) that only the assignment operations perform.
    pub fn is_assignment_owned(self) -> bool {
        matches!(self, Self::Assigned | Self::Accepted | Self::Declined)
    }

    /// Wire name (`VISIT_IN_PROGRESS`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Assigned => "ASSIGNED",
            Self::Declined => "DECLINED",
            Self::Accepted => "ACCEPTED",
            Self::VisitInProgress => "VISIT_IN_PROGRESS",
            Self::VisitCompleted => "VISIT_COMPLETED",
            Self::PendingPart => "PENDING_PART",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::RepairInProgress => "REPAIR_IN_PROGRESS",
            Self::QcPending => "QC_PENDING",
            Self::ReadyForReturn => "READY_FOR_RETURN",
            Self::Resolved => "RESOLVED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Display metadata shown next to a transition button.
    pub fn meta(self) -> StateMeta {
        let (label, action, tone) = match self {
            Self::Created => ("Created", "Reopen", Tone::Neutral),
            Self::Assigned => ("Assigned", "Assign technician", Tone::Progress),
            Self::Declined => ("Declined", "Decline", Tone::Warning),
            Self::Accepted => ("Accepted", "Accept", Tone::Progress),
            Self::VisitInProgress => ("Visit in progress", "Start visit", Tone::Progress),
            Self::VisitCompleted => ("Visit completed", "Complete visit", Tone::Progress),
            Self::PendingPart => ("Pending part", "Wait for part", Tone::Warning),
            Self::PendingApproval => ("Pending approval", "Request approval", Tone::Warning),
            Self::RepairInProgress => ("Repair in progress", "Start repair", Tone::Progress),
            Self::QcPending => ("QC pending", "Send to QC", Tone::Progress),
            Self::ReadyForReturn => ("Ready for return", "Mark ready for return", Tone::Progress),
            Self::Resolved => ("Resolved", "Resolve", Tone::Success),
            Self::Cancelled => ("Cancelled", "Cancel request", Tone::Danger),
        };
        StateMeta {
            label,
            action,
            tone,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown state name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for ServiceState {
    type Err = UnknownState;

    /// Accepts wire names case-insensitively, with `-` or ` ` in place of `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Visual tone hint for clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Neutral,
    Progress,
    Warning,
    Success,
    Danger,
}

/// Static display metadata for a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMeta {
    /// Human label for the state itself.
    pub label: &'static str,
    /// Verb phrase for the action that enters the state.
    pub action: &'static str,
    pub tone: Tone,
}
