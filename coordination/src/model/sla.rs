//! Acceptance-SLA records and aggregate statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a technician turned an assignment down. Fixed taxonomy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DeclineReason {
    TooFar,
    SkillMismatch,
    Overloaded,
    OnLeave,
    SchedulingConflict,
    Other,
}

impl DeclineReason {
    pub const ALL: [DeclineReason; 6] = [
        Self::TooFar,
        Self::SkillMismatch,
        Self::Overloaded,
        Self::OnLeave,
        Self::SchedulingConflict,
        Self::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TooFar => "too_far",
            Self::SkillMismatch => "skill_mismatch",
            Self::Overloaded => "overloaded",
            Self::OnLeave => "on_leave",
            Self::SchedulingConflict => "scheduling_conflict",
            Self::Other => "other",
        }
    }

    /// Human label used in notification bodies.
    pub fn label(self) -> &'static str {
        match self {
            Self::TooFar => "Location too far",
            Self::SkillMismatch => "Skill mismatch",
            Self::Overloaded => "Overloaded",
            Self::OnLeave => "On leave",
            Self::SchedulingConflict => "Scheduling conflict",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown decline reason: {0} (expected one of too_far, skill_mismatch, overloaded, on_leave, scheduling_conflict, other)")]
pub struct UnknownDeclineReason(pub String);

impl FromStr for DeclineReason {
    type Err = UnknownDeclineReason;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| UnknownDeclineReason(s.to_string()))
    }
}

/// Outcome of one accept/decline decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SlaOutcome {
    Accepted,
    Declined,
}

/// Immutable record of one technician response to an assignment.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AssignmentSlaLog {
    pub id: String,
    pub tenant_id: String,
    pub request_id: String,
    pub technician_id: String,
    pub assigned_at: NaiveDateTime,
    pub responded_at: NaiveDateTime,
    pub outcome: SlaOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<DeclineReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decline_detail: Option<String>,
    /// `responded_at - assigned_at`, whole minutes, never negative.
    pub response_minutes: i64,
}

impl AssignmentSlaLog {
    fn new(
        tenant_id: &str,
        request_id: &str,
        technician_id: &str,
        assigned_at: NaiveDateTime,
        responded_at: NaiveDateTime,
        outcome: SlaOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            request_id: request_id.to_string(),
            technician_id: technician_id.to_string(),
            assigned_at,
            responded_at,
            outcome,
            decline_reason: None,
            decline_detail: None,
            response_minutes: (responded_at - assigned_at).num_minutes().max(0),
        }
    }

    pub fn accepted(
        tenant_id: &str,
        request_id: &str,
        technician_id: &str,
        assigned_at: NaiveDateTime,
        responded_at: NaiveDateTime,
    ) -> Self {
        Self::new(
            tenant_id,
            request_id,
            technician_id,
            assigned_at,
            responded_at,
            SlaOutcome::Accepted,
        )
    }

    pub fn declined(
        tenant_id: &str,
        request_id: &str,
        technician_id: &str,
        assigned_at: NaiveDateTime,
        responded_at: NaiveDateTime,
        reason: DeclineReason,
        detail: Option<String>,
    ) -> Self {
        let mut log = Self::new(
            tenant_id,
            request_id,
            technician_id,
            assigned_at,
            responded_at,
            SlaOutcome::Declined,
        );
        log.decline_reason = Some(reason);
        log.decline_detail = detail;
        log
    }
}

/// Aggregate acceptance statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SlaStats {
    pub total: usize,
    pub accepted: usize,
    pub declined: usize,
    /// Percentage of responses that were accepts, one decimal place.
    pub acceptance_rate: f64,
    /// Mean minutes from assignment to response, one decimal place.
    pub avg_response_minutes: f64,
    pub decline_reason_breakdown: BTreeMap<DeclineReason, usize>,
}

impl SlaStats {
    /// Aggregate a set of SLA logs. An empty set yields all zeros.
    pub fn from_logs<'a>(logs: impl IntoIterator<Item = &'a AssignmentSlaLog>) -> Self {
        let mut stats = SlaStats::default();
        let mut minutes_sum: i64 = 0;

        for log in logs {
            stats.total += 1;
            minutes_sum += log.response_minutes;
            match log.outcome {
                SlaOutcome::Accepted => stats.accepted += 1,
                SlaOutcome::Declined => {
                    stats.declined += 1;
                    let reason = log.decline_reason.unwrap_or(DeclineReason::Other);
                    *stats.decline_reason_breakdown.entry(reason).or_insert(0) += 1;
                }
            }
        }

        if stats.total > 0 {
            let total = stats.total as f64;
            stats.acceptance_rate = round1(stats.accepted as f64 / total * 100.0);
            stats.avg_response_minutes = round1(minutes_sum as f64 / total);
        }
        stats
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
