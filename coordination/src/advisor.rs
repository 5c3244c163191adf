//! Reassignment advisor: ranks replacement technicians after a decline.
//!
//! Scores are recomputed from the directory, the open workload and the
//! recent SLA logs on every call. Lower is better.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Datelike, NaiveTime};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ConfigError, DispatchConfig};
use crate::context::OperationContext;
use crate::model::{
    AssignmentSlaLog, AssignmentStatus, ServiceRequest, SlaOutcome, TechnicianFilter,
    TechnicianProfile,
};
use crate::resilience::{bounded, DegradedResponse};
use crate::store::{RequestFilter, RequestStore, SlaLogFilter, SlaLogStore, TechnicianDirectory};

const SERVED_BY: &str = "reassignment_advisor";

/// Keeps `score` far from `i64` overflow for any realistic workload.
const MAX_WEIGHT: i64 = 1_000_000;

/// Additive scoring weights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct AdvisorWeights {
    pub base: i64,
    pub per_open_request: i64,
    pub non_working_day: i64,
    pub holiday: i64,
    pub per_recent_decline: i64,
    /// Subtracted when the specialization matches the request topic.
    pub specialization_match: i64,
    /// Scores strictly below this are flagged `likely_available`.
    pub availability_threshold: i64,
}

impl Default for AdvisorWeights {
    fn default() -> Self {
        Self {
            base: 50,
            per_open_request: 10,
            non_working_day: 100,
            holiday: 200,
            per_recent_decline: 15,
            specialization_match: 20,
            availability_threshold: 150,
        }
    }
}

/// Facts about one technician that feed the score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreInputs {
    pub open_count: usize,
    pub recent_declines: usize,
    pub non_working_day: bool,
    pub holiday: bool,
    pub specialization_match: bool,
}

impl AdvisorWeights {
    /// Open work and a specialization match must move the score the
    /// right way; penalties must never reward.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rules: [(&'static str, i64, i64); 7] = [
            ("advisor.base", self.base, -MAX_WEIGHT),
            ("advisor.availability_threshold", self.availability_threshold, -MAX_WEIGHT),
            ("advisor.per_open_request", self.per_open_request, 1),
            ("advisor.specialization_match", self.specialization_match, 1),
            ("advisor.non_working_day", self.non_working_day, 0),
            ("advisor.holiday", self.holiday, 0),
            ("advisor.per_recent_decline", self.per_recent_decline, 0),
        ];
        for (key, value, min) in rules {
            if !(min..=MAX_WEIGHT).contains(&value) {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("must be between {min} and {MAX_WEIGHT}, got {value}"),
                });
            }
        }
        Ok(())
    }

    pub fn score(&self, inputs: &ScoreInputs) -> i64 {
        let mut score = self.base;
        score += self.per_open_request * inputs.open_count as i64;
        score += self.per_recent_decline * inputs.recent_declines as i64;
        if inputs.non_working_day {
            score += self.non_working_day;
        }
        if inputs.holiday {
            score += self.holiday;
        }
        if inputs.specialization_match {
            score -= self.specialization_match;
        }
        score
    }

    pub fn likely_available(&self, score: i64) -> bool {
        score < self.availability_threshold
    }
}

/// One ranked replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Candidate {
    pub technician_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub open_count: usize,
    pub recent_declines: usize,
    pub score: i64,
    pub likely_available: bool,
    pub specialization_match: bool,
    pub non_working_day: bool,
    pub holiday: bool,
    /// Rostered shift on the visit date, when the roster has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift_start: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift_end: Option<NaiveTime>,
}

pub struct ReassignmentAdvisor {
    requests: Arc<dyn RequestStore>,
    directory: Arc<dyn TechnicianDirectory>,
    sla_logs: Arc<dyn SlaLogStore>,
    config: DispatchConfig,
}

impl ReassignmentAdvisor {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        directory: Arc<dyn TechnicianDirectory>,
        sla_logs: Arc<dyn SlaLogStore>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            requests,
            directory,
            sla_logs,
            config,
        }
    }

    pub fn weights(&self) -> &AdvisorWeights {
        &self.config.advisor
    }

    /// Rank every active technician except the current assignee and any in
    /// `exclude`.
    ///
    /// Never fails: a directory failure returns an empty, unavailable
    /// result; workload or decline-history failures return a partial
    /// ranking with those inputs treated as zero. The three lookups run
    /// concurrently, each bounded by `lookup_timeout_ms`.
    pub async fn suggest(
        &self,
        ctx: &OperationContext,
        request: &ServiceRequest,
        exclude: &[String],
    ) -> DegradedResponse<Vec<Candidate>> {
        let now = ctx.now();
        let limit = self.config.lookup_timeout();
        let target_date = request.scheduled_at.unwrap_or(now).date();

        let excluded: BTreeSet<String> = request
            .assigned_to
            .iter()
            .chain(exclude)
            .map(|id| id.trim().to_lowercase())
            .collect();

        let active = TechnicianFilter::active();
        let open = RequestFilter::default().open();
        let history =
            SlaLogFilter::tenant(&ctx.tenant_id).since(now - self.config.decline_lookback());

        let (technicians, open_requests, decline_logs) = futures::join!(
            bounded(
                "technician directory",
                limit,
                self.directory.list(&ctx.tenant_id, &active),
            ),
            bounded(
                "workload scan",
                limit,
                self.requests.list(&ctx.tenant_id, &open),
            ),
            bounded("decline history", limit, self.sla_logs.list(&history)),
        );

        let technicians = match technicians {
            Ok(techs) => techs,
            Err(warning) => {
                warn!(request_id = %request.id, %warning, "Advisor unavailable");
                return DegradedResponse::unavailable(Vec::new(), SERVED_BY, warning, now);
            }
        };

        let mut warnings = Vec::new();
        let open_requests = open_requests.unwrap_or_else(|warning| {
            warnings.push(warning);
            Vec::new()
        });
        let recent_declines: Vec<AssignmentSlaLog> = match decline_logs {
            Ok(logs) => logs
                .into_iter()
                .filter(|l| l.outcome == SlaOutcome::Declined)
                .collect(),
            Err(warning) => {
                warnings.push(warning);
                Vec::new()
            }
        };

        let weights = &self.config.advisor;
        let topic = request.topic();

        let mut candidates: Vec<Candidate> = technicians
            .into_iter()
            .filter(|tech| tech.active)
            .filter(|tech| {
                !tech
                    .identifiers()
                    .any(|id| excluded.contains(&id.to_lowercase()))
            })
            .map(|tech| {
                let inputs = ScoreInputs {
                    open_count: open_requests
                        .iter()
                        .filter(|r| r.id != request.id && is_working_on(&tech, r))
                        .count(),
                    recent_declines: recent_declines
                        .iter()
                        .filter(|l| answers_to(&tech, &l.technician_id))
                        .count(),
                    non_working_day: !tech.works_on(target_date.weekday()),
                    holiday: tech.is_holiday(target_date),
                    specialization_match: tech.specialization_matches(topic),
                };
                let score = weights.score(&inputs);
                let shift = tech.hours_on(target_date.weekday());
                Candidate {
                    technician_id: tech.id,
                    name: tech.name,
                    specialization: tech.specialization,
                    skills: tech.skills,
                    open_count: inputs.open_count,
                    recent_declines: inputs.recent_declines,
                    score,
                    likely_available: weights.likely_available(score),
                    specialization_match: inputs.specialization_match,
                    non_working_day: inputs.non_working_day,
                    holiday: inputs.holiday,
                    shift_start: shift.map(|(start, _)| start),
                    shift_end: shift.map(|(_, end)| end),
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.score
                .cmp(&b.score)
                .then_with(|| a.technician_id.cmp(&b.technician_id))
        });

        if !warnings.is_empty() {
            warn!(request_id = %request.id, ?warnings, "Advisor degraded");
        }
        debug!(
            request_id = %request.id,
            candidates = candidates.len(),
            "Computed reassignment candidates"
        );

        DegradedResponse::with_warnings(candidates, SERVED_BY, warnings, now)
    }
}

fn answers_to(tech: &TechnicianProfile, id: &str) -> bool {
    tech.identifiers().any(|known| known.eq_ignore_ascii_case(id))
}

/// Open work counted against a technician: assigned to them and not
/// already turned down.
fn is_working_on(tech: &TechnicianProfile, request: &ServiceRequest) -> bool {
    request.is_open()
        && request.assignment_status != Some(AssignmentStatus::Declined)
        && request
            .assigned_to
            .as_deref()
            .is_some_and(|assignee| answers_to(tech, assignee))
}
