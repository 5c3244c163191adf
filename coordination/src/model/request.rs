//! Service requests and their append-only state history.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lifecycle::ServiceState;
use crate::model::sla::DeclineReason;

/// Sub-state of the (request, technician) pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Declined,
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Declined => write!(f, "declined"),
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" | "urgent" => Ok(Self::Critical),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// One committed lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HistoryEntry {
    /// `None` only for the creation entry.
    pub from_state: Option<ServiceState>,
    pub to_state: ServiceState,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: NaiveDateTime,
}

/// Input for creating a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NewServiceRequest {
    pub title: String,
    /// Topic used to match technician specializations ("printer", "network").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_end_at: Option<NaiveDateTime>,
}

impl NewServiceRequest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled(mut self, at: NaiveDateTime, end: Option<NaiveDateTime>) -> Self {
        self.scheduled_at = Some(at);
        self.scheduled_end_at = end;
        self
    }
}

/// A unit of field-service work tracked by the lifecycle state machine.
///
/// `current_state` caches the `to_state` of the last history entry; the
/// history is the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ServiceRequest {
    pub id: String,
    pub tenant_id: String,
    pub ticket_code: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub priority: Priority,

    pub current_state: ServiceState,
    pub state_history: Vec<HistoryEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_status: Option<AssignmentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<DeclineReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decline_detail: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_end_at: Option<NaiveDateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    /// Bumped by the store on every committed write.
    pub version: u64,
}

impl ServiceRequest {
    /// Create a request in `CREATED` with its creation history entry.
    pub fn create(
        tenant_id: &str,
        new: NewServiceRequest,
        actor: &str,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            ticket_code: ticket_code::generate(now),
            title: new.title,
            category: new.category,
            priority: new.priority,
            current_state: ServiceState::Created,
            state_history: vec![HistoryEntry {
                from_state: None,
                to_state: ServiceState::Created,
                actor: actor.to_string(),
                reason: None,
                timestamp: now,
            }],
            assigned_to: None,
            assignment_status: None,
            assigned_at: None,
            responded_at: None,
            decline_reason: None,
            decline_detail: None,
            scheduled_at: new.scheduled_at,
            scheduled_end_at: new.scheduled_end_at,
            resolution_notes: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Not in a terminal state.
    pub fn is_open(&self) -> bool {
        !self.current_state.is_terminal()
    }

    pub fn is_pending_assignment(&self) -> bool {
        self.assignment_status == Some(AssignmentStatus::Pending)
    }

    /// Topic used for specialization matching: category, else title.
    pub fn topic(&self) -> &str {
        self.category.as_deref().unwrap_or(&self.title)
    }

    /// Start a fresh assignment cycle for `technician_id`.
    pub(crate) fn begin_assignment(&mut self, technician_id: &str, now: NaiveDateTime) {
        self.assigned_to = Some(technician_id.to_string());
        self.assignment_status = Some(AssignmentStatus::Pending);
        self.assigned_at = Some(now);
        self.responded_at = None;
        self.decline_reason = None;
        self.decline_detail = None;
    }
}

/// Human ticket codes: `SR-YYYYMMDD-XXXXXX`.
pub mod ticket_code {
    use super::*;

    static TICKET_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^SR-\d{8}-[0-9A-F]{6}$").expect("TICKET_CODE_RE regex should compile")
    });

    pub fn generate(now: NaiveDateTime) -> String {
        let suffix: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(6)
            .collect::<String>()
            .to_ascii_uppercase();
        format!("SR-{}-{}", now.format("%Y%m%d"), suffix)
    }

    pub fn is_valid(code: &str) -> bool {
        TICKET_CODE_RE.is_match(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_create_starts_with_history() {
        let req = ServiceRequest::create(
            "acme",
            NewServiceRequest::new("Printer jam").with_category("printer"),
            "desk-1",
            now(),
        );
        assert_eq!(req.current_state, ServiceState::Created);
        assert_eq!(req.state_history.len(), 1);
        assert_eq!(req.state_history[0].from_state, None);
        assert_eq!(req.state_history[0].to_state, ServiceState::Created);
        assert_eq!(req.version, 0);
        assert!(req.is_open());
        assert_eq!(req.topic(), "printer");
    }

    #[test]
    fn test_ticket_code_format() {
        let code = ticket_code::generate(now());
        assert!(code.starts_with("SR-20260302-"), "{code}");
        assert!(ticket_code::is_valid(&code), "{code}");
        assert!(!ticket_code::is_valid("SR-2026-ABC"));
        assert!(!ticket_code::is_valid("sr-20260302-abcdef"));
    }

    #[test]
    fn test_begin_assignment_clears_decline() {
        let mut req = ServiceRequest::create("acme", NewServiceRequest::new("x"), "d", now());
        req.decline_reason = Some(DeclineReason::TooFar);
        req.decline_detail = Some("60km".into());
        req.begin_assignment("tech-b", now());
        assert_eq!(req.assigned_to.as_deref(), Some("tech-b"));
        assert!(req.is_pending_assignment());
        assert!(req.decline_reason.is_none());
        assert!(req.decline_detail.is_none());
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("urgent".parse::<Priority>().unwrap(), Priority::Critical);
        assert_eq!(Priority::default(), Priority::Medium);
    }
}
