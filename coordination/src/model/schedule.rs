//! Calendar bookings for (request, technician) pairs.

use chrono::{Duration, NaiveDateTime};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Booked by dispatch, technician has not responded yet.
    Scheduled,
    /// Confirmed by the technician.
    Accepted,
    /// Superseded or withdrawn. Kept for audit.
    Cancelled,
}

/// A calendar booking.
///
/// Entries are never edited in place: a new time means the old entry is
/// cancelled and a fresh one inserted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScheduleEntry {
    pub id: String,
    pub tenant_id: String,
    pub request_id: String,
    pub technician_id: String,
    pub starts_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<NaiveDateTime>,
    pub status: ScheduleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<NaiveDateTime>,
}

impl ScheduleEntry {
    pub fn new(
        tenant_id: &str,
        request_id: &str,
        technician_id: &str,
        slot: &ScheduleSlot,
        status: ScheduleStatus,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            request_id: request_id.to_string(),
            technician_id: technician_id.to_string(),
            starts_at: slot.starts_at,
            ends_at: slot.ends_at,
            status,
            notes: slot.notes.clone(),
            created_at,
            cancelled_at: None,
        }
    }

    /// Not yet cancelled.
    pub fn is_active(&self) -> bool {
        self.status != ScheduleStatus::Cancelled
    }

    pub fn belongs_to(&self, request_id: &str, technician_id: &str) -> bool {
        self.request_id == request_id && self.technician_id == technician_id
    }

    pub(crate) fn cancel(&mut self, at: NaiveDateTime) {
        self.status = ScheduleStatus::Cancelled;
        self.cancelled_at = Some(at);
    }
}

/// A requested visit window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScheduleSlot {
    pub starts_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ScheduleSlot {
    pub fn at(starts_at: NaiveDateTime) -> Self {
        Self {
            starts_at,
            ends_at: None,
            notes: None,
        }
    }

    pub fn with_end(mut self, ends_at: NaiveDateTime) -> Self {
        self.ends_at = Some(ends_at);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Reject windows whose end is not after the start.
    pub fn validate(&self) -> DispatchResult<()> {
        match self.ends_at {
            Some(end) if end <= self.starts_at => Err(DispatchError::InvalidSchedule {
                reason: format!("end {end} is not after start {}", self.starts_at),
            }),
            _ => Ok(()),
        }
    }

    /// Move a booking to `starts_at`, keeping the previous visit length when
    /// no explicit end is supplied.
    pub fn moved(
        starts_at: NaiveDateTime,
        ends_at: Option<NaiveDateTime>,
        previous_start: Option<NaiveDateTime>,
        previous_end: Option<NaiveDateTime>,
    ) -> Self {
        let ends_at = ends_at.or_else(|| match (previous_start, previous_end) {
            (Some(start), Some(end)) if end > start => {
                let length: Duration = end - start;
                Some(starts_at + length)
            }
            _ => None,
        });
        Self {
            starts_at,
            ends_at,
            notes: None,
        }
    }
}
