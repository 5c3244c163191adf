//! Domain records: service requests, schedule bookings, SLA logs,
//! notifications and technician profiles.

pub mod notification;
pub mod request;
pub mod schedule;
pub mod sla;
pub mod technician;

pub use notification::{Notification, NotificationKind};
pub use request::{
    ticket_code, AssignmentStatus, HistoryEntry, NewServiceRequest, Priority, ServiceRequest,
};
pub use schedule::{ScheduleEntry, ScheduleSlot, ScheduleStatus};
pub use sla::{AssignmentSlaLog, DeclineReason, SlaOutcome, SlaStats, UnknownDeclineReason};
pub use technician::{TechnicianFilter, TechnicianProfile, TechnicianRef, WorkingDay};
