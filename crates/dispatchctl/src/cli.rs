//! Command-line arguments.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};

use service_coordination::operations::{
    AcceptParams, AssignParams, DeclineParams, NotificationRef, NotificationsParams, RequestRef,
    RescheduleParams, TechnicianScope, TransitionParams,
};
use service_coordination::{
    DeclineReason, NewServiceRequest, Operation, Priority, ScheduleSlot, ServiceState,
    TransitionPayload,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "dispatchctl", author, version, about, long_about = None)]
pub struct Args {
    /// JSON state file (overrides DISPATCH_STATE)
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    /// TOML configuration file; DISPATCH_* environment variables apply otherwise
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "default")]
    pub tenant: String,

    /// Id of the acting user
    #[arg(long, global = true, default_value = "dispatch-desk")]
    pub actor: String,

    /// Email of the acting user, used to resolve directory identities
    #[arg(long, global = true)]
    pub email: Option<String>,

    /// Comma-separated roles of the acting user (technician, dispatcher, back_office, admin)
    #[arg(long, global = true, default_value = "dispatcher")]
    pub role: String,

    /// Freeze the clock at this tenant-local time (2026-03-02T09:00:00)
    #[arg(long, global = true)]
    pub now: Option<NaiveDateTime>,

    /// Debug logging unless RUST_LOG is set
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Visit window flags shared by several subcommands.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SlotArgs {
    /// Visit start (tenant-local)
    #[arg(long)]
    pub at: Option<NaiveDateTime>,

    /// Visit end (tenant-local)
    #[arg(long, requires = "at")]
    pub until: Option<NaiveDateTime>,

    #[arg(long, requires = "at")]
    pub notes: Option<String>,
}

impl SlotArgs {
    pub fn slot(&self) -> Option<ScheduleSlot> {
        self.at.map(|starts_at| ScheduleSlot {
            starts_at,
            ends_at: self.until,
            notes: self.notes.clone(),
        })
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log a new service request
    Create {
        title: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value = "medium")]
        priority: Priority,
        #[command(flatten)]
        slot: SlotArgs,
    },
    /// Show one request with its history
    Show { request_id: String },
    /// Offer a request to a technician
    Assign {
        request_id: String,
        /// Technician id, alias or email
        technician: String,
        #[command(flatten)]
        slot: SlotArgs,
    },
    /// Accept the pending assignment; --at proposes a new visit time
    Accept {
        request_id: String,
        #[command(flatten)]
        slot: SlotArgs,
    },
    /// Decline the pending assignment
    Decline {
        request_id: String,
        /// too_far, skill_mismatch, overloaded, on_leave, scheduling_conflict, other
        reason: DeclineReason,
        #[arg(long)]
        detail: Option<String>,
    },
    /// Accept the pending assignment at a new time
    Reschedule {
        request_id: String,
        at: NaiveDateTime,
        #[arg(long)]
        until: Option<NaiveDateTime>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Move a request to another technician
    Reassign {
        request_id: String,
        technician: String,
        #[command(flatten)]
        slot: SlotArgs,
    },
    /// Move a request through the service lifecycle
    Transition {
        request_id: String,
        /// Target state, e.g. VISIT_IN_PROGRESS
        target: ServiceState,
        #[arg(long)]
        reason: Option<String>,
        /// Resolution notes (required for RESOLVED)
        #[arg(long)]
        notes: Option<String>,
        /// Cancellation reason (required for CANCELLED, falls back to --reason)
        #[arg(long)]
        cancel_reason: Option<String>,
    },
    /// List the transitions a request currently allows
    Transitions { request_id: String },
    /// Pending assignments awaiting a response
    Pending {
        #[arg(long)]
        technician: Option<String>,
    },
    /// Rank replacement technicians for a request
    Suggest { request_id: String },
    /// Assignments unanswered past the acceptance SLA
    Escalations,
    /// Acceptance statistics
    SlaStats {
        #[arg(long)]
        technician: Option<String>,
    },
    /// Notifications for the acting user
    Notifications {
        #[arg(long, default_value_t = false)]
        unread: bool,
    },
    /// Mark a notification as read
    MarkRead { notification_id: String },
    /// Run a raw JSON operation ({"op":"check_escalations"})
    Exec { json: String },
    /// Manage the technician directory
    #[command(subcommand)]
    Technician(TechnicianCommand),
    /// Print the JSON schema of all operations
    Schema,
}

#[derive(Subcommand, Debug)]
pub enum TechnicianCommand {
    /// Add or replace a technician
    Add {
        id: String,
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        specialization: Option<String>,
        #[arg(long = "skill")]
        skills: Vec<String>,
        #[arg(long = "alias")]
        aliases: Vec<String>,
        #[arg(long = "holiday")]
        holidays: Vec<NaiveDate>,
    },
    /// Import technicians from a JSON array
    Import { file: PathBuf },
    /// List technicians of the tenant
    List,
}

impl Command {
    /// The service operation this subcommand maps to, if any.
    pub fn operation(self) -> Result<Option<Operation>> {
        let op = match self {
            Command::Create {
                title,
                category,
                priority,
                slot,
            } => Operation::CreateRequest(NewServiceRequest {
                title,
                category,
                priority,
                scheduled_at: slot.at,
                scheduled_end_at: slot.until,
            }),
            Command::Show { request_id } => Operation::GetRequest(RequestRef { request_id }),
            Command::Assign {
                request_id,
                technician,
                slot,
            } => Operation::Assign(AssignParams {
                request_id,
                technician_id: technician,
                schedule: slot.slot(),
            }),
            Command::Accept { request_id, slot } => Operation::Accept(AcceptParams {
                request_id,
                proposed: slot.slot(),
            }),
            Command::Decline {
                request_id,
                reason,
                detail,
            } => Operation::Decline(DeclineParams {
                request_id,
                reason,
                detail,
            }),
            Command::Reschedule {
                request_id,
                at,
                until,
                notes,
            } => Operation::Reschedule(RescheduleParams {
                request_id,
                schedule: ScheduleSlot {
                    starts_at: at,
                    ends_at: until,
                    notes,
                },
            }),
            Command::Reassign {
                request_id,
                technician,
                slot,
            } => Operation::Reassign(AssignParams {
                request_id,
                technician_id: technician,
                schedule: slot.slot(),
            }),
            Command::Transition {
                request_id,
                target,
                reason,
                notes,
                cancel_reason,
            } => Operation::Transition(TransitionParams {
                request_id,
                target,
                payload: TransitionPayload {
                    reason,
                    resolution_notes: notes,
                    cancellation_reason: cancel_reason,
                    ..Default::default()
                },
            }),
            Command::Transitions { request_id } => {
                Operation::AvailableTransitions(RequestRef { request_id })
            }
            Command::Pending { technician } => {
                Operation::ListPending(TechnicianScope { technician })
            }
            Command::Suggest { request_id } => {
                Operation::SuggestReassignment(RequestRef { request_id })
            }
            Command::Escalations => Operation::CheckEscalations,
            Command::SlaStats { technician } => Operation::SlaStats(TechnicianScope { technician }),
            Command::Notifications { unread } => Operation::Notifications(NotificationsParams {
                unread_only: unread,
            }),
            Command::MarkRead { notification_id } => {
                Operation::MarkNotificationRead(NotificationRef { notification_id })
            }
            Command::Exec { json } => {
                serde_json::from_str(&json).context("parsing operation JSON")?
            }
            Command::Technician(_) | Command::Schema => return Ok(None),
        };
        Ok(Some(op))
    }
}
