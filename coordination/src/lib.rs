//! Field-service dispatch coordination.
//!
//! This library provides:
//! - A thirteen-state lifecycle for service requests with an append-only
//!   transition history
//! - The assignment protocol: assign, accept, accept & reschedule, decline,
//!   reassign, with SLA logging and notifications
//! - Reassignment suggestions ranked by workload, decline history,
//!   calendar and specialization
//! - Escalation of assignments left unanswered past the acceptance SLA
//!
//! # Layout
//!
//! - [`lifecycle`]: state catalog, transition table, history replay
//! - [`assignment`]: the `AssignmentCoordinator`
//! - [`advisor`]: the `ReassignmentAdvisor`
//! - [`escalation`]: the `EscalationMonitor`
//! - [`store`]: collaborator traits, in-memory store, JSON snapshots
//! - [`service`]: `DispatchService`, the operation contracts
//!
//! # Usage
//!
//! ```bash
//! dispatchctl --actor desk --role dispatcher create "Printer jams on floor 3"
//! dispatchctl --actor desk --role dispatcher assign <request-id> tech-a
//! dispatchctl --actor tech-a accept <request-id>
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod advisor;
pub mod assignment;
pub mod config;
pub mod context;
pub mod error;
pub mod escalation;
pub mod identity;
pub mod lifecycle;
pub mod model;
pub mod operations;
pub mod resilience;
pub mod service;
pub mod store;

pub use advisor::{AdvisorWeights, Candidate, ReassignmentAdvisor, ScoreInputs};
pub use assignment::{AssignmentCoordinator, SharedAssignmentCoordinator};
pub use config::{ConfigError, DispatchConfig};
pub use context::{Actor, Clock, FixedClock, OperationContext, Role, SystemClock};
pub use error::{DispatchError, DispatchResult, EntityKind};
pub use escalation::{EscalationItem, EscalationMonitor};
pub use identity::{CanonicalIdentity, IdentityResolver};
pub use lifecycle::{
    RequiredField, ServiceState, StateMeta, Tone, TransitionOption, TransitionPayload,
};
pub use model::{
    AssignmentSlaLog, AssignmentStatus, DeclineReason, HistoryEntry, NewServiceRequest,
    Notification, NotificationKind, Priority, ScheduleEntry, ScheduleSlot, ScheduleStatus,
    ServiceRequest, SlaOutcome, SlaStats, TechnicianProfile,
};
pub use operations::{operation_schema, Operation};
pub use resilience::{DegradationLevel, DegradedResponse};
pub use service::{Collaborators, DispatchService, PendingAssignment, SharedDispatchService};
pub use store::{MemoryStore, SharedMemoryStore, StoreError, StoreResult, StoreSnapshot};
