//! Error types for dispatch operations.
//!
//! Every variant maps to a stable machine-readable code so an RPC layer
//! can tell callers whether to refetch, retry, or give up.

use std::fmt;

use crate::lifecycle::{RequiredField, ServiceState};
use crate::model::AssignmentStatus;
use crate::store::StoreError;

/// Result type alias for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Kind of entity a lookup failed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Request,
    Technician,
    Notification,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "Service request"),
            Self::Technician => write!(f, "Technician"),
            Self::Notification => write!(f, "Notification"),
        }
    }
}

fn status_label(status: &Option<AssignmentStatus>) -> String {
    match status {
        Some(s) => s.to_string(),
        None => "unassigned".to_string(),
    }
}

/// Errors that can occur during dispatch operations
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Target is not reachable from the current state (or the current
    /// state is terminal). Never retried.
    #[error("Invalid transition: {from} → {to}")]
    InvalidTransition { from: ServiceState, to: ServiceState },

    /// accept/decline/reschedule on an assignment that is no longer
    /// pending. The caller must refetch.
    #[error("Assignment for request {request_id} is not pending (status: {})", status_label(.status))]
    AssignmentNotPending {
        request_id: String,
        status: Option<AssignmentStatus>,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// A state-specific field is missing. Nothing was written.
    #[error("Missing required field `{field}` for transition to {target}")]
    MissingRequiredField {
        field: RequiredField,
        target: ServiceState,
    },

    #[error("Technician {technician_id} is not assigned to request {request_id}")]
    NotAssignedTechnician {
        request_id: String,
        technician_id: String,
    },

    #[error("Actor {actor} is not allowed to {operation}")]
    Forbidden {
        actor: String,
        operation: &'static str,
    },

    /// The generic transition endpoint does not enter states owned by the
    /// assignment protocol.
    #[error("Transition to {target} must go through the assignment operations")]
    AssignmentOperationRequired { target: ServiceState },

    #[error("Invalid schedule: {reason}")]
    InvalidSchedule { reason: String },

    /// Lost a compare-and-set race that did not change the outcome class.
    #[error("Request {request_id} was modified concurrently")]
    ConcurrentModification { request_id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    pub(crate) fn request_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: EntityKind::Request,
            id: id.to_string(),
        }
    }

    pub(crate) fn technician_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: EntityKind::Technician,
            id: id.to_string(),
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::AssignmentNotPending { .. } => "ASSIGNMENT_NOT_PENDING",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::MissingRequiredField { .. } => "MISSING_REQUIRED_FIELD",
            Self::NotAssignedTechnician { .. } => "NOT_ASSIGNED_TECHNICIAN",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::AssignmentOperationRequired { .. } => "ASSIGNMENT_OPERATION_REQUIRED",
            Self::InvalidSchedule { .. } => "INVALID_SCHEDULE",
            Self::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// Whether an identical retry could succeed without refetching.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConcurrentModification { .. } => true,
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_retryability() {
        let err = DispatchError::InvalidTransition {
            from: ServiceState::Assigned,
            to: ServiceState::Resolved,
        };
        assert_eq!(err.code(), "INVALID_TRANSITION");
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Invalid transition: ASSIGNED → RESOLVED");

        let err = DispatchError::ConcurrentModification {
            request_id: "r1".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_pending_message() {
        let err = DispatchError::AssignmentNotPending {
            request_id: "r1".into(),
            status: Some(AssignmentStatus::Accepted),
        };
        assert_eq!(
            err.to_string(),
            "Assignment for request r1 is not pending (status: accepted)"
        );
        let err = DispatchError::AssignmentNotPending {
            request_id: "r1".into(),
            status: None,
        };
        assert!(err.to_string().ends_with("(status: unassigned)"));
    }
}
