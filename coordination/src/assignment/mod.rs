//! Assignment protocol: who works a request, and what happens when they
//! accept or decline.

pub mod coordinator;

pub use coordinator::{AssignmentCoordinator, SharedAssignmentCoordinator};
