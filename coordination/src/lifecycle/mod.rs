//! Service-request lifecycle: the 13-state table and the functions that
//! apply it.

pub mod machine;
pub mod state;

pub use machine::{
    available_transitions, is_consistent, options_from, reenter_assigned, replay,
    required_fields, transition, RequiredField, TransitionOption, TransitionPayload,
};
pub use state::{ServiceState, StateMeta, Tone, UnknownState};
