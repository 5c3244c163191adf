//! Escalation: assignments nobody answered in time.
//!
//! ```text
//! ASSIGNED (pending) ──── elapsed < threshold ───▶ not reported
//!        │
//!        └──────────── elapsed ≥ threshold ───▶ EscalationItem
//! ```
//!
//! The threshold is the tenant's acceptance SLA (`acceptance_sla_minutes`).

pub mod monitor;

pub use monitor::{EscalationItem, EscalationMonitor};
