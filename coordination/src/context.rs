//! Explicit per-operation context: tenant, acting user, clock.
//!
//! Every operation receives an [`OperationContext`] instead of reading
//! ambient "current tenant" or wall-clock globals, so the whole engine can
//! be driven deterministically from tests.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{Duration, FixedOffset, NaiveDateTime, Offset, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Role of the acting user.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Field technician working assigned requests.
    Technician,
    /// Dispatch desk: assigns and reassigns work.
    Dispatcher,
    /// Back-office staff (parts, approvals, billing follow-up).
    BackOffice,
    Admin,
}

impl Role {
    /// Roles allowed to assign, reassign and act on behalf of technicians.
    pub fn is_privileged(self) -> bool {
        !matches!(self, Self::Technician)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Technician => write!(f, "technician"),
            Self::Dispatcher => write!(f, "dispatcher"),
            Self::BackOffice => write!(f, "back_office"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "technician" | "tech" => Ok(Self::Technician),
            "dispatcher" | "dispatch" => Ok(Self::Dispatcher),
            "back_office" | "backoffice" => Ok(Self::BackOffice),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The authenticated user performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub roles: Vec<Role>,
}

impl Actor {
    pub fn new(id: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            id: id.into(),
            email: None,
            roles,
        }
    }

    pub fn technician(id: impl Into<String>) -> Self {
        Self::new(id, vec![Role::Technician])
    }

    pub fn dispatcher(id: impl Into<String>) -> Self {
        Self::new(id, vec![Role::Dispatcher])
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn is_privileged(&self) -> bool {
        self.roles.iter().any(|r| r.is_privileged())
    }
}

/// Source of tenant-local civil time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock shifted to the tenant's UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    /// Offsets outside ±24h fall back to UTC.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or(Utc.fix());
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::with_offset_minutes(0)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

/// Manually driven clock for tests and scripted runs.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Tenant, actor and clock threaded through every operation.
#[derive(Clone)]
pub struct OperationContext {
    pub tenant_id: String,
    pub actor: Actor,
    clock: Arc<dyn Clock>,
}

impl OperationContext {
    pub fn new(tenant_id: impl Into<String>, actor: Actor, clock: Arc<dyn Clock>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor,
            clock,
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Same tenant and clock, different actor.
    pub fn as_actor(&self, actor: Actor) -> Self {
        Self {
            tenant_id: self.tenant_id.clone(),
            actor,
            clock: Arc::clone(&self.clock),
        }
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("tenant_id", &self.tenant_id)
            .field("actor", &self.actor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_fixed_clock_advances() {
        let start = NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let clock = FixedClock::new(start);
        clock.advance(Duration::minutes(90));
        assert_eq!(clock.now(), start + Duration::minutes(90));
    }

    #[test]
    fn test_privileged_roles() {
        assert!(!Actor::technician("a").is_privileged());
        assert!(Actor::dispatcher("d").is_privileged());
        assert!(Actor::new("x", vec![Role::Technician, Role::Admin]).is_privileged());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("back-office".parse::<Role>().unwrap(), Role::BackOffice);
        assert_eq!("Dispatcher".parse::<Role>().unwrap(), Role::Dispatcher);
        assert!("customer".parse::<Role>().is_err());
    }

    #[test]
    fn test_context_as_actor_keeps_tenant() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::utc());
        let ctx = OperationContext::new("acme", Actor::dispatcher("d"), clock);
        let tech = ctx.as_actor(Actor::technician("a"));
        assert_eq!(tech.tenant_id, "acme");
        assert_eq!(tech.actor.id, "a");
    }
}
