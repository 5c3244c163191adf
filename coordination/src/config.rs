//! Engine configuration.
//!
//! `DispatchConfig::default()` starts from built-in values and applies
//! `DISPATCH_*` environment overrides. A TOML file layered on top only
//! needs the keys it changes.

use std::path::Path;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};

use crate::advisor::AdvisorWeights;
use crate::context::{Role, SystemClock};

/// Ten years, in minutes.
const MAX_ACCEPTANCE_SLA_MINUTES: i64 = 10 * 366 * 24 * 60;
/// Ten years, in days.
const MAX_DECLINE_LOOKBACK_DAYS: i64 = 10 * 366;
/// `FixedOffset` accepts strictly less than a day either way.
const MAX_UTC_OFFSET_MINUTES: i32 = 24 * 60 - 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// Minutes a pending assignment may wait before it escalates.
    pub acceptance_sla_minutes: i64,
    /// Trailing window for counting a technician's recent declines.
    pub decline_lookback_days: i64,
    /// Deadline for each directory/workload lookup made by the advisor.
    pub lookup_timeout_ms: u64,
    /// Offset of the tenant's civil time from UTC.
    pub tenant_utc_offset_minutes: i32,
    /// Who hears about a decline.
    pub decline_notify_roles: Vec<Role>,
    pub advisor: AdvisorWeights,
}

impl DispatchConfig {
    /// Built-in values, ignoring the environment.
    pub fn builtin() -> Self {
        Self {
            acceptance_sla_minutes: 240,
            decline_lookback_days: 30,
            lookup_timeout_ms: 2000,
            tenant_utc_offset_minutes: 0,
            decline_notify_roles: vec![Role::Dispatcher, Role::BackOffice],
            advisor: AdvisorWeights::default(),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_ACCEPTANCE_SLA_MINUTES).contains(&self.acceptance_sla_minutes) {
            return Err(ConfigError::Invalid {
                key: "acceptance_sla_minutes",
                reason: format!("must be between 1 and {MAX_ACCEPTANCE_SLA_MINUTES}"),
            });
        }
        if !(0..=MAX_DECLINE_LOOKBACK_DAYS).contains(&self.decline_lookback_days) {
            return Err(ConfigError::Invalid {
                key: "decline_lookback_days",
                reason: format!("must be between 0 and {MAX_DECLINE_LOOKBACK_DAYS}"),
            });
        }
        if self.lookup_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "lookup_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        let offsets = -MAX_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES;
        if !offsets.contains(&self.tenant_utc_offset_minutes) {
            return Err(ConfigError::Invalid {
                key: "tenant_utc_offset_minutes",
                reason: format!("must be within ±{MAX_UTC_OFFSET_MINUTES}"),
            });
        }
        self.advisor.validate()
    }

    pub fn acceptance_sla(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.acceptance_sla_minutes.clamp(0, MAX_ACCEPTANCE_SLA_MINUTES))
    }

    pub fn decline_lookback(&self) -> ChronoDuration {
        ChronoDuration::days(self.decline_lookback_days.clamp(0, MAX_DECLINE_LOOKBACK_DAYS))
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    /// Wall clock in the tenant's civil time.
    pub fn clock(&self) -> SystemClock {
        SystemClock::with_offset_minutes(self.tenant_utc_offset_minutes)
    }

    fn with_env_overrides(mut self) -> Self {
        self.acceptance_sla_minutes =
            env_or("DISPATCH_ACCEPTANCE_SLA_MINUTES", self.acceptance_sla_minutes);
        self.decline_lookback_days =
            env_or("DISPATCH_DECLINE_LOOKBACK_DAYS", self.decline_lookback_days);
        self.lookup_timeout_ms = env_or("DISPATCH_LOOKUP_TIMEOUT_MS", self.lookup_timeout_ms);
        self.tenant_utc_offset_minutes = env_or(
            "DISPATCH_TENANT_UTC_OFFSET_MINUTES",
            self.tenant_utc_offset_minutes,
        );
        if let Ok(raw) = std::env::var("DISPATCH_DECLINE_NOTIFY_ROLES") {
            match parse_roles(&raw) {
                Ok(roles) => self.decline_notify_roles = roles,
                Err(e) => tracing::warn!(error = %e, "Ignoring DISPATCH_DECLINE_NOTIFY_ROLES"),
            }
        }
        self
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::builtin().with_env_overrides()
    }
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
            fallback
        }),
        Err(_) => fallback,
    }
}

/// Comma-separated role list ("dispatcher,back_office").
pub fn parse_roles(raw: &str) -> Result<Vec<Role>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}
