//! Degraded-mode results for read-only scans.
//!
//! The advisor and the escalation monitor never fail outright: when a
//! collaborator errors or times out they return whatever they could
//! compute, tagged with a [`DegradationLevel`] and warnings.
//!
//! ```text
//! scan
//!   ├─ every lookup succeeds  → DegradedResponse { level: Full, .. }
//!   ├─ some lookups fail      → DegradedResponse { level: Partial, warnings, .. }
//!   └─ primary source fails   → DegradedResponse { level: Unavailable, payload: empty, .. }
//! ```

use std::future::Future;
use std::time::Duration;

use chrono::NaiveDateTime;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::store::StoreResult;

/// How much of the result could be computed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// Every input was read.
    Full,
    /// Some inputs were missing; the payload is best-effort.
    Partial,
    /// The primary source failed; the payload is empty.
    Unavailable,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// A scan result wrapped with degradation metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DegradedResponse<T> {
    pub payload: T,
    pub level: DegradationLevel,
    /// Component that produced the payload.
    pub served_by: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Tenant-local time the payload was computed at.
    pub produced_at: NaiveDateTime,
}

impl<T> DegradedResponse<T> {
    pub fn full(payload: T, served_by: &str, produced_at: NaiveDateTime) -> Self {
        Self {
            payload,
            level: DegradationLevel::Full,
            served_by: served_by.to_string(),
            warnings: Vec::new(),
            produced_at,
        }
    }

    /// Full when `warnings` is empty, partial otherwise.
    pub fn with_warnings(
        payload: T,
        served_by: &str,
        warnings: Vec<String>,
        produced_at: NaiveDateTime,
    ) -> Self {
        let level = if warnings.is_empty() {
            DegradationLevel::Full
        } else {
            DegradationLevel::Partial
        };
        Self {
            payload,
            level,
            served_by: served_by.to_string(),
            warnings,
            produced_at,
        }
    }

    pub fn unavailable(
        payload: T,
        served_by: &str,
        warning: String,
        produced_at: NaiveDateTime,
    ) -> Self {
        Self {
            payload,
            level: DegradationLevel::Unavailable,
            served_by: served_by.to_string(),
            warnings: vec![warning],
            produced_at,
        }
    }

    pub fn is_full(&self) -> bool {
        self.level == DegradationLevel::Full
    }

    pub fn is_degraded(&self) -> bool {
        self.level != DegradationLevel::Full
    }
}

/// Run a store lookup under a deadline, flattening timeout and store
/// failures into a warning string.
pub async fn bounded<T, F>(what: &str, limit: Duration, fut: F) -> Result<T, String>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{what} failed: {e}")),
        Err(_) => Err(format!("{what} timed out after {}ms", limit.as_millis())),
    }
}
