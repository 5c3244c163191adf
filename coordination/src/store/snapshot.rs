//! JSON snapshot of a [`MemoryStore`], used by the CLI between runs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{MemoryStore, StoreError, StoreResult};
use crate::lifecycle::is_consistent;
use crate::model::{
    AssignmentSlaLog, Notification, ScheduleEntry, ServiceRequest, TechnicianProfile,
};

const SNAPSHOT_VERSION: u32 = 1;

/// Everything a [`MemoryStore`] holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub requests: Vec<ServiceRequest>,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
    #[serde(default)]
    pub sla_logs: Vec<AssignmentSlaLog>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub technicians: Vec<TechnicianProfile>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl StoreSnapshot {
    pub fn capture(store: &MemoryStore) -> StoreResult<Self> {
        Ok(Self {
            version: SNAPSHOT_VERSION,
            requests: store.requests()?,
            schedule: store.schedule_entries()?,
            sla_logs: store.sla_logs()?,
            notifications: store.notifications()?,
            technicians: store.technicians()?,
        })
    }

    /// Check that every request's history replays to its cached state.
    pub fn verify(&self) -> StoreResult<()> {
        if self.version > SNAPSHOT_VERSION {
            return Err(StoreError::Inconsistent(format!(
                "snapshot version {} is newer than supported {}",
                self.version, SNAPSHOT_VERSION
            )));
        }
        match self.requests.iter().find(|r| !is_consistent(r)) {
            Some(bad) => Err(StoreError::Inconsistent(format!(
                "request {} history does not replay to {}",
                bad.id, bad.current_state
            ))),
            None => Ok(()),
        }
    }

    pub fn into_store(self) -> MemoryStore {
        MemoryStore::from_parts(
            self.requests,
            self.schedule,
            self.sla_logs,
            self.notifications,
            self.technicians,
        )
    }

    /// Load and verify a snapshot. A missing file yields an empty snapshot.
    pub fn load(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            return Ok(Self::default_current());
        }

        let json = std::fs::read_to_string(path)?;
        let snapshot: Self =
            serde_json::from_str(&json).map_err(|e| StoreError::Serialization(e.to_string()))?;
        snapshot.verify()?;

        tracing::debug!(
            path = %path.display(),
            requests = snapshot.requests.len(),
            "Loaded store snapshot"
        );
        Ok(snapshot)
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    fn default_current() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            ..Default::default()
        }
    }
}
