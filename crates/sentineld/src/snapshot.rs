//! Status snapshot published once per tick.
//!
//! `status.json` in the state directory is the read-only interface for
//! dashboards. It is replaced atomically (write to a temp file, then
//! rename) so readers never see a partial document.

use crate::state::DaemonState;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sentinel_common::{FaultDomain, ProcessEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

pub const STATUS_FILE: &str = "status.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsStatus {
    pub resolution_works: bool,
    pub ip_reachable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Percent, absent when memory could not be read
    pub memory_usage: Option<f64>,
    /// Service name to "active" / "inactive" / "unknown"
    pub service_status: BTreeMap<String, String>,
    pub top_processes: Vec<ProcessEntry>,
    #[serde(default)]
    pub dns: Option<DnsStatus>,
    /// Domains with a remediation attempt in flight
    #[serde(default)]
    pub remediations_in_flight: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn from_state(state: &DaemonState, in_flight: &[FaultDomain]) -> Self {
        Self {
            memory_usage: state.memory.as_ref().map(|m| m.used_percent),
            service_status: state
                .services
                .iter()
                .map(|(name, obs)| (name.clone(), obs.liveness.to_string()))
                .collect(),
            top_processes: state
                .memory
                .as_ref()
                .map(|m| m.top_processes.clone())
                .unwrap_or_default(),
            dns: state.dns.as_ref().map(|d| DnsStatus {
                resolution_works: d.resolution_works,
                ip_reachable: d.ip_reachable,
            }),
            remediations_in_flight: in_flight.iter().map(|d| d.to_string()).collect(),
            timestamp: Utc::now(),
        }
    }
}

pub struct StatusSnapshotWriter {
    path: PathBuf,
}

impl StatusSnapshotWriter {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(STATUS_FILE),
        }
    }

    /// Build and write the snapshot. Write failures are logged only.
    pub async fn publish(&self, state: &DaemonState, in_flight: &[FaultDomain]) -> StatusSnapshot {
        let snapshot = StatusSnapshot::from_state(state, in_flight);
        if let Err(e) = self.write(&snapshot).await {
            error!("Failed to publish status snapshot: {:#}", e);
        }
        snapshot
    }

    async fn write(&self, snapshot: &StatusSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize status")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!("Published status snapshot to {}", self.path.display());
        Ok(())
    }

    pub async fn read(&self) -> Result<StatusSnapshot> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse status snapshot")
    }
}
