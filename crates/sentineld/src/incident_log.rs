//! Incident persistence.
//!
//! One human-readable file per incident, plus an append-only
//! `incidents.jsonl` index with the full record. Writes are serialized so
//! concurrent remediations of different domains never interleave lines.

use anyhow::{Context, Result};
use sentinel_common::Incident;
use std::path::PathBuf;
use tokio::fs::{create_dir_all, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

pub const INCIDENT_INDEX_FILE: &str = "incidents.jsonl";

pub struct IncidentLog {
    dir: PathBuf,
    context_chars: usize,
    write_lock: Mutex<()>,
}

impl IncidentLog {
    pub fn new(dir: impl Into<PathBuf>, context_chars: usize) -> Self {
        Self {
            dir: dir.into(),
            context_chars,
            write_lock: Mutex::new(()),
        }
    }

    /// Persist an incident. Failures are logged, never returned: a full disk
    /// must not stop remediation.
    pub async fn record(&self, incident: &Incident) -> Option<PathBuf> {
        let _guard = self.write_lock.lock().await;
        match self.write(incident).await {
            Ok(path) => {
                debug!("Incident {} written to {}", incident.id, path.display());
                Some(path)
            }
            Err(e) => {
                error!("Failed to record incident for {}: {:#}", incident.domain, e);
                None
            }
        }
    }

    async fn write(&self, incident: &Incident) -> Result<PathBuf> {
        create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.dir.join(incident.file_name());
        tokio::fs::write(&path, incident.render(self.context_chars))
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        let json = serde_json::to_string(incident).context("Failed to serialize incident")? + "\n";
        let mut index = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(INCIDENT_INDEX_FILE))
            .await
            .context("Failed to open incident index")?;
        index
            .write_all(json.as_bytes())
            .await
            .context("Failed to append to incident index")?;
        index.sync_all().await.context("Failed to sync incident index")?;

        Ok(path)
    }

    /// All indexed incidents, oldest first. Corrupt lines are skipped.
    pub async fn load_all(&self) -> Result<Vec<Incident>> {
        let path = self.dir.join(INCIDENT_INDEX_FILE);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        let mut incidents = Vec::new();
        for (n, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Incident>(line) {
                Ok(incident) => incidents.push(incident),
                Err(e) => warn!("Skipping corrupt incident index line {}: {}", n + 1, e),
            }
        }
        Ok(incidents)
    }
}
