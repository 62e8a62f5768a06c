//! Resolver configuration reset.
//!
//! The one file the daemon is allowed to write outside its state directory.
//! The original contents are backed up once; later resets never overwrite
//! the backup. Resetting an already-reset file changes nothing.

use anyhow::{Context, Result};
use sentinel_common::{ConfigError, DnsConfig};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Contents already matched the known-good configuration
    Unchanged { backed_up: bool },
    Rewritten { backed_up: bool },
}

impl ResetOutcome {
    pub fn describe(&self) -> &'static str {
        match self {
            ResetOutcome::Unchanged { backed_up: true } => "backed up; resolver configuration already in known-good state",
            ResetOutcome::Unchanged { backed_up: false } => "resolver configuration already in known-good state",
            ResetOutcome::Rewritten { backed_up: true } => "backed up and rewrote resolver configuration",
            ResetOutcome::Rewritten { backed_up: false } => "rewrote resolver configuration (backup already present)",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfigFile {
    path: PathBuf,
    backup_path: PathBuf,
    nameservers: Vec<IpAddr>,
}

impl ResolverConfigFile {
    pub fn new(path: PathBuf, backup_path: PathBuf, nameservers: Vec<IpAddr>) -> Self {
        Self {
            path,
            backup_path,
            nameservers,
        }
    }

    pub fn from_config(config: &DnsConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.resolv_conf.clone(),
            config.backup_path.clone(),
            config.nameserver_ips()?,
        ))
    }

    pub fn desired_contents(&self) -> String {
        let mut out = String::from("# Managed by sentineld\n");
        for ns in &self.nameservers {
            out.push_str(&format!("nameserver {}\n", ns));
        }
        out
    }

    /// Back up (first time only), then write the known-good nameservers.
    pub async fn reset(&self) -> Result<ResetOutcome> {
        let current = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };

        let mut backed_up = false;
        if let Some(contents) = &current {
            let exists = tokio::fs::try_exists(&self.backup_path)
                .await
                .with_context(|| format!("Failed to check backup {}", self.backup_path.display()))?;
            if !exists {
                tokio::fs::write(&self.backup_path, contents)
                    .await
                    .with_context(|| format!("Failed to back up to {}", self.backup_path.display()))?;
                info!("Backed up {} to {}", self.path.display(), self.backup_path.display());
                backed_up = true;
            }
        }

        let desired = self.desired_contents();
        if current.as_deref() == Some(desired.as_str()) {
            return Ok(ResetOutcome::Unchanged { backed_up });
        }

        tokio::fs::write(&self.path, &desired)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        info!("Reset {} to known-good nameservers", self.path.display());
        Ok(ResetOutcome::Rewritten { backed_up })
    }
}
