//! Fault domains and the observations taken of them.
//!
//! Observations are plain data: the daemon's status reader fills them in,
//! the coordinator judges them, and incidents carry a copy as context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One independently monitored problem category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum FaultDomain {
    /// A named service from the catalog
    Service(String),
    /// System memory pressure
    Memory,
    /// Name resolution
    Dns,
}

impl FaultDomain {
    pub fn service(name: impl Into<String>) -> Self {
        FaultDomain::Service(name.into())
    }

    /// Short name used in file names ("ssh", "memory", "dns")
    pub fn file_stem(&self) -> &str {
        match self {
            FaultDomain::Service(name) => name,
            FaultDomain::Memory => "memory",
            FaultDomain::Dns => "dns",
        }
    }
}

impl fmt::Display for FaultDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultDomain::Service(name) => write!(f, "service:{}", name),
            FaultDomain::Memory => write!(f, "memory"),
            FaultDomain::Dns => write!(f, "dns"),
        }
    }
}

/// Service liveness as seen by a process-presence probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Active,
    Inactive,
    Unknown,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liveness::Active => "active",
            Liveness::Inactive => "inactive",
            Liveness::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceObservation {
    pub name: String,
    pub liveness: Liveness,
    pub observed_at: DateTime<Utc>,
    /// Tail of the service's log file, empty when unavailable
    #[serde(default)]
    pub log_excerpt: String,
}

impl ServiceObservation {
    pub fn new(name: impl Into<String>, liveness: Liveness) -> Self {
        Self {
            name: name.into(),
            liveness,
            observed_at: Utc::now(),
            log_excerpt: String::new(),
        }
    }

    /// Anything other than `active` calls for remediation
    pub fn needs_remediation(&self) -> bool {
        self.liveness != Liveness::Active
    }
}

/// One row of the ranked process list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub owner: String,
    pub pid: u32,
    pub cpu_percent: f32,
    pub mem_percent: f32,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryObservation {
    /// 0-100
    pub used_percent: f64,
    /// Ordered by memory share, largest first
    pub top_processes: Vec<ProcessEntry>,
    #[serde(default)]
    pub kernel_log: String,
    pub critical_threshold: f64,
    pub observed_at: DateTime<Utc>,
}

impl MemoryObservation {
    pub fn new(used_percent: f64, critical_threshold: f64) -> Self {
        Self {
            used_percent,
            top_processes: Vec::new(),
            kernel_log: String::new(),
            critical_threshold,
            observed_at: Utc::now(),
        }
    }

    /// Strictly above the threshold; equal is not critical.
    pub fn is_critical(&self) -> bool {
        self.used_percent > self.critical_threshold
    }
}

/// `(total - available) / total * 100`, or `None` when the totals are unusable.
pub fn used_percent(total: u64, available: u64) -> Option<f64> {
    if total == 0 || available > total {
        return None;
    }
    Some((total - available) as f64 / total as f64 * 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsObservation {
    pub resolution_works: bool,
    /// Reachability of a well-known IP literal, independent of name resolution
    pub ip_reachable: bool,
    /// Resolver configuration file contents, empty when unreadable
    #[serde(default)]
    pub raw_config: String,
    pub observed_at: DateTime<Utc>,
}

impl DnsObservation {
    pub fn new(resolution_works: bool, ip_reachable: bool, raw_config: impl Into<String>) -> Self {
        Self {
            resolution_works,
            ip_reachable,
            raw_config: raw_config.into(),
            observed_at: Utc::now(),
        }
    }
}

/// A snapshot of one fault domain, as handed to diagnosis and recorded in incidents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "lowercase")]
pub enum Observation {
    Service(ServiceObservation),
    Memory(MemoryObservation),
    Dns(DnsObservation),
}

impl Observation {
    pub fn domain(&self) -> FaultDomain {
        match self {
            Observation::Service(obs) => FaultDomain::Service(obs.name.clone()),
            Observation::Memory(_) => FaultDomain::Memory,
            Observation::Dns(_) => FaultDomain::Dns,
        }
    }

    /// One-line status prior to any fix
    pub fn status_line(&self) -> String {
        match self {
            Observation::Service(obs) => obs.liveness.to_string(),
            Observation::Memory(obs) => format!(
                "{:.2}% used (critical above {}%)",
                obs.used_percent, obs.critical_threshold
            ),
            Observation::Dns(obs) => format!(
                "resolution {}, ip {}",
                if obs.resolution_works { "working" } else { "failing" },
                if obs.ip_reachable { "reachable" } else { "unreachable" }
            ),
        }
    }

    /// Diagnostic context; every free-text excerpt is cut to its last `max_chars`.
    pub fn render_context(&self, max_chars: usize) -> String {
        match self {
            Observation::Service(obs) => {
                let logs = if obs.log_excerpt.is_empty() {
                    "No logs available for this service"
                } else {
                    tail_chars(&obs.log_excerpt, max_chars)
                };
                format!(
                    "SERVICE: {}\nCURRENT STATUS: {}\n\nRECENT LOGS:\n{}\n",
                    obs.name, obs.liveness, logs
                )
            }
            Observation::Memory(obs) => {
                let mut out = format!("Memory Usage: {:.2}%\n\n", obs.used_percent);
                out.push_str("Recent kernel log:\n");
                out.push_str(tail_chars(&obs.kernel_log, max_chars));
                out.push_str("\n\nTop Memory-Consuming Processes:\n");
                out.push_str("USER PID %CPU %MEM COMMAND\n");
                for p in &obs.top_processes {
                    out.push_str(&format!(
                        "{} {} {:.1} {:.1} {}\n",
                        p.owner, p.pid, p.cpu_percent, p.mem_percent, p.command
                    ));
                }
                out
            }
            Observation::Dns(obs) => format!(
                "DNS resolution working: {}\nIP connectivity (probe address) working: {}\n\nResolver configuration:\n{}\n",
                obs.resolution_works,
                obs.ip_reachable,
                if obs.raw_config.is_empty() {
                    "(empty or unreadable)"
                } else {
                    tail_chars(&obs.raw_config, max_chars)
                }
            ),
        }
    }
}

/// Result of one remediation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed,
    Skipped,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "SUCCESS",
            Outcome::Failed => "FAILED",
            Outcome::Skipped => "SKIPPED",
        }
    }

    /// Fold several per-action outcomes into one: any failure wins,
    /// all-skipped stays skipped, an empty list is a successful no-op.
    pub fn combine(outcomes: &[Outcome]) -> Outcome {
        if outcomes.iter().any(|o| *o == Outcome::Failed) {
            Outcome::Failed
        } else if !outcomes.is_empty() && outcomes.iter().all(|o| *o == Outcome::Skipped) {
            Outcome::Skipped
        } else {
            Outcome::Succeeded
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last `max_chars` characters of `s`, on a char boundary.
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}
