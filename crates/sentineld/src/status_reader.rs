//! Host status reader.
//!
//! Produces observations for the three fault domains. Every failure to
//! observe is absorbed here: a service that cannot be probed reads as
//! `unknown`, unreadable memory totals yield no observation, and a DNS probe
//! that errors reads as "not working".
//!
//! `HostStatusReader` touches the real host; `FakeHostProbe` replays
//! scripted observations for tests.

use async_trait::async_trait;
use sentinel_common::domain::{tail_chars, used_percent};
use sentinel_common::{
    DnsObservation, Liveness, MemoryObservation, ProcessEntry, SentinelConfig, ServiceObservation,
    ServiceSpec,
};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use sysinfo::{System, Users};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tracing::{debug, warn};

const DNS_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);
const IP_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const IP_PROBE_PORT: u16 = 53;

/// Observation failures. Never escape the reader.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("memory statistics unavailable")]
    MemoryUnavailable,

    #[error("background probe task failed: {0}")]
    Join(String),
}

// ============================================================================
// Probe Trait
// ============================================================================

/// Read-only view of host health
#[async_trait]
pub trait HostProbe: Send + Sync {
    /// Liveness of a catalogued service; names outside the catalog read as unknown
    async fn poll_service(&self, name: &str) -> ServiceObservation;

    /// `None` when memory totals cannot be read
    async fn poll_memory(&self) -> Option<MemoryObservation>;

    async fn poll_dns(&self) -> DnsObservation;
}

// ============================================================================
// Real Host Reader (Production)
// ============================================================================

pub struct HostStatusReader {
    services: Vec<ServiceSpec>,
    critical_threshold: f64,
    top_processes: usize,
    excerpt_chars: usize,
    probe_host: String,
    probe_ip: IpAddr,
    resolv_conf: PathBuf,
    system: Arc<Mutex<System>>,
}

impl HostStatusReader {
    pub fn from_config(config: &SentinelConfig) -> anyhow::Result<Self> {
        Ok(Self {
            services: config.services.clone(),
            critical_threshold: config.memory.critical_threshold,
            top_processes: config.memory.top_processes,
            excerpt_chars: config.memory.log_excerpt_chars,
            probe_host: config.dns.probe_host.clone(),
            probe_ip: config.dns.probe_ip()?,
            resolv_conf: config.dns.resolv_conf.clone(),
            system: Arc::new(Mutex::new(System::new())),
        })
    }

    async fn liveness(&self, spec: &ServiceSpec) -> Result<Liveness, ProbeError> {
        let status = Command::new("pgrep")
            .arg(&spec.process)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|source| ProbeError::Spawn {
                program: "pgrep".to_string(),
                source,
            })?;

        Ok(match status.code() {
            Some(0) => Liveness::Active,
            Some(1) => Liveness::Inactive,
            _ => Liveness::Unknown,
        })
    }

    async fn kernel_log(&self) -> Result<String, ProbeError> {
        let output = Command::new("dmesg")
            .arg("-T")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ProbeError::Spawn {
                program: "dmesg".to_string(),
                source,
            })?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(tail_chars(&text, self.excerpt_chars).to_string())
    }

    async fn resolution_works(&self) -> bool {
        let target = format!("{}:80", self.probe_host);
        match tokio::time::timeout(DNS_LOOKUP_TIMEOUT, tokio::net::lookup_host(target)).await {
            Ok(Ok(mut addrs)) => addrs.next().is_some(),
            Ok(Err(e)) => {
                debug!("DNS lookup for {} failed: {}", self.probe_host, e);
                false
            }
            Err(_) => {
                debug!("DNS lookup for {} timed out", self.probe_host);
                false
            }
        }
    }

    async fn ip_reachable(&self) -> bool {
        let addr = SocketAddr::new(self.probe_ip, IP_PROBE_PORT);
        matches!(
            tokio::time::timeout(IP_PROBE_TIMEOUT, tokio::net::TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl HostProbe for HostStatusReader {
    async fn poll_service(&self, name: &str) -> ServiceObservation {
        let Some(spec) = self.services.iter().find(|s| s.name == name) else {
            warn!("Service {} is not in the catalog", name);
            return ServiceObservation::new(name, Liveness::Unknown);
        };

        let liveness = match self.liveness(spec).await {
            Ok(liveness) => liveness,
            Err(e) => {
                warn!("Cannot probe service {}: {}", name, e);
                Liveness::Unknown
            }
        };

        let mut observation = ServiceObservation::new(name, liveness);
        if let Some(path) = &spec.log_path {
            match read_log_tail(path, self.excerpt_chars).await {
                Ok(tail) => observation.log_excerpt = tail,
                Err(e) => debug!("No log excerpt for {}: {}", name, e),
            }
        }
        observation
    }

    async fn poll_memory(&self) -> Option<MemoryObservation> {
        let system = Arc::clone(&self.system);
        let top = self.top_processes;
        let sampled = tokio::task::spawn_blocking(move || {
            let mut sys = system.lock().unwrap_or_else(PoisonError::into_inner);
            sample_memory(&mut sys, top)
        })
        .await
        .map_err(|e| ProbeError::Join(e.to_string()))
        .and_then(|r| r);

        let (used, processes) = match sampled {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Cannot read memory usage: {}", e);
                return None;
            }
        };

        let mut observation = MemoryObservation::new(used, self.critical_threshold);
        observation.top_processes = processes;
        if observation.is_critical() {
            match self.kernel_log().await {
                Ok(log) => observation.kernel_log = log,
                Err(e) => debug!("Kernel log unavailable: {}", e),
            }
        }
        Some(observation)
    }

    async fn poll_dns(&self) -> DnsObservation {
        let (resolution_works, ip_reachable) =
            tokio::join!(self.resolution_works(), self.ip_reachable());

        let raw_config = match tokio::fs::read_to_string(&self.resolv_conf).await {
            Ok(contents) => contents,
            Err(source) => {
                let e = ProbeError::Read {
                    path: self.resolv_conf.clone(),
                    source,
                };
                debug!("{}", e);
                String::new()
            }
        };

        DnsObservation::new(resolution_works, ip_reachable, raw_config)
    }
}

fn sample_memory(sys: &mut System, top: usize) -> Result<(f64, Vec<ProcessEntry>), ProbeError> {
    sys.refresh_memory();
    let total = sys.total_memory();
    let used = used_percent(total, sys.available_memory()).ok_or(ProbeError::MemoryUnavailable)?;

    sys.refresh_processes();
    let users = Users::new_with_refreshed_list();
    let mut processes: Vec<ProcessEntry> = sys
        .processes()
        .iter()
        .map(|(pid, process)| {
            let owner = process
                .user_id()
                .and_then(|uid| users.get_user_by_id(uid))
                .map(|user| user.name().to_string())
                .unwrap_or_else(|| "?".to_string());
            let command = if process.cmd().is_empty() {
                process.name().to_string()
            } else {
                process.cmd().join(" ")
            };
            ProcessEntry {
                owner,
                pid: pid.as_u32(),
                cpu_percent: process.cpu_usage(),
                mem_percent: (process.memory() as f64 / total as f64 * 100.0) as f32,
                command,
            }
        })
        .collect();

    processes.sort_by(|a, b| b.mem_percent.total_cmp(&a.mem_percent));
    processes.truncate(top);
    Ok((used, processes))
}

/// Last `max_chars` characters of a log file, reading only its end.
pub async fn read_log_tail(path: &Path, max_chars: usize) -> Result<String, ProbeError> {
    let read_err = |source| ProbeError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::open(path).await.map_err(read_err)?;
    let len = file.metadata().await.map_err(read_err)?.len();
    // A UTF-8 char is at most 4 bytes
    let window = (max_chars as u64).saturating_mul(4);
    if len > window {
        file.seek(SeekFrom::Start(len - window)).await.map_err(read_err)?;
    }

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await.map_err(read_err)?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(tail_chars(&text, max_chars).to_string())
}

// ============================================================================
// Fake Host Probe (Testing)
// ============================================================================

/// Scripted observations. Each sequence is consumed in order and its last
/// entry repeats.
#[derive(Default)]
pub struct FakeHostProbe {
    services: Mutex<HashMap<String, Vec<Liveness>>>,
    memory: Mutex<Vec<Option<MemoryObservation>>>,
    dns: Mutex<Vec<DnsObservation>>,
    dns_polls: AtomicUsize,
}

impl FakeHostProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(self, name: &str, sequence: Vec<Liveness>) -> Self {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), sequence);
        self
    }

    pub fn with_memory(self, sequence: Vec<Option<MemoryObservation>>) -> Self {
        *self.memory.lock().unwrap_or_else(PoisonError::into_inner) = sequence;
        self
    }

    /// `(resolution_works, ip_reachable)` per poll
    pub fn with_dns(self, sequence: &[(bool, bool)]) -> Self {
        *self.dns.lock().unwrap_or_else(PoisonError::into_inner) = sequence
            .iter()
            .map(|(resolves, reachable)| DnsObservation::new(*resolves, *reachable, "nameserver 10.255.255.1\n"))
            .collect();
        self
    }

    pub fn dns_poll_count(&self) -> usize {
        self.dns_polls.load(Ordering::SeqCst)
    }
}

fn next_sticky<T: Clone>(sequence: &mut Vec<T>) -> Option<T> {
    match sequence.len() {
        0 => None,
        1 => Some(sequence[0].clone()),
        _ => Some(sequence.remove(0)),
    }
}

#[async_trait]
impl HostProbe for FakeHostProbe {
    async fn poll_service(&self, name: &str) -> ServiceObservation {
        let mut services = self.services.lock().unwrap_or_else(PoisonError::into_inner);
        let liveness = services
            .get_mut(name)
            .and_then(next_sticky)
            .unwrap_or(Liveness::Unknown);
        ServiceObservation::new(name, liveness)
    }

    async fn poll_memory(&self) -> Option<MemoryObservation> {
        let mut memory = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
        next_sticky(&mut memory).flatten()
    }

    async fn poll_dns(&self) -> DnsObservation {
        self.dns_polls.fetch_add(1, Ordering::SeqCst);
        let mut dns = self.dns.lock().unwrap_or_else(PoisonError::into_inner);
        next_sticky(&mut dns).unwrap_or_else(|| DnsObservation::new(true, true, ""))
    }
}
