//! Configuration management for sentineld.
//!
//! Loads settings from /etc/sentinel/config.toml or uses defaults.

use crate::command_whitelist::is_safe_service_name;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/sentinel/config.toml";

/// Shortest allowed pause between DNS repair attempts
pub const MIN_SETTLE_SECS: u64 = 5;

/// Upper bound on DNS repair attempts per session
pub const MAX_DNS_ATTEMPTS: u32 = 3;

/// Invalid configuration values
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("memory.critical_threshold must be within 0..=100, got {0}")]
    ThresholdOutOfRange(f64),

    #[error("dns.settle_secs must be at least 5, got {0}")]
    SettleTooShort(u64),

    #[error("dns.max_attempts must be within 1..=3, got {0}")]
    AttemptsOutOfRange(u32),

    #[error("dns.nameservers must not be empty")]
    NoNameservers,

    #[error("invalid IP address '{0}'")]
    InvalidIp(String),

    #[error("unsafe service name '{0}'")]
    UnsafeServiceName(String),

    #[error("tick intervals must be non-zero")]
    ZeroInterval,
}

/// Reasoning service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerConfig {
    /// Messages API endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-call timeout in seconds
    #[serde(default = "default_reasoner_timeout")]
    pub timeout_secs: u64,

    /// Credential; takes precedence over `api_key_env`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable consulted when `api_key` is unset
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// `ip:port` used to reach the endpoint host without name resolution
    #[serde(default)]
    pub resolve_override: Option<String>,
}

fn default_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_model() -> String {
    "claude-3-7-sonnet-latest".to_string()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_reasoner_timeout() -> u64 {
    10
}

fn default_api_key_env() -> String {
    "CLAUDE_API_KEY".to_string()
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_reasoner_timeout(),
            api_key: None,
            api_key_env: default_api_key_env(),
            resolve_override: None,
        }
    }
}

impl ReasonerConfig {
    /// Configured credential, else the environment. Empty strings count as absent.
    pub fn credential(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Memory domain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Remediation triggers strictly above this percentage
    #[serde(default = "default_threshold")]
    pub critical_threshold: f64,

    /// Rows kept in the ranked process list
    #[serde(default = "default_top_processes")]
    pub top_processes: usize,

    /// Character budget for log excerpts in prompts and incidents
    #[serde(default = "default_excerpt_chars")]
    pub log_excerpt_chars: usize,
}

fn default_threshold() -> f64 {
    90.0
}

fn default_top_processes() -> usize {
    10
}

fn default_excerpt_chars() -> usize {
    1000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            critical_threshold: default_threshold(),
            top_processes: default_top_processes(),
            log_excerpt_chars: default_excerpt_chars(),
        }
    }
}

/// DNS domain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Hostname whose resolution is probed
    #[serde(default = "default_probe_host")]
    pub probe_host: String,

    /// IP literal probed for raw connectivity
    #[serde(default = "default_probe_ip")]
    pub probe_ip: String,

    #[serde(default = "default_resolv_conf")]
    pub resolv_conf: PathBuf,

    /// Written once, before the first reset
    #[serde(default = "default_backup_path")]
    pub backup_path: PathBuf,

    /// Known-good nameservers written by a reset
    #[serde(default = "default_nameservers")]
    pub nameservers: Vec<String>,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts, in seconds
    #[serde(default = "default_settle")]
    pub settle_secs: u64,
}

fn default_probe_host() -> String {
    "google.com".to_string()
}

fn default_probe_ip() -> String {
    "8.8.8.8".to_string()
}

fn default_resolv_conf() -> PathBuf {
    PathBuf::from("/etc/resolv.conf")
}

fn default_backup_path() -> PathBuf {
    PathBuf::from("/etc/resolv.conf.bak")
}

fn default_nameservers() -> Vec<String> {
    vec!["8.8.8.8".to_string(), "1.1.1.1".to_string()]
}

fn default_max_attempts() -> u32 {
    MAX_DNS_ATTEMPTS
}

fn default_settle() -> u64 {
    MIN_SETTLE_SECS
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            probe_host: default_probe_host(),
            probe_ip: default_probe_ip(),
            resolv_conf: default_resolv_conf(),
            backup_path: default_backup_path(),
            nameservers: default_nameservers(),
            max_attempts: default_max_attempts(),
            settle_secs: default_settle(),
        }
    }
}

impl DnsConfig {
    pub fn probe_ip(&self) -> Result<IpAddr, ConfigError> {
        self.probe_ip
            .parse()
            .map_err(|_| ConfigError::InvalidIp(self.probe_ip.clone()))
    }

    pub fn nameserver_ips(&self) -> Result<Vec<IpAddr>, ConfigError> {
        if self.nameservers.is_empty() {
            return Err(ConfigError::NoNameservers);
        }
        self.nameservers
            .iter()
            .map(|ns| ns.parse().map_err(|_| ConfigError::InvalidIp(ns.clone())))
            .collect()
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

/// One catalogued service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    /// Process name checked for presence
    pub process: String,
    /// Log file whose tail is attached to diagnoses
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

impl ServiceSpec {
    pub fn new(name: &str, process: &str, log_path: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            process: process.to_string(),
            log_path: log_path.map(PathBuf::from),
        }
    }
}

fn default_services() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec::new("ssh", "sshd", Some("/var/log/auth.log")),
        ServiceSpec::new("apache2", "apache2", Some("/var/log/apache2/error.log")),
    ]
}

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// false = dry-run: log commands instead of executing them
    #[serde(default = "default_auto_fix")]
    pub auto_fix: bool,

    /// Incidents, incident index and status snapshot live here
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_tick")]
    pub tick_interval_secs: u64,

    #[serde(default = "default_dns_interval")]
    pub dns_check_interval_secs: u64,

    #[serde(default)]
    pub reasoner: ReasonerConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub dns: DnsConfig,

    #[serde(default = "default_services")]
    pub services: Vec<ServiceSpec>,
}

fn default_auto_fix() -> bool {
    true
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/log/self-healing")
}

fn default_tick() -> u64 {
    10
}

fn default_dns_interval() -> u64 {
    30
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            auto_fix: default_auto_fix(),
            state_dir: default_state_dir(),
            tick_interval_secs: default_tick(),
            dns_check_interval_secs: default_dns_interval(),
            reasoner: ReasonerConfig::default(),
            memory: MemoryConfig::default(),
            dns: DnsConfig::default(),
            services: default_services(),
        }
    }
}

impl SentinelConfig {
    /// Load from an explicit path, else the system path, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        let system = Path::new(CONFIG_PATH);
        if system.exists() {
            match Self::load_from(system) {
                Ok(config) => return Ok(config),
                Err(e) => warn!("Failed to load {}: {:#}. Using defaults.", CONFIG_PATH, e),
            }
        } else {
            info!("No config file at {}, using defaults", CONFIG_PATH);
        }

        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SentinelConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.memory.critical_threshold;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(ConfigError::ThresholdOutOfRange(threshold));
        }
        if self.dns.settle_secs < MIN_SETTLE_SECS {
            return Err(ConfigError::SettleTooShort(self.dns.settle_secs));
        }
        if self.dns.max_attempts == 0 || self.dns.max_attempts > MAX_DNS_ATTEMPTS {
            return Err(ConfigError::AttemptsOutOfRange(self.dns.max_attempts));
        }
        if self.tick_interval_secs == 0 || self.dns_check_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        self.dns.probe_ip()?;
        self.dns.nameserver_ips()?;
        for service in &self.services {
            if !is_safe_service_name(&service.name) {
                return Err(ConfigError::UnsafeServiceName(service.name.clone()));
            }
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn dns_check_interval(&self) -> Duration {
        Duration::from_secs(self.dns_check_interval_secs)
    }
}
