//! Command whitelist.
//!
//! The ONLY system operations the daemon may perform. Each permitted
//! (domain, action) pair maps to exactly one command template; everything
//! else is refused before execution. The table is compiled into the binary
//! and no configuration value can extend it.

use crate::diagnosis::RemedyAction;
use crate::domain::FaultDomain;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::OnceLock;

/// Service names that may appear as a command argument
pub fn is_safe_service_name(name: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9@._-]{0,127}$").ok())
        .as_ref()
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// A fully bound command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// What a permitted action turns into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Run(CommandLine),
    /// Back up once, then overwrite the resolver configuration
    ResetResolverConfig,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Run(cmd) => cmd.fmt(f),
            Operation::ResetResolverConfig => f.write_str("reset resolver configuration"),
        }
    }
}

/// Why an action was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("action '{action}' is not permitted for domain {domain}")]
    NotPermitted { domain: String, action: String },

    #[error("action targets service '{requested}' but the domain is {domain}")]
    WrongService { domain: String, requested: String },

    #[error("unsafe service name '{0}'")]
    UnsafeServiceName(String),

    #[error("refusing to terminate protected pid {0}")]
    ProtectedPid(u32),
}

/// The fixed allow-list, bound to the configured IP probe target.
#[derive(Debug, Clone)]
pub struct CommandWhitelist {
    probe_ip: IpAddr,
}

impl CommandWhitelist {
    pub fn new(probe_ip: IpAddr) -> Self {
        Self { probe_ip }
    }

    /// Resolve a typed action for `domain` into its single permitted operation.
    pub fn resolve(&self, domain: &FaultDomain, action: &RemedyAction) -> Result<Operation, Rejection> {
        let not_permitted = || Rejection::NotPermitted {
            domain: domain.to_string(),
            action: action.to_string(),
        };

        match (domain, action) {
            (FaultDomain::Service(own), RemedyAction::RestartService(name))
            | (FaultDomain::Service(own), RemedyAction::StartService(name)) => {
                if own != name {
                    return Err(Rejection::WrongService {
                        domain: domain.to_string(),
                        requested: name.clone(),
                    });
                }
                check_service_name(name)?;
                let verb = match action {
                    RemedyAction::RestartService(_) => "restart",
                    _ => "start",
                };
                Ok(Operation::Run(CommandLine::new("service", &[name.as_str(), verb])))
            }
            (FaultDomain::Memory, RemedyAction::StopService(name)) => {
                check_service_name(name)?;
                Ok(Operation::Run(CommandLine::new("service", &[name.as_str(), "stop"])))
            }
            (FaultDomain::Memory, RemedyAction::TerminateProcess(pid)) => {
                if *pid <= 1 {
                    return Err(Rejection::ProtectedPid(*pid));
                }
                Ok(Operation::Run(CommandLine::new("kill", &[pid.to_string().as_str()])))
            }
            (FaultDomain::Dns, RemedyAction::ProbeIpReachability) => {
                let target = self.probe_ip.to_string();
                Ok(Operation::Run(CommandLine::new(
                    "ping",
                    &["-c", "1", "-W", "2", target.as_str()],
                )))
            }
            (FaultDomain::Dns, RemedyAction::ResetDnsConfig) => Ok(Operation::ResetResolverConfig),
            _ => Err(not_permitted()),
        }
    }
}

fn check_service_name(name: &str) -> Result<(), Rejection> {
    if is_safe_service_name(name) {
        Ok(())
    } else {
        Err(Rejection::UnsafeServiceName(name.to_string()))
    }
}
