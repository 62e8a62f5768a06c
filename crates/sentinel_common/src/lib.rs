//! Shared types for the sentinel self-healing daemon.
//!
//! Fault domains and observations, the diagnosis grammar, the command
//! whitelist, incident records and configuration.

pub mod command_whitelist;
pub mod config;
pub mod diagnosis;
pub mod domain;
pub mod incident;

pub use command_whitelist::{CommandLine, CommandWhitelist, Operation, Rejection};
pub use config::{ConfigError, DnsConfig, MemoryConfig, ReasonerConfig, SentinelConfig, ServiceSpec};
pub use diagnosis::{
    fallback_diagnosis, fallback_response, parse_response, AttemptSummary, Diagnosis,
    DiagnosisSource, RemedyAction,
};
pub use domain::{
    DnsObservation, FaultDomain, Liveness, MemoryObservation, Observation, Outcome, ProcessEntry,
    ServiceObservation,
};
pub use incident::Incident;
