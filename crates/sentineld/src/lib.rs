//! Sentinel daemon library - exposes modules for testing.

pub mod coordinator;
pub mod daemon;
pub mod diagnosis_client;
pub mod dns_repair;
pub mod executor;
pub mod guard;
pub mod incident_log;
pub mod reasoner;
pub mod resolver;
pub mod snapshot;
pub mod state;
pub mod status_reader;

pub use coordinator::{FaultDomainCoordinator, Remediation};
pub use daemon::{Daemon, TickReport};
pub use diagnosis_client::DiagnosisClient;
pub use dns_repair::{DnsRepairLoop, DnsRepairReport, RepairState};
pub use executor::{ActionExecutor, CommandRunner, RecordingCommandRunner, SystemCommandRunner};
pub use guard::{GuardTable, GuardToken};
pub use incident_log::IncidentLog;
pub use reasoner::{FakeReasoningBackend, HttpReasoningBackend, ReasonerError, ReasoningBackend};
pub use resolver::{ResetOutcome, ResolverConfigFile};
pub use snapshot::{StatusSnapshot, StatusSnapshotWriter};
pub use status_reader::{FakeHostProbe, HostProbe, HostStatusReader};
