//! Fault domain coordinator.
//!
//! Turns an abnormal observation into at most one in-flight remediation per
//! domain: take the domain guard, diagnose, apply, record the incident,
//! release. A domain whose guard is held is skipped without calling the
//! diagnosis client.

use crate::diagnosis_client::DiagnosisClient;
use crate::dns_repair::{DnsRepairLoop, DnsRepairReport};
use crate::executor::{ActionExecutor, ExecutionReport};
use crate::guard::{GuardTable, GuardToken};
use crate::incident_log::IncidentLog;
use sentinel_common::{
    Diagnosis, FaultDomain, Incident, MemoryObservation, Observation, Outcome, ServiceObservation,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of asking the coordinator to remediate one domain
#[derive(Debug, Clone, PartialEq)]
pub enum Remediation {
    /// The observation is healthy
    NotNeeded,
    /// Another attempt for the same domain holds the guard
    AlreadyInProgress,
    Completed(Incident),
}

impl Remediation {
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Remediation::Completed(incident) => Some(incident.outcome),
            _ => None,
        }
    }
}

pub struct FaultDomainCoordinator {
    diagnosis: Arc<DiagnosisClient>,
    executor: Arc<ActionExecutor>,
    incidents: Arc<IncidentLog>,
    guards: GuardTable,
    dns_repair: DnsRepairLoop,
}

impl FaultDomainCoordinator {
    pub fn new(
        diagnosis: Arc<DiagnosisClient>,
        executor: Arc<ActionExecutor>,
        incidents: Arc<IncidentLog>,
        dns_repair: DnsRepairLoop,
    ) -> Self {
        Self {
            diagnosis,
            executor,
            incidents,
            guards: GuardTable::new(),
            dns_repair,
        }
    }

    pub fn guards(&self) -> &GuardTable {
        &self.guards
    }

    pub async fn remediate_service(&self, observation: ServiceObservation) -> Remediation {
        if !observation.needs_remediation() {
            return Remediation::NotNeeded;
        }
        self.remediate(Observation::Service(observation)).await
    }

    /// Remediates only strictly above the critical threshold
    pub async fn remediate_memory(&self, observation: MemoryObservation) -> Remediation {
        if !observation.is_critical() {
            return Remediation::NotNeeded;
        }
        self.remediate(Observation::Memory(observation)).await
    }

    /// Run the DNS repair loop under the DNS guard.
    /// `None` when a repair is already in flight.
    pub async fn repair_dns(&self) -> Option<DnsRepairReport> {
        let _token = self.acquire(&FaultDomain::Dns)?;
        Some(self.dns_repair.run().await)
    }

    fn acquire(&self, domain: &FaultDomain) -> Option<GuardToken> {
        let token = self.guards.try_acquire(domain);
        if token.is_none() {
            info!("Remediation already in progress for {}, skipping", domain);
        }
        token
    }

    async fn remediate(&self, observation: Observation) -> Remediation {
        let domain = observation.domain();
        let Some(_token) = self.acquire(&domain) else {
            return Remediation::AlreadyInProgress;
        };

        warn!("Remediating {}: {}", domain, observation.status_line());
        let diagnosis = self.diagnosis.diagnose(&observation, &[]).await;
        info!(
            "Diagnosis for {} ({}): {} -> {}",
            domain,
            diagnosis.source.as_str(),
            diagnosis.explanation,
            diagnosis.action_summary()
        );

        let (outcome, reports) = self.apply(&domain, &diagnosis).await;
        let commands: Vec<String> = reports.iter().filter_map(|r| r.command.clone()).collect();
        let output = reports
            .iter()
            .map(|r| r.output.trim())
            .filter(|o| !o.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let incident = Incident::new(observation, diagnosis, outcome).with_execution(commands, output);
        self.incidents.record(&incident).await;
        info!("Remediation of {} finished: {}", domain, outcome);
        Remediation::Completed(incident)
    }

    async fn apply(&self, domain: &FaultDomain, diagnosis: &Diagnosis) -> (Outcome, Vec<ExecutionReport>) {
        if diagnosis.is_no_action() {
            // Only refused tokens means nothing safe was proposed
            let outcome = if diagnosis.rejected.is_empty() {
                Outcome::Succeeded
            } else {
                Outcome::Skipped
            };
            info!("No action taken for {}", domain);
            return (outcome, Vec::new());
        }
        self.executor.apply_all(domain, &diagnosis.actions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RecordingCommandRunner;
    use crate::reasoner::{FakeReasoningBackend, ReasoningBackend};
    use crate::resolver::ResolverConfigFile;
    use crate::status_reader::FakeHostProbe;
    use sentinel_common::{CommandWhitelist, Liveness};
    use std::time::Duration;

    fn coordinator(
        dir: &std::path::Path,
        backend: Option<Arc<FakeReasoningBackend>>,
        runner: Arc<RecordingCommandRunner>,
    ) -> FaultDomainCoordinator {
        let backend = backend.map(|b| b as Arc<dyn ReasoningBackend>);
        let diagnosis = Arc::new(DiagnosisClient::new(backend, 1000));
        let executor = Arc::new(ActionExecutor::new(
            CommandWhitelist::new("8.8.8.8".parse().unwrap()),
            runner,
            ResolverConfigFile::new(
                dir.join("resolv.conf"),
                dir.join("resolv.conf.bak"),
                vec!["8.8.8.8".parse().unwrap()],
            ),
            false,
        ));
        let incidents = Arc::new(IncidentLog::new(dir.join("incidents"), 1000));
        let dns_repair = DnsRepairLoop::new(
            Arc::new(FakeHostProbe::new()),
            diagnosis.clone(),
            executor.clone(),
            incidents.clone(),
            3,
            Duration::from_millis(5),
        );
        FaultDomainCoordinator::new(diagnosis, executor, incidents, dns_repair)
    }

    #[tokio::test]
    async fn test_healthy_service_is_not_remediated() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingCommandRunner::new());
        let coordinator = coordinator(dir.path(), None, runner.clone());
        let result = coordinator
            .remediate_service(ServiceObservation::new("ssh", Liveness::Active))
            .await;
        assert_eq!(result, Remediation::NotNeeded);
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_held_guard_skips_diagnosis() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeReasoningBackend::always("DIAGNOSIS: x\nCOMMAND: restart\nEXPLANATION: y"));
        let runner = Arc::new(RecordingCommandRunner::new());
        let coordinator = coordinator(dir.path(), Some(fake.clone()), runner.clone());

        let held = coordinator.guards().try_acquire(&FaultDomain::service("ssh")).unwrap();
        let result = coordinator
            .remediate_service(ServiceObservation::new("ssh", Liveness::Inactive))
            .await;
        assert_eq!(result, Remediation::AlreadyInProgress);
        assert_eq!(fake.call_count(), 0);
        assert!(runner.commands().is_empty());

        drop(held);
        let result = coordinator
            .remediate_service(ServiceObservation::new("ssh", Liveness::Inactive))
            .await;
        assert_eq!(result.outcome(), Some(Outcome::Succeeded));
        assert_eq!(runner.commands(), vec!["service ssh restart"]);
    }

    #[tokio::test]
    async fn test_guard_released_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingCommandRunner::new().failing("service"));
        let coordinator = coordinator(dir.path(), None, runner.clone());
        let ssh = ServiceObservation::new("ssh", Liveness::Inactive);

        let first = coordinator.remediate_service(ssh.clone()).await;
        assert_eq!(first.outcome(), Some(Outcome::Failed));
        assert!(!coordinator.guards().is_held(&FaultDomain::service("ssh")));

        let second = coordinator.remediate_service(ssh).await;
        assert_eq!(second.outcome(), Some(Outcome::Failed));
        assert_eq!(runner.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_only_rejected_tokens_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeReasoningBackend::always(
            "DIAGNOSIS: x\nCOMMAND: reboot\nEXPLANATION: y",
        ));
        let runner = Arc::new(RecordingCommandRunner::new());
        let coordinator = coordinator(dir.path(), Some(fake), runner.clone());
        let result = coordinator
            .remediate_service(ServiceObservation::new("ssh", Liveness::Inactive))
            .await;
        assert_eq!(result.outcome(), Some(Outcome::Skipped));
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_memory_threshold_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingCommandRunner::new());
        let coordinator = coordinator(dir.path(), None, runner);

        for used in [89.0, 90.0] {
            let result = coordinator.remediate_memory(MemoryObservation::new(used, 90.0)).await;
            assert_eq!(result, Remediation::NotNeeded);
        }
        let result = coordinator.remediate_memory(MemoryObservation::new(91.0, 90.0)).await;
        assert!(matches!(result, Remediation::Completed(_)));
    }

    #[tokio::test]
    async fn test_dns_repair_refused_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), None, Arc::new(RecordingCommandRunner::new()));
        let held = coordinator.guards().try_acquire(&FaultDomain::Dns).unwrap();
        assert!(coordinator.repair_dns().await.is_none());
        drop(held);

        let report = coordinator.repair_dns().await.unwrap();
        assert!(report.resolved());
        assert!(!coordinator.guards().is_held(&FaultDomain::Dns));
    }
}
