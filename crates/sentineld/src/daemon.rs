//! The sentinel control loop.
//!
//! One tick checks every catalogued service, then memory, then (on its own
//! slower cadence) DNS, remediating whatever is abnormal, and finally
//! publishes the status snapshot. Remediation runs inline: the loop waits
//! for it, bounded by the diagnosis timeout.

use crate::coordinator::{FaultDomainCoordinator, Remediation};
use crate::diagnosis_client::DiagnosisClient;
use crate::dns_repair::{DnsRepairLoop, RepairState};
use crate::executor::{ActionExecutor, CommandRunner, SystemCommandRunner};
use crate::incident_log::IncidentLog;
use crate::resolver::ResolverConfigFile;
use crate::snapshot::StatusSnapshotWriter;
use crate::state::DaemonState;
use crate::status_reader::{HostProbe, HostStatusReader};
use anyhow::{Context, Result};
use sentinel_common::{CommandWhitelist, FaultDomain, Liveness, Outcome, SentinelConfig};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// What one tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub services_checked: usize,
    /// Completed remediations, in the order they ran
    pub remediations: Vec<(FaultDomain, Outcome)>,
    /// Domains skipped because an attempt was already in flight
    pub in_progress: Vec<FaultDomain>,
    pub dns_checked: bool,
    pub dns_repair: Option<RepairState>,
}

pub struct Daemon {
    config: SentinelConfig,
    probe: Arc<dyn HostProbe>,
    coordinator: FaultDomainCoordinator,
    snapshot: StatusSnapshotWriter,
    state: DaemonState,
}

impl Daemon {
    /// Wire the real host probe, command runner and reasoning backend.
    pub fn from_config(config: SentinelConfig) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let probe: Arc<dyn HostProbe> = Arc::new(HostStatusReader::from_config(&config)?);
        let diagnosis = Arc::new(DiagnosisClient::from_config(&config));
        Self::with_components(config, probe, diagnosis, Arc::new(SystemCommandRunner))
    }

    /// Wire the given collaborators; everything else comes from `config`.
    pub fn with_components(
        config: SentinelConfig,
        probe: Arc<dyn HostProbe>,
        diagnosis: Arc<DiagnosisClient>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let whitelist = CommandWhitelist::new(config.dns.probe_ip()?);
        let resolver = ResolverConfigFile::from_config(&config.dns)?;
        let dry_run = !config.auto_fix;
        if dry_run {
            info!("auto_fix disabled: running in dry-run mode");
        }
        let executor = Arc::new(ActionExecutor::new(whitelist, runner, resolver, dry_run));
        let incidents = Arc::new(IncidentLog::new(
            &config.state_dir,
            config.memory.log_excerpt_chars,
        ));
        let dns_repair = DnsRepairLoop::new(
            Arc::clone(&probe),
            Arc::clone(&diagnosis),
            Arc::clone(&executor),
            Arc::clone(&incidents),
            config.dns.max_attempts,
            config.dns.settle(),
        );
        let coordinator = FaultDomainCoordinator::new(diagnosis, executor, incidents, dns_repair);
        let snapshot = StatusSnapshotWriter::new(&config.state_dir);

        Ok(Self {
            config,
            probe,
            coordinator,
            snapshot,
            state: DaemonState::new(),
        })
    }

    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    pub fn coordinator(&self) -> &FaultDomainCoordinator {
        &self.coordinator
    }

    pub async fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();

        let names: Vec<String> = self.config.services.iter().map(|s| s.name.clone()).collect();
        for name in names {
            let observation = self.probe.poll_service(&name).await;
            report.services_checked += 1;

            let current = observation.liveness;
            match self.state.record_service(observation.clone()) {
                Some(previous) if previous != current => {
                    if current == Liveness::Active {
                        info!("Service {} changed from {} to {}", name, previous, current);
                    } else {
                        warn!("Service {} changed from {} to {}", name, previous, current);
                    }
                }
                None if current != Liveness::Active => warn!("Service {} is {}", name, current),
                _ => {}
            }

            let result = self.coordinator.remediate_service(observation).await;
            note(&mut report, FaultDomain::service(name), result);
        }

        let memory = self.probe.poll_memory().await;
        self.state.record_memory(memory.clone());
        if let Some(memory) = memory {
            if memory.is_critical() {
                warn!("Memory usage critical: {:.2}%", memory.used_percent);
            }
            let result = self.coordinator.remediate_memory(memory).await;
            note(&mut report, FaultDomain::Memory, result);
        }

        if self.state.dns_check_due(now, self.config.dns_check_interval()) {
            self.state.mark_dns_checked(now);
            report.dns_checked = true;

            let dns = self.probe.poll_dns().await;
            let failing = !dns.resolution_works;
            self.state.record_dns(dns);
            if failing {
                warn!("DNS resolution failing, starting repair");
                match self.coordinator.repair_dns().await {
                    Some(repair) => {
                        report.dns_repair = Some(repair.state);
                        self.state.record_dns(repair.last_observation);
                    }
                    None => report.in_progress.push(FaultDomain::Dns),
                }
            }
        }

        let in_flight = self.coordinator.guards().held_domains();
        self.snapshot.publish(&self.state, &in_flight).await;
        report
    }

    pub async fn run_once(&mut self) -> TickReport {
        self.tick(Instant::now()).await
    }

    /// Tick every `tick_interval_secs` until `shutdown` resolves.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            "Sentinel loop started: {} services, tick {}s, DNS every {}s",
            self.config.services.len(),
            self.config.tick_interval_secs,
            self.config.dns_check_interval_secs
        );

        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping sentinel loop");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.tick(Instant::now()).await;
                    if !report.remediations.is_empty() {
                        info!("Tick finished with {} remediation(s)", report.remediations.len());
                    }
                }
            }
        }
        Ok(())
    }
}

fn note(report: &mut TickReport, domain: FaultDomain, result: Remediation) {
    match result {
        Remediation::NotNeeded => {}
        Remediation::AlreadyInProgress => report.in_progress.push(domain),
        Remediation::Completed(incident) => report.remediations.push((domain, incident.outcome)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RecordingCommandRunner;
    use crate::status_reader::FakeHostProbe;
    use sentinel_common::{MemoryObservation, ServiceSpec};
    use std::time::Duration;

    fn config(dir: &std::path::Path) -> SentinelConfig {
        let mut config = SentinelConfig::default();
        config.state_dir = dir.join("state");
        config.dns.resolv_conf = dir.join("resolv.conf");
        config.dns.backup_path = dir.join("resolv.conf.bak");
        config.services = vec![ServiceSpec::new("ssh", "sshd", None)];
        config
    }

    #[tokio::test]
    async fn test_tick_order_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(
            FakeHostProbe::new()
                .with_service("ssh", vec![Liveness::Inactive])
                .with_memory(vec![Some(MemoryObservation::new(50.0, 90.0))]),
        );
        let runner = Arc::new(RecordingCommandRunner::new());
        let mut daemon = Daemon::with_components(
            config(dir.path()),
            probe,
            Arc::new(DiagnosisClient::new(None, 1000)),
            runner.clone(),
        )
        .unwrap();

        let report = daemon.run_once().await;
        assert_eq!(report.services_checked, 1);
        assert_eq!(
            report.remediations,
            vec![(FaultDomain::service("ssh"), Outcome::Succeeded)]
        );
        assert!(report.dns_checked);
        assert_eq!(report.dns_repair, None);
        assert_eq!(runner.commands(), vec!["service ssh start"]);

        let snapshot = StatusSnapshotWriter::new(&dir.path().join("state")).read().await.unwrap();
        assert_eq!(snapshot.service_status["ssh"], "inactive");
        assert_eq!(snapshot.memory_usage, Some(50.0));
        assert!(snapshot.remediations_in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_dns_checked_on_its_own_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(FakeHostProbe::new().with_service("ssh", vec![Liveness::Active]));
        let mut daemon = Daemon::with_components(
            config(dir.path()),
            probe.clone(),
            Arc::new(DiagnosisClient::new(None, 1000)),
            Arc::new(RecordingCommandRunner::new()),
        )
        .unwrap();

        let start = Instant::now();
        assert!(daemon.tick(start).await.dns_checked);
        assert!(!daemon.tick(start + Duration::from_secs(10)).await.dns_checked);
        assert!(!daemon.tick(start + Duration::from_secs(20)).await.dns_checked);
        assert!(daemon.tick(start + Duration::from_secs(30)).await.dns_checked);
        assert_eq!(probe.dns_poll_count(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_reflects_repaired_dns() {
        let dir = tempfile::tempdir().unwrap();
        let probe = Arc::new(
            FakeHostProbe::new()
                .with_service("ssh", vec![Liveness::Active])
                .with_dns(&[(false, true), (false, true), (true, true)]),
        );
        let mut daemon = Daemon::with_components(
            config(dir.path()),
            probe,
            Arc::new(DiagnosisClient::new(None, 1000)),
            Arc::new(RecordingCommandRunner::new()),
        )
        .unwrap();

        // one attempt and its settle interval
        let report = tokio::time::timeout(Duration::from_secs(30), daemon.run_once())
            .await
            .unwrap();
        assert_eq!(report.dns_repair, Some(RepairState::Resolved));
        assert!(daemon.state().dns.as_ref().unwrap().resolution_works);

        let snapshot = StatusSnapshotWriter::new(&dir.path().join("state")).read().await.unwrap();
        assert!(snapshot.dns.unwrap().resolution_works);
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.auto_fix = false;
        let runner = Arc::new(RecordingCommandRunner::new());
        let mut daemon = Daemon::with_components(
            config,
            Arc::new(FakeHostProbe::new().with_service("ssh", vec![Liveness::Inactive])),
            Arc::new(DiagnosisClient::new(None, 1000)),
            runner.clone(),
        )
        .unwrap();

        let report = daemon.run_once().await;
        assert_eq!(report.remediations[0].1, Outcome::Succeeded);
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut daemon = Daemon::with_components(
            config(dir.path()),
            Arc::new(FakeHostProbe::new().with_service("ssh", vec![Liveness::Active])),
            Arc::new(DiagnosisClient::new(None, 1000)),
            Arc::new(RecordingCommandRunner::new()),
        )
        .unwrap();

        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        tokio::time::timeout(Duration::from_secs(5), daemon.run(shutdown))
            .await
            .unwrap()
            .unwrap();
        assert!(daemon.state().services.contains_key("ssh"));
    }
}
