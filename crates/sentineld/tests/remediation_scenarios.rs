//! End-to-end remediation scenarios against fake host, reasoning service
//! and command runner. Nothing here touches the real system.

use sentinel_common::{
    CommandWhitelist, FaultDomain, Liveness, MemoryObservation, Observation, Outcome, RemedyAction,
    SentinelConfig, ServiceObservation, ServiceSpec,
};
use sentineld::{
    ActionExecutor, Daemon, DiagnosisClient, DnsRepairLoop, FakeHostProbe, FakeReasoningBackend,
    FaultDomainCoordinator, IncidentLog, ReasoningBackend, RecordingCommandRunner, Remediation,
    RepairState, ResolverConfigFile,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    coordinator: FaultDomainCoordinator,
    runner: Arc<RecordingCommandRunner>,
    incidents: Arc<IncidentLog>,
}

fn harness(dir: &Path, backend: Option<Arc<FakeReasoningBackend>>) -> Harness {
    let runner = Arc::new(RecordingCommandRunner::new());
    let backend = backend.map(|b| b as Arc<dyn ReasoningBackend>);
    let diagnosis = Arc::new(DiagnosisClient::new(backend, 1000));
    let executor = Arc::new(ActionExecutor::new(
        CommandWhitelist::new("8.8.8.8".parse().unwrap()),
        runner.clone(),
        ResolverConfigFile::new(
            dir.join("resolv.conf"),
            dir.join("resolv.conf.bak"),
            vec!["8.8.8.8".parse().unwrap(), "1.1.1.1".parse().unwrap()],
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
    Harness {
        coordinator: FaultDomainCoordinator::new(diagnosis, executor, incidents.clone(), dns_repair),
        runner,
        incidents,
    }
}

/// ssh down, no credential: fallback says start, the start command runs,
/// and the incident file tells the whole story.
#[tokio::test]
async fn test_ssh_down_without_credential() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), None);

    let result = h
        .coordinator
        .remediate_service(ServiceObservation::new("ssh", Liveness::Inactive))
        .await;
    let Remediation::Completed(incident) = result else {
        panic!("expected a completed remediation");
    };

    assert_eq!(incident.outcome, Outcome::Succeeded);
    assert_eq!(incident.diagnosis.actions, vec![RemedyAction::StartService("ssh".into())]);
    assert_eq!(h.runner.commands(), vec!["service ssh start"]);

    let files: Vec<_> = std::fs::read_dir(dir.path().join("incidents"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".log"))
        .collect();
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("ssh_"));

    let text = std::fs::read_to_string(dir.path().join("incidents").join(&files[0])).unwrap();
    assert!(text.contains("SSH service appears to be stopped"));
    assert!(text.contains("service ssh start"));
    assert!(text.contains("SUCCESS"));
}

/// Fallback diagnosis is byte-identical across calls for the same input.
#[tokio::test]
async fn test_fallback_is_deterministic() {
    let client = DiagnosisClient::new(None, 1000);
    let observation = Observation::Service(ServiceObservation::new("apache2", Liveness::Inactive));
    let first = client.diagnose(&observation, &[]).await;
    for _ in 0..5 {
        assert_eq!(client.diagnose(&observation, &[]).await, first);
    }
}

/// Critical memory with fallback: nothing is safe to kill, so nothing runs.
#[tokio::test]
async fn test_memory_critical_fallback_takes_no_action() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), None);

    let result = h.coordinator.remediate_memory(MemoryObservation::new(95.5, 90.0)).await;
    let Remediation::Completed(incident) = result else {
        panic!("expected a completed remediation");
    };
    assert!(incident.diagnosis.is_no_action());
    assert_eq!(incident.outcome, Outcome::Succeeded);
    assert_eq!(incident.action_taken, "none");
    assert!(h.runner.commands().is_empty());
    assert_eq!(h.incidents.load_all().await.unwrap().len(), 1);
}

/// A reasoning reply mixing safe and unsafe memory actions runs only the safe ones.
#[tokio::test]
async fn test_memory_actions_filtered_by_whitelist() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeReasoningBackend::always(
        "DIAGNOSIS: runaway workers\n\
         ACTIONS:\n\
         - kill 4242\n\
         - kill 1\n\
         - rm -rf /tmp/cache\n\
         - service memcached stop\n\
         EXPLANATION: frees memory",
    ));
    let h = harness(dir.path(), Some(backend));

    let result = h.coordinator.remediate_memory(MemoryObservation::new(97.0, 90.0)).await;
    assert_eq!(result.outcome(), Some(Outcome::Succeeded));
    assert_eq!(h.runner.commands(), vec!["kill 4242", "service memcached stop"]);
    if let Remediation::Completed(incident) = result {
        assert_eq!(incident.diagnosis.rejected, vec!["rm -rf /tmp/cache"]);
    }
}

/// Two concurrent attempts on one domain: only one diagnosis call happens.
#[tokio::test]
async fn test_concurrent_same_domain_is_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        FakeReasoningBackend::always("DIAGNOSIS: crashed\nCOMMAND: restart\nEXPLANATION: x")
            .with_delay(Duration::from_millis(100)),
    );
    let h = harness(dir.path(), Some(backend.clone()));
    let ssh = ServiceObservation::new("ssh", Liveness::Inactive);

    let (a, b) = tokio::join!(
        h.coordinator.remediate_service(ssh.clone()),
        h.coordinator.remediate_service(ssh.clone()),
    );

    let completed = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Remediation::Completed(_)))
        .count();
    let refused = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Remediation::AlreadyInProgress))
        .count();
    assert_eq!((completed, refused), (1, 1));
    assert_eq!(backend.call_count(), 1);
    assert_eq!(h.runner.commands(), vec!["service ssh restart"]);
    assert_eq!(h.incidents.load_all().await.unwrap().len(), 1);
}

/// Different domains may be remediated at the same time.
#[tokio::test]
async fn test_concurrent_different_domains_both_run() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        FakeReasoningBackend::always("DIAGNOSIS: x\nCOMMAND: none\nEXPLANATION: y")
            .with_delay(Duration::from_millis(50)),
    );
    let h = harness(dir.path(), Some(backend.clone()));

    let (ssh, apache) = tokio::join!(
        h.coordinator
            .remediate_service(ServiceObservation::new("ssh", Liveness::Inactive)),
        h.coordinator
            .remediate_service(ServiceObservation::new("apache2", Liveness::Inactive)),
    );
    assert!(matches!(ssh, Remediation::Completed(_)));
    assert!(matches!(apache, Remediation::Completed(_)));
    assert_eq!(backend.call_count(), 2);
    assert!(h.coordinator.guards().held_domains().is_empty());
}

/// DNS broken by a bad resolver file: probe, then reset, then resolved.
#[tokio::test]
async fn test_daemon_repairs_dns_in_two_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let resolv = dir.path().join("resolv.conf");
    std::fs::write(&resolv, "nameserver 10.255.255.1\n").unwrap();

    let mut config = SentinelConfig::default();
    config.state_dir = dir.path().join("state");
    config.dns.resolv_conf = resolv.clone();
    config.dns.backup_path = dir.path().join("resolv.conf.bak");
    config.services = vec![ServiceSpec::new("ssh", "sshd", None)];

    // tick check, repair's own check, then one check after each attempt
    let probe = Arc::new(
        FakeHostProbe::new()
            .with_service("ssh", vec![Liveness::Active])
            .with_dns(&[(false, true), (false, true), (false, true), (true, true)]),
    );
    let runner = Arc::new(RecordingCommandRunner::new());
    let mut daemon = Daemon::with_components(
        config,
        probe.clone(),
        Arc::new(DiagnosisClient::new(None, 1000)),
        runner.clone(),
    )
    .unwrap();

    // Each attempt waits the configured settle time (5s minimum)
    let report = tokio::time::timeout(Duration::from_secs(30), daemon.run_once())
        .await
        .unwrap();

    assert_eq!(report.dns_repair, Some(RepairState::Resolved));
    assert_eq!(probe.dns_poll_count(), 4);
    assert_eq!(runner.commands(), vec!["ping -c 1 -W 2 8.8.8.8"]);
    assert_eq!(
        std::fs::read_to_string(&resolv).unwrap(),
        "# Managed by sentineld\nnameserver 8.8.8.8\nnameserver 1.1.1.1\n"
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("resolv.conf.bak")).unwrap(),
        "nameserver 10.255.255.1\n"
    );

    let incidents = IncidentLog::new(dir.path().join("state"), 1000).load_all().await.unwrap();
    let dns: Vec<_> = incidents.iter().filter(|i| i.domain == FaultDomain::Dns).collect();
    assert_eq!(dns.len(), 2);
    assert_eq!(dns[0].attempt, Some(1));
    assert_eq!(dns[1].attempt, Some(2));
}
