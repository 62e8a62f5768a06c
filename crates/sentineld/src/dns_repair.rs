//! Bounded-retry DNS repair.
//!
//! Resolution is checked once up front. Each attempt then asks for a
//! diagnosis with the history of earlier attempts, applies the recommended
//! action, waits the settle interval and re-checks. That re-check is both the
//! attempt's result and the starting point of the next attempt. The loop ends
//! as soon as resolution works, or after `max_attempts` attempts. The caller
//! owns the DNS guard for the whole run.

use crate::diagnosis_client::DiagnosisClient;
use crate::executor::ActionExecutor;
use crate::incident_log::IncidentLog;
use crate::status_reader::HostProbe;
use sentinel_common::{AttemptSummary, DnsObservation, FaultDomain, Incident, Observation};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairState {
    Resolved,
    GaveUp,
}

#[derive(Debug, Clone)]
pub struct DnsRepairReport {
    pub state: RepairState,
    /// One entry per completed attempt, oldest first
    pub attempts: Vec<AttemptSummary>,
    /// Most recent DNS check of the run
    pub last_observation: DnsObservation,
}

impl DnsRepairReport {
    pub fn resolved(&self) -> bool {
        self.state == RepairState::Resolved
    }
}

pub struct DnsRepairLoop {
    probe: Arc<dyn HostProbe>,
    diagnosis: Arc<DiagnosisClient>,
    executor: Arc<ActionExecutor>,
    incidents: Arc<IncidentLog>,
    max_attempts: u32,
    settle: Duration,
}

impl DnsRepairLoop {
    pub fn new(
        probe: Arc<dyn HostProbe>,
        diagnosis: Arc<DiagnosisClient>,
        executor: Arc<ActionExecutor>,
        incidents: Arc<IncidentLog>,
        max_attempts: u32,
        settle: Duration,
    ) -> Self {
        Self {
            probe,
            diagnosis,
            executor,
            incidents,
            max_attempts,
            settle,
        }
    }

    pub async fn run(&self) -> DnsRepairReport {
        let domain = FaultDomain::Dns;
        let mut attempts: Vec<AttemptSummary> = Vec::new();

        let mut current = self.probe.poll_dns().await;
        if current.resolution_works {
            info!("DNS resolution already working, nothing to repair");
            return DnsRepairReport {
                state: RepairState::Resolved,
                attempts,
                last_observation: current,
            };
        }

        for number in 1..=self.max_attempts {
            info!("DNS repair attempt {}/{}", number, self.max_attempts);
            let observation = Observation::Dns(current);
            let diagnosis = self.diagnosis.diagnose(&observation, &attempts).await;
            let (outcome, reports) = self.executor.apply_all(&domain, &diagnosis.actions).await;

            tokio::time::sleep(self.settle).await;
            let after = self.probe.poll_dns().await;

            let commands: Vec<String> = reports.iter().filter_map(|r| r.command.clone()).collect();
            let output = reports
                .iter()
                .map(|r| r.output.trim())
                .filter(|o| !o.is_empty())
                .collect::<Vec<_>>()
                .join("\n");

            attempts.push(AttemptSummary {
                number,
                action: diagnosis.actions.first().cloned(),
                command: commands.join("; "),
                output: output.clone(),
                outcome,
                resolution_after: after.resolution_works,
            });

            let incident = Incident::new(observation, diagnosis, outcome)
                .with_execution(commands, output)
                .with_attempt(number);
            self.incidents.record(&incident).await;

            if after.resolution_works {
                info!("DNS resolution restored after attempt {}", number);
                return DnsRepairReport {
                    state: RepairState::Resolved,
                    attempts,
                    last_observation: after,
                };
            }
            current = after;
        }

        warn!(
            "DNS repair gave up after {} attempts; manual intervention required",
            self.max_attempts
        );
        DnsRepairReport {
            state: RepairState::GaveUp,
            attempts,
            last_observation: current,
        }
    }
}
