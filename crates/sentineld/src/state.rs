//! In-memory daemon state.
//!
//! Last observation per domain, used for liveness transition logging, the
//! DNS check cadence and the status snapshot. Nothing here is persisted.

use sentinel_common::{DnsObservation, Liveness, MemoryObservation, ServiceObservation};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct DaemonState {
    pub services: BTreeMap<String, ServiceObservation>,
    pub memory: Option<MemoryObservation>,
    pub dns: Option<DnsObservation>,
    last_dns_check: Option<Instant>,
}

impl DaemonState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest observation; returns the previous liveness, if any.
    pub fn record_service(&mut self, observation: ServiceObservation) -> Option<Liveness> {
        self.services
            .insert(observation.name.clone(), observation)
            .map(|previous| previous.liveness)
    }

    pub fn record_memory(&mut self, observation: Option<MemoryObservation>) {
        self.memory = observation;
    }

    pub fn record_dns(&mut self, observation: DnsObservation) {
        self.dns = Some(observation);
    }

    /// True on the first tick and whenever `interval` has elapsed since the last check
    pub fn dns_check_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_dns_check {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= interval,
        }
    }

    pub fn mark_dns_checked(&mut self, now: Instant) {
        self.last_dns_check = Some(now);
    }
}
