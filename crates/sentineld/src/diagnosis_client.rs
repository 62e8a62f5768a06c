//! Diagnosis dispatch with deterministic fallback.
//!
//! `diagnose` never fails: a missing credential, a transport error, a
//! timeout or a non-success status all resolve to the canned fallback for
//! the domain. An unparseable reply degrades to "no action".

use crate::reasoner::{HttpReasoningBackend, ReasoningBackend};
use sentinel_common::diagnosis::render_attempts;
use sentinel_common::{
    fallback_diagnosis, parse_response, AttemptSummary, Diagnosis, DiagnosisSource, Observation,
    SentinelConfig,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct DiagnosisClient {
    backend: Option<Arc<dyn ReasoningBackend>>,
    excerpt_chars: usize,
}

impl DiagnosisClient {
    /// `None` puts the client in permanent fallback mode
    pub fn new(backend: Option<Arc<dyn ReasoningBackend>>, excerpt_chars: usize) -> Self {
        Self {
            backend,
            excerpt_chars,
        }
    }

    pub fn from_config(config: &SentinelConfig) -> Self {
        let excerpt_chars = config.memory.log_excerpt_chars;
        let backend: Option<Arc<dyn ReasoningBackend>> = match config.reasoner.credential() {
            None => {
                warn!("No API key provided - will use fallback diagnosis");
                None
            }
            Some(key) => match HttpReasoningBackend::new(&config.reasoner, key) {
                Ok(backend) => Some(Arc::new(backend)),
                Err(e) => {
                    error!("Reasoning backend unavailable: {:#}. Using fallback diagnosis.", e);
                    None
                }
            },
        };
        Self::new(backend, excerpt_chars)
    }

    /// Diagnose the domain the observation belongs to.
    ///
    /// `prior` carries earlier attempts of the same repair session (DNS only).
    pub async fn diagnose(&self, observation: &Observation, prior: &[AttemptSummary]) -> Diagnosis {
        let domain = observation.domain();

        let backend = match &self.backend {
            Some(backend) => backend,
            None => {
                info!("Using fallback diagnosis for {}", domain);
                return fallback_diagnosis(observation, prior);
            }
        };

        let prompt = build_prompt(observation, prior, self.excerpt_chars);
        let diagnosis = match backend.complete(&prompt).await {
            Ok(text) => {
                info!("AI diagnosis for {}: {}", domain, text.trim());
                parse_response(&domain, &text, DiagnosisSource::Reasoner)
            }
            Err(e) => {
                error!("Diagnosis service failed for {}: {}. Using fallback.", domain, e);
                return fallback_diagnosis(observation, prior);
            }
        };

        for token in &diagnosis.rejected {
            warn!("Unsupported action for {}: {}", domain, token);
        }
        diagnosis
    }
}

/// Domain-specific request text. The vocabulary listed here must match
/// what `parse_response` accepts.
pub fn build_prompt(observation: &Observation, prior: &[AttemptSummary], max_chars: usize) -> String {
    let context = observation.render_context(max_chars);
    match observation {
        Observation::Service(obs) => format!(
            "You are a Linux system administrator AI. Analyze these logs for service '{name}' \
             which is currently showing status: {status}.\n\n\
             {context}\n\
             First, diagnose the problem. Then, suggest a fix using ONE of these safe commands:\n\
             1. restart - service {name} restart\n\
             2. start - service {name} start\n\n\
             Format your response exactly like this:\n\
             DIAGNOSIS: [your diagnosis here]\n\
             COMMAND: [command name only - 'restart' or 'start']\n\
             EXPLANATION: [why this command will fix the issue]\n\n\
             If none of these would help, respond with COMMAND: none",
            name = obs.name,
            status = obs.liveness,
            context = context,
        ),
        Observation::Memory(_) => format!(
            "You are a Linux system administrator AI. Analyze this system memory information \
             and suggest actions:\n\n\
             {context}\n\
             Suggest actions using ONLY these safe commands:\n\
             1. kill [PID] - Kill a specific process\n\
             2. service [name] stop - Stop a non-essential service\n\n\
             Format your response exactly like this:\n\
             DIAGNOSIS: [your diagnosis of the memory issue]\n\
             ACTIONS:\n\
             - [command with specific PID or service name]\n\
             EXPLANATION: [why these actions will help]\n\n\
             Only suggest killing processes that are clearly non-essential. \
             If no safe action is possible, respond with ACTIONS: none",
            context = context,
        ),
        Observation::Dns(_) => {
            let history = if prior.is_empty() {
                "None - this is the first attempt.".to_string()
            } else {
                render_attempts(prior)
            };
            format!(
                "You are a Linux network administrator AI. DNS resolution on this host is failing.\n\n\
                 {context}\n\
                 Previous repair attempts in this session:\n{history}\n\n\
                 Choose ONE of these safe commands:\n\
                 1. probe-ip-reachability - check raw IP connectivity without changing anything\n\
                 2. reset-dns-config - back up the resolver configuration and restore known-good nameservers\n\n\
                 Format your response exactly like this:\n\
                 DIAGNOSIS: [your diagnosis here]\n\
                 COMMAND: [probe-ip-reachability, reset-dns-config or none]\n\
                 EXPLANATION: [why this command will help]",
                context = context,
                history = history,
            )
        }
    }
}
