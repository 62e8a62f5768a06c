//! Incident records - one per remediation attempt.

use crate::diagnosis::Diagnosis;
use crate::domain::{FaultDomain, Observation, Outcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable record of one complete remediation attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub domain: FaultDomain,
    pub timestamp: DateTime<Utc>,
    pub observation: Observation,
    pub diagnosis: Diagnosis,
    /// "none" or the action summary
    pub action_taken: String,
    /// Commands actually resolved through the whitelist
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub output: String,
    pub outcome: Outcome,
    /// Attempt number within a DNS repair session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

impl Incident {
    pub fn new(observation: Observation, diagnosis: Diagnosis, outcome: Outcome) -> Self {
        let action_taken = diagnosis.action_summary();
        Self {
            id: Uuid::new_v4(),
            domain: observation.domain(),
            timestamp: Utc::now(),
            observation,
            diagnosis,
            action_taken,
            commands: Vec::new(),
            output: String::new(),
            outcome,
            attempt: None,
        }
    }

    pub fn with_execution(mut self, commands: Vec<String>, output: impl Into<String>) -> Self {
        self.commands = commands;
        self.output = output.into();
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// `<domain>_<YYYYmmdd_HHMMSS>_<id8>.log`
    pub fn file_name(&self) -> String {
        let id = self.id.simple().to_string();
        format!(
            "{}_{}_{}.log",
            self.domain.file_stem(),
            self.timestamp.format("%Y%m%d_%H%M%S"),
            &id[..8]
        )
    }

    /// Human-readable record: context, then diagnosis, then action and result.
    pub fn render(&self, context_chars: usize) -> String {
        let mut out = String::new();
        out.push_str(&format!("=== DOMAIN: {} ===\n", self.domain));
        out.push_str(&format!("=== TIME: {} ===\n", self.timestamp.to_rfc3339()));
        if let Some(n) = self.attempt {
            out.push_str(&format!("=== ATTEMPT: {} ===\n", n));
        }
        out.push_str(&format!("=== STATUS: {} ===\n", self.observation.status_line()));
        out.push_str(&format!(
            "=== CONTEXT ===\n{}\n",
            self.observation.render_context(context_chars)
        ));
        out.push_str(&format!(
            "=== DIAGNOSIS ({}) ===\n{}\n",
            self.diagnosis.source.as_str(),
            self.diagnosis.raw.trim_end()
        ));
        for token in &self.diagnosis.rejected {
            out.push_str(&format!("=== REJECTED: {} ===\n", token));
        }
        out.push_str(&format!("\n=== FIX COMMAND: {} ===\n", self.action_taken));
        for cmd in &self.commands {
            out.push_str(&format!("=== EXECUTED: {} ===\n", cmd));
        }
        if !self.output.trim().is_empty() {
            out.push_str(&format!("=== OUTPUT ===\n{}\n", self.output.trim_end()));
        }
        out.push_str(&format!("=== FIX RESULT: {} ===\n", self.outcome));
        out
    }
}
