//! Diagnosis model and the line-oriented response grammar.
//!
//! A reasoning service answers in plain text:
//!
//! ```text
//! DIAGNOSIS: <what is wrong>
//! COMMAND: <one token>            (services, DNS)
//! ACTIONS:                        (memory)
//! - kill <pid>
//! - service <name> stop
//! EXPLANATION: <why the fix helps>
//! ```
//!
//! Parsing never fails. A missing `COMMAND:`/`ACTIONS:` line, or a token
//! outside the domain's vocabulary, yields no action. Rejected tokens are
//! kept on the diagnosis so callers can log them.

use crate::domain::{FaultDomain, Liveness, Observation, Outcome};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TOKEN_NONE: &str = "none";
pub const TOKEN_PROBE_IP: &str = "probe-ip-reachability";
pub const TOKEN_RESET_DNS: &str = "reset-dns-config";

/// A concrete corrective action, already bound to its target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", content = "target", rename_all = "snake_case")]
pub enum RemedyAction {
    RestartService(String),
    StartService(String),
    StopService(String),
    TerminateProcess(u32),
    ProbeIpReachability,
    ResetDnsConfig,
}

impl fmt::Display for RemedyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemedyAction::RestartService(name) => write!(f, "restart {}", name),
            RemedyAction::StartService(name) => write!(f, "start {}", name),
            RemedyAction::StopService(name) => write!(f, "stop service {}", name),
            RemedyAction::TerminateProcess(pid) => write!(f, "terminate process {}", pid),
            RemedyAction::ProbeIpReachability => f.write_str(TOKEN_PROBE_IP),
            RemedyAction::ResetDnsConfig => f.write_str(TOKEN_RESET_DNS),
        }
    }
}

/// Where a diagnosis came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosisSource {
    Reasoner,
    Fallback,
}

impl DiagnosisSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosisSource::Reasoner => "reasoner",
            DiagnosisSource::Fallback => "fallback",
        }
    }
}

/// Explanation plus recommended actions. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub explanation: String,
    /// Empty means "none"
    pub actions: Vec<RemedyAction>,
    pub supporting_explanation: String,
    /// Tokens that were outside the domain vocabulary
    #[serde(default)]
    pub rejected: Vec<String>,
    /// Text as received (or the canned fallback text)
    pub raw: String,
    pub source: DiagnosisSource,
}

impl Diagnosis {
    pub fn is_no_action(&self) -> bool {
        self.actions.is_empty()
    }

    /// "none" or the comma-separated action list
    pub fn action_summary(&self) -> String {
        if self.actions.is_empty() {
            TOKEN_NONE.to_string()
        } else {
            self.actions
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

/// A token that is not part of a domain's vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedToken(pub String);

impl fmt::Display for UnsupportedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported action token '{}'", self.0)
    }
}

/// What happened in one DNS repair attempt, fed back into the next diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub number: u32,
    pub action: Option<RemedyAction>,
    pub command: String,
    pub output: String,
    pub outcome: Outcome,
    pub resolution_after: bool,
}

impl AttemptSummary {
    pub fn render(&self) -> String {
        format!(
            "Attempt {}:\n  Action: {}\n  Command: {}\n  Output: {}\n  Outcome: {}\n  DNS working after action: {}\n",
            self.number,
            self.action
                .as_ref()
                .map(|a| a.to_string())
                .unwrap_or_else(|| TOKEN_NONE.to_string()),
            if self.command.is_empty() { "-" } else { &self.command },
            self.output.trim(),
            self.outcome,
            self.resolution_after
        )
    }
}

/// Ordered text of prior attempts, oldest first
pub fn render_attempts(attempts: &[AttemptSummary]) -> String {
    attempts.iter().map(|a| a.render()).collect::<Vec<_>>().join("\n")
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Diagnosis,
    Command,
    Actions,
    Explanation,
}

fn marker<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.strip_prefix(name).map(|rest| rest.trim_start_matches('*').trim())
}

/// Parse a reasoning-service reply for `domain`.
pub fn parse_response(domain: &FaultDomain, text: &str, source: DiagnosisSource) -> Diagnosis {
    let mut explanation: Vec<&str> = Vec::new();
    let mut supporting: Vec<&str> = Vec::new();
    let mut command: Option<&str> = None;
    let mut items: Vec<&str> = Vec::new();
    let mut section = Section::Preamble;

    for raw_line in text.lines() {
        let line = raw_line.trim().trim_start_matches('*').trim();

        if let Some(rest) = marker(line, "DIAGNOSIS:") {
            section = Section::Diagnosis;
            if !rest.is_empty() {
                explanation.push(rest);
            }
        } else if let Some(rest) = marker(line, "COMMAND:") {
            section = Section::Command;
            command.get_or_insert(rest);
        } else if let Some(rest) = marker(line, "ACTIONS:") {
            section = Section::Actions;
            if !rest.is_empty() {
                items.push(rest);
            }
        } else if let Some(rest) = marker(line, "EXPLANATION:") {
            section = Section::Explanation;
            if !rest.is_empty() {
                supporting.push(rest);
            }
        } else {
            match section {
                Section::Diagnosis if !line.is_empty() => explanation.push(line),
                Section::Explanation if !line.is_empty() => supporting.push(line),
                Section::Actions => {
                    if let Some(item) = line.strip_prefix('-') {
                        items.push(item.trim());
                    }
                }
                _ => {}
            }
        }
    }

    let mut actions = Vec::new();
    let mut rejected = Vec::new();
    let mut accept = |token: &str| match interpret_token(domain, token) {
        Ok(Some(action)) => {
            if !actions.contains(&action) {
                actions.push(action);
            }
        }
        Ok(None) => {}
        Err(UnsupportedToken(t)) => rejected.push(t),
    };

    match domain {
        FaultDomain::Memory => {
            if items.is_empty() {
                if let Some(cmd) = command {
                    accept(cmd);
                }
            }
            for item in &items {
                accept(item);
            }
        }
        _ => {
            if let Some(cmd) = command {
                accept(cmd);
            }
        }
    }

    Diagnosis {
        explanation: explanation.join(" "),
        actions,
        supporting_explanation: supporting.join(" "),
        rejected,
        raw: text.to_string(),
        source,
    }
}

fn strip_decoration(token: &str) -> &str {
    token
        .trim()
        .trim_matches(|c: char| matches!(c, '[' | ']' | '`' | '"' | '\'' | '.'))
        .trim()
}

/// Map one raw token onto the closed vocabulary of `domain`.
///
/// `Ok(None)` is an explicit "none" (or an empty token).
pub fn interpret_token(
    domain: &FaultDomain,
    token: &str,
) -> Result<Option<RemedyAction>, UnsupportedToken> {
    let cleaned = strip_decoration(token);
    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case(TOKEN_NONE) {
        return Ok(None);
    }
    let unsupported = || UnsupportedToken(cleaned.to_string());

    match domain {
        FaultDomain::Service(name) => {
            // The whole token must be a verb, optionally naming this same service
            let words: Vec<&str> = cleaned.split_whitespace().collect();
            let (verb, target) = match words.as_slice() {
                [verb] => (*verb, None),
                [verb, target] => (*verb, Some(*target)),
                _ => return Err(unsupported()),
            };
            if target.is_some_and(|t| t != name.as_str()) {
                return Err(unsupported());
            }
            match verb.to_ascii_lowercase().as_str() {
                "restart" => Ok(Some(RemedyAction::RestartService(name.clone()))),
                "start" => Ok(Some(RemedyAction::StartService(name.clone()))),
                _ => Err(unsupported()),
            }
        }
        FaultDomain::Dns => match cleaned.to_ascii_lowercase().replace('_', "-").as_str() {
            TOKEN_PROBE_IP => Ok(Some(RemedyAction::ProbeIpReachability)),
            TOKEN_RESET_DNS => Ok(Some(RemedyAction::ResetDnsConfig)),
            _ => Err(unsupported()),
        },
        FaultDomain::Memory => {
            let words: Vec<&str> = cleaned.split_whitespace().collect();
            let lower: Vec<String> = words.iter().map(|w| w.to_ascii_lowercase()).collect();
            let lower: Vec<&str> = lower.iter().map(|w| w.as_str()).collect();
            match lower.as_slice() {
                ["kill", _] => words[1]
                    .parse::<u32>()
                    .map(|pid| Some(RemedyAction::TerminateProcess(pid)))
                    .map_err(|_| unsupported()),
                ["terminate", "process", _] => words[2]
                    .parse::<u32>()
                    .map(|pid| Some(RemedyAction::TerminateProcess(pid)))
                    .map_err(|_| unsupported()),
                ["service", _, "stop"] => Ok(Some(RemedyAction::StopService(words[1].to_string()))),
                ["stop", "service", _] => Ok(Some(RemedyAction::StopService(words[2].to_string()))),
                _ => Err(unsupported()),
            }
        }
    }
}

/// Canned reply used whenever the reasoning service is unavailable.
///
/// Deterministic in its inputs: the same observation and prior attempts
/// always produce the same bytes.
pub fn fallback_response(observation: &Observation, prior: &[AttemptSummary]) -> String {
    match observation {
        Observation::Service(obs) => {
            if obs.liveness == Liveness::Unknown {
                return "DIAGNOSIS: Unknown service issue\n\
                        COMMAND: none\n\
                        EXPLANATION: Cannot determine appropriate fix for this service"
                    .to_string();
            }
            match obs.name.as_str() {
                "ssh" => "DIAGNOSIS: The SSH service appears to be stopped or crashed\n\
                          COMMAND: start\n\
                          EXPLANATION: Starting the SSH service should restore SSH connectivity"
                    .to_string(),
                "apache2" => "DIAGNOSIS: The Apache web server is not running\n\
                              COMMAND: start\n\
                              EXPLANATION: Starting the Apache service will restore web server functionality"
                    .to_string(),
                name => format!(
                    "DIAGNOSIS: The {name} service is not running\n\
                     COMMAND: start\n\
                     EXPLANATION: Starting the {name} service should restore it"
                ),
            }
        }
        Observation::Memory(_) => "DIAGNOSIS: High memory usage detected\n\
                                   ACTIONS: none\n\
                                   EXPLANATION: Cannot safely determine which processes to terminate without AI analysis"
            .to_string(),
        Observation::Dns(_) => {
            let tried = |wanted: RemedyAction| {
                prior
                    .iter()
                    .filter(move |a| a.action.as_ref() == Some(&wanted))
            };
            if tried(RemedyAction::ResetDnsConfig).next().is_some() {
                "DIAGNOSIS: DNS resolution still failing after resetting the resolver configuration\n\
                 COMMAND: none\n\
                 EXPLANATION: Automated options are exhausted; manual investigation is required"
                    .to_string()
            } else if let Some(probe) = tried(RemedyAction::ProbeIpReachability).last() {
                if probe.outcome == Outcome::Succeeded {
                    "DIAGNOSIS: IP connectivity works but name resolution fails; the resolver configuration is likely broken\n\
                     COMMAND: reset-dns-config\n\
                     EXPLANATION: Restoring known-good nameservers should bring name resolution back"
                        .to_string()
                } else {
                    "DIAGNOSIS: General network connectivity is down, not only DNS\n\
                     COMMAND: none\n\
                     EXPLANATION: Changing resolver settings cannot help without IP connectivity"
                        .to_string()
                }
            } else {
                "DIAGNOSIS: DNS resolution is failing\n\
                 COMMAND: probe-ip-reachability\n\
                 EXPLANATION: Checking raw IP connectivity separates a DNS fault from a network outage"
                    .to_string()
            }
        }
    }
}

/// The fallback text, parsed
pub fn fallback_diagnosis(observation: &Observation, prior: &[AttemptSummary]) -> Diagnosis {
    parse_response(
        &observation.domain(),
        &fallback_response(observation, prior),
        DiagnosisSource::Fallback,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DnsObservation, MemoryObservation, ServiceObservation};

    fn ssh() -> FaultDomain {
        FaultDomain::service("ssh")
    }

    #[test]
    fn test_parse_service_command() {
        let text = "DIAGNOSIS: sshd crashed\nCOMMAND: restart\nEXPLANATION: bring it back";
        let d = parse_response(&ssh(), text, DiagnosisSource::Reasoner);
        assert_eq!(d.explanation, "sshd crashed");
        assert_eq!(d.actions, vec![RemedyAction::RestartService("ssh".into())]);
        assert_eq!(d.supporting_explanation, "bring it back");
        assert!(d.rejected.is_empty());
    }

    #[test]
    fn test_missing_command_line_means_no_action() {
        let d = parse_response(&ssh(), "DIAGNOSIS: something\nEXPLANATION: x", DiagnosisSource::Reasoner);
        assert!(d.is_no_action());
        assert_eq!(d.action_summary(), "none");

        let d = parse_response(&ssh(), "I have no idea what format you want", DiagnosisSource::Reasoner);
        assert!(d.is_no_action());
    }

    #[test]
    fn test_unknown_service_token_is_rejected() {
        let d = parse_response(
            &ssh(),
            "DIAGNOSIS: x\nCOMMAND: reinstall\nEXPLANATION: y",
            DiagnosisSource::Reasoner,
        );
        assert!(d.is_no_action());
        assert_eq!(d.rejected, vec!["reinstall".to_string()]);
    }

    #[test]
    fn test_service_token_must_match_exactly() {
        for token in ["restart apache2", "start && reboot", "start ssh now"] {
            let text = format!("DIAGNOSIS: x\nCOMMAND: {}\nEXPLANATION: y", token);
            let d = parse_response(&ssh(), &text, DiagnosisSource::Reasoner);
            assert!(d.is_no_action(), "{} was accepted", token);
            assert_eq!(d.rejected, vec![token.to_string()]);
        }

        let d = parse_response(
            &ssh(),
            "DIAGNOSIS: x\nCOMMAND: RESTART ssh\nEXPLANATION: y",
            DiagnosisSource::Reasoner,
        );
        assert_eq!(d.actions, vec![RemedyAction::RestartService("ssh".into())]);
    }

    #[test]
    fn test_decorated_tokens() {
        let d = parse_response(
            &ssh(),
            "**DIAGNOSIS:** down\n**COMMAND:** `start`\nEXPLANATION: y",
            DiagnosisSource::Reasoner,
        );
        assert_eq!(d.actions, vec![RemedyAction::StartService("ssh".into())]);
    }

    #[test]
    fn test_parse_memory_actions() {
        let text = "DIAGNOSIS: chrome is eating RAM\n\
                    ACTIONS:\n\
                    - kill 4242\n\
                    - service apache2 stop\n\
                    - reboot now\n\
                    - terminate process 77\n\
                    EXPLANATION: frees memory\n\
                    - kill 1";
        let d = parse_response(&FaultDomain::Memory, text, DiagnosisSource::Reasoner);
        assert_eq!(
            d.actions,
            vec![
                RemedyAction::TerminateProcess(4242),
                RemedyAction::StopService("apache2".into()),
                RemedyAction::TerminateProcess(77),
            ]
        );
        assert_eq!(d.rejected, vec!["reboot now".to_string()]);
    }

    #[test]
    fn test_memory_actions_none() {
        let d = parse_response(
            &FaultDomain::Memory,
            "DIAGNOSIS: high\nACTIONS: none\nEXPLANATION: unsafe",
            DiagnosisSource::Reasoner,
        );
        assert!(d.is_no_action());
        assert!(d.rejected.is_empty());
    }

    #[test]
    fn test_dns_tokens() {
        let d = parse_response(
            &FaultDomain::Dns,
            "DIAGNOSIS: x\nCOMMAND: reset_dns_config\nEXPLANATION: y",
            DiagnosisSource::Reasoner,
        );
        assert_eq!(d.actions, vec![RemedyAction::ResetDnsConfig]);

        let d = parse_response(
            &FaultDomain::Dns,
            "DIAGNOSIS: x\nCOMMAND: restart\nEXPLANATION: y",
            DiagnosisSource::Reasoner,
        );
        assert!(d.is_no_action());
        assert_eq!(d.rejected, vec!["restart".to_string()]);
    }

    #[test]
    fn test_ssh_fallback_recommends_start() {
        let obs = Observation::Service(ServiceObservation::new("ssh", Liveness::Inactive));
        let d = fallback_diagnosis(&obs, &[]);
        assert_eq!(d.source, DiagnosisSource::Fallback);
        assert_eq!(d.actions, vec![RemedyAction::StartService("ssh".into())]);
        assert_eq!(d.explanation, "The SSH service appears to be stopped or crashed");
    }

    #[test]
    fn test_fallback_is_byte_identical() {
        let observations = vec![
            Observation::Service(ServiceObservation::new("apache2", Liveness::Inactive)),
            Observation::Service(ServiceObservation::new("nginx", Liveness::Unknown)),
            Observation::Memory(MemoryObservation::new(95.0, 90.0)),
            Observation::Dns(DnsObservation::new(false, true, "nameserver 10.0.0.1")),
        ];
        for obs in observations {
            assert_eq!(fallback_response(&obs, &[]), fallback_response(&obs, &[]));
        }
    }

    #[test]
    fn test_dns_fallback_escalates() {
        let obs = Observation::Dns(DnsObservation::new(false, true, ""));
        assert_eq!(
            fallback_diagnosis(&obs, &[]).actions,
            vec![RemedyAction::ProbeIpReachability]
        );

        let mut probe = AttemptSummary {
            number: 1,
            action: Some(RemedyAction::ProbeIpReachability),
            command: "ping -c 1 -W 2 8.8.8.8".into(),
            output: String::new(),
            outcome: Outcome::Succeeded,
            resolution_after: false,
        };
        assert_eq!(
            fallback_diagnosis(&obs, std::slice::from_ref(&probe)).actions,
            vec![RemedyAction::ResetDnsConfig]
        );

        probe.outcome = Outcome::Failed;
        assert!(fallback_diagnosis(&obs, &[probe]).is_no_action());
    }

    #[test]
    fn test_render_attempts_in_order() {
        let attempts = vec![
            AttemptSummary {
                number: 1,
                action: Some(RemedyAction::ProbeIpReachability),
                command: "ping".into(),
                output: "ok".into(),
                outcome: Outcome::Succeeded,
                resolution_after: false,
            },
            AttemptSummary {
                number: 2,
                action: None,
                command: String::new(),
                output: String::new(),
                outcome: Outcome::Succeeded,
                resolution_after: false,
            },
        ];
        let text = render_attempts(&attempts);
        let first = text.find("Attempt 1").unwrap();
        let second = text.find("Attempt 2").unwrap();
        assert!(first < second);
        assert!(text.contains("Action: none"));
    }
}
