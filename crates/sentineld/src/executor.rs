//! Action Executor - runs whitelisted remedies and nothing else.
//!
//! Every action passes through the [`CommandWhitelist`] before anything
//! touches the host. Rejected actions are reported as skipped with no side
//! effect. A command that fails is reported once; there is no retry.

use crate::resolver::ResolverConfigFile;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sentinel_common::{CommandLine, CommandWhitelist, FaultDomain, Operation, Outcome, RemedyAction};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::process::Command;
use tracing::{error, info, warn};

/// Captured result of one process run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout and stderr, trimmed and joined
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", "") => String::new(),
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CommandLine) -> Result<CommandOutput>;
}

/// Runs commands as child processes, without a shell
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", command.program))?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Records commands instead of running them
#[derive(Default)]
pub struct RecordingCommandRunner {
    commands: Mutex<Vec<String>>,
    failing_programs: Vec<String>,
}

impl RecordingCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run of `program` exits with status 1
    pub fn failing(mut self, program: &str) -> Self {
        self.failing_programs.push(program.to_string());
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingCommandRunner {
    async fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_string());

        if self.failing_programs.contains(&command.program) {
            return Ok(CommandOutput {
                success: false,
                code: Some(1),
                stdout: String::new(),
                stderr: format!("{}: simulated failure", command.program),
            });
        }
        Ok(CommandOutput {
            success: true,
            code: Some(0),
            stdout: format!("ok: {}", command),
            stderr: String::new(),
        })
    }
}

/// What happened to one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub outcome: Outcome,
    /// Resolved operation, absent when the whitelist refused the action
    pub command: Option<String>,
    pub output: String,
}

impl ExecutionReport {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Skipped,
            command: None,
            output: reason.into(),
        }
    }
}

pub struct ActionExecutor {
    whitelist: CommandWhitelist,
    runner: Arc<dyn CommandRunner>,
    resolver: ResolverConfigFile,
    dry_run: bool,
}

impl ActionExecutor {
    pub fn new(
        whitelist: CommandWhitelist,
        runner: Arc<dyn CommandRunner>,
        resolver: ResolverConfigFile,
        dry_run: bool,
    ) -> Self {
        Self {
            whitelist,
            runner,
            resolver,
            dry_run,
        }
    }

    /// Apply one action on behalf of `domain`
    pub async fn apply(&self, domain: &FaultDomain, action: &RemedyAction) -> ExecutionReport {
        match self.whitelist.resolve(domain, action) {
            Ok(operation) => self.perform(domain, operation).await,
            Err(rejection) => {
                warn!("Refused action '{}' for {}: {}", action, domain, rejection);
                ExecutionReport::skipped(rejection.to_string())
            }
        }
    }

    /// Apply actions in order. An empty list is a successful no-op.
    pub async fn apply_all(
        &self,
        domain: &FaultDomain,
        actions: &[RemedyAction],
    ) -> (Outcome, Vec<ExecutionReport>) {
        let mut reports = Vec::with_capacity(actions.len());
        for action in actions {
            reports.push(self.apply(domain, action).await);
        }
        let outcomes: Vec<Outcome> = reports.iter().map(|r| r.outcome).collect();
        (Outcome::combine(&outcomes), reports)
    }

    async fn perform(&self, domain: &FaultDomain, operation: Operation) -> ExecutionReport {
        let description = operation.to_string();

        if self.dry_run {
            info!("[DRY-RUN] Would execute for {}: {}", domain, description);
            return ExecutionReport {
                outcome: Outcome::Succeeded,
                command: Some(description.clone()),
                output: format!("[DRY-RUN] Would execute: {}", description),
            };
        }

        info!("Executing for {}: {}", domain, description);
        match operation {
            Operation::Run(command) => match self.runner.run(&command).await {
                Ok(output) if output.success => {
                    info!("Command succeeded: {}", description);
                    ExecutionReport {
                        outcome: Outcome::Succeeded,
                        command: Some(description),
                        output: output.combined(),
                    }
                }
                Ok(output) => {
                    error!("Command failed ({:?}): {}", output.code, description);
                    ExecutionReport {
                        outcome: Outcome::Failed,
                        command: Some(description),
                        output: output.combined(),
                    }
                }
                Err(e) => {
                    error!("Command could not run: {}: {:#}", description, e);
                    ExecutionReport {
                        outcome: Outcome::Failed,
                        command: Some(description),
                        output: format!("{:#}", e),
                    }
                }
            },
            Operation::ResetResolverConfig => match self.resolver.reset().await {
                Ok(result) => ExecutionReport {
                    outcome: Outcome::Succeeded,
                    command: Some(description),
                    output: result.describe().to_string(),
                },
                Err(e) => {
                    error!("Resolver reset failed: {:#}", e);
                    ExecutionReport {
                        outcome: Outcome::Failed,
                        command: Some(description),
                        output: format!("{:#}", e),
                    }
                }
            },
        }
    }
}
