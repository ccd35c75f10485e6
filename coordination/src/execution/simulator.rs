//! Execution Simulator
//!
//! Runs a command through a [`SandboxRunner`] under a wall-clock limit and
//! classifies the output into an [`ExecutionReport`]. The simulator never
//! fails: timeouts and sandbox errors become error records in the report.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::report::{ExecutionReport, RunOutput};
use crate::command::Command;
use crate::error::CollaboratorResult;

/// Default wall-clock limit for one sandboxed run.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Flags that need raw socket access.
pub const PRIVILEGED_FLAGS: &[&str] = &[
    "-sS", "-sA", "-sW", "-sM", "-sN", "-sF", "-sX", "-sU", "-sO", "-O", "-PE", "-PP", "-PM",
];

/// True when the command needs raw socket capabilities in the sandbox.
pub fn requires_privileges(command: &Command) -> bool {
    command
        .flags
        .iter()
        .any(|f| PRIVILEGED_FLAGS.contains(&f.as_str()))
}

/// Something that can actually run a scan command in isolation.
///
/// Implementations return raw output. Classifying that output is the
/// simulator's job.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn run(&self, command: &Command) -> CollaboratorResult<RunOutput>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Timed, classified execution of scan commands.
#[derive(Clone)]
pub struct ExecutionSimulator {
    runner: Arc<dyn SandboxRunner>,
    timeout: Duration,
}

impl ExecutionSimulator {
    pub fn new(runner: Arc<dyn SandboxRunner>) -> Self {
        Self {
            runner,
            timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute and classify. Dropping the returned future aborts the run.
    pub async fn simulate(&self, command: &Command) -> ExecutionReport {
        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.runner.run(command)).await;

        let report = match result {
            Ok(Ok(output)) => ExecutionReport::from_output(&command.raw, &output, started.elapsed()),
            Ok(Err(e)) => {
                warn!(runner = self.runner.name(), error = %e, "Sandbox run failed");
                ExecutionReport::sandbox_failure(&command.raw, &e.to_string(), started.elapsed())
            }
            Err(_) => {
                warn!(
                    runner = self.runner.name(),
                    timeout_secs = self.timeout.as_secs(),
                    command = %command,
                    "Sandbox run timed out"
                );
                ExecutionReport::timed_out(&command.raw, self.timeout)
            }
        };

        debug!(
            command = %command,
            errors = report.errors.len(),
            exit_code = ?report.exit_code,
            duration_ms = report.duration_ms,
            "Execution classified"
        );
        report
    }
}

impl std::fmt::Debug for ExecutionSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSimulator")
            .field("runner", &self.runner.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}
