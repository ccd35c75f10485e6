//! Pipeline assembly
//!
//! Builds every collaborator from a [`PipelineConfig`] and exposes one entry
//! point per CLI operation:
//!
//! ```text
//! sandbox:   DockerRunner if configured, SyntheticRunner otherwise
//! validator: HttpValidator if configured, SimulatingValidator otherwise
//! risk:      built-in tables plus the configured [risk] policy
//! events:    EventBus ─▶ JsonlEventSink (when an event log is set)
//! history:   InMemorySessionHistory shared with the correction agent
//! ```

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use scan_coordination::feedback::{AnalysisReport, AutonomousFixTable};
use scan_coordination::history::HistoryStats;
use scan_coordination::validator::BatchSummary;
use scan_coordination::{
    Command, CorrectionSession, EscalationOrchestrator, EscalationTier, EventBus, ExecutionReport,
    ExecutionSimulator, FinalDecision, InMemorySessionHistory, PipelineResult, RiskEngine,
    SandboxRunner, SelfCorrectionAgent, SessionRepository, SimulatingValidator, StructuralValidator,
    SyntheticRunner, ValidationOutcome, ValidationStatus, Validator,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clients::{HttpGenerator, HttpValidator};
use crate::config::PipelineConfig;
use crate::runner::DockerRunner;
use crate::telemetry::JsonlEventSink;

/// Rule tables in effect, for the `rules` command.
#[derive(Debug, Serialize)]
pub struct RulesOverview {
    pub risk: serde_json::Value,
    pub correction_rules: Vec<scan_coordination::feedback::RuleSpec>,
    pub autonomous_fixes: Vec<AutonomousCoverage>,
}

/// Outcomes of a batch validation with their aggregate.
#[derive(Debug, Serialize)]
pub struct BatchValidation {
    pub outcomes: Vec<ValidationOutcome>,
    pub summary: BatchSummary,
}

#[derive(Debug, Serialize)]
pub struct AutonomousCoverage {
    pub error_kind: String,
    pub repair_type: scan_coordination::feedback::RepairType,
}

pub struct Pipeline {
    config: PipelineConfig,
    structural: StructuralValidator,
    simulator: ExecutionSimulator,
    history: Arc<InMemorySessionHistory>,
    agent: Arc<SelfCorrectionAgent>,
    orchestrator: EscalationOrchestrator,
}

impl Pipeline {
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let runner: Arc<dyn SandboxRunner> = match &config.sandbox {
            Some(sandbox) => {
                info!(image = %sandbox.image, network = %sandbox.network, "Using docker sandbox");
                Arc::new(DockerRunner::new(sandbox.clone()))
            }
            None => {
                info!("No sandbox image configured, using synthetic runner");
                Arc::new(SyntheticRunner::new())
            }
        };
        let simulator = ExecutionSimulator::new(runner)
            .with_timeout(Duration::from_secs(config.execution_timeout_secs));
        let rules = config.risk.rules().context("Invalid risk policy")?;
        if !config.risk.is_empty() {
            info!(
                forbidden_flags = config.risk.forbidden_flags.len(),
                unsafe_ranges = config.risk.unsafe_ranges.len(),
                "Custom risk rules loaded"
            );
        }
        let structural =
            StructuralValidator::with_engine(RiskEngine::with_rules(rules)).strict(config.strict);

        let history = Arc::new(InMemorySessionHistory::new());
        let agent = Arc::new(
            SelfCorrectionAgent::new(simulator.clone(), history.clone())
                .with_config(config.correction_config()),
        );

        let validator: Arc<dyn Validator> = match &config.validator_url {
            Some(url) => {
                info!(url = %url, "Using remote validator");
                Arc::new(HttpValidator::new(
                    url.clone(),
                    Duration::from_secs(config.validator_timeout_secs),
                ))
            }
            None => Arc::new(SimulatingValidator::new(structural.clone(), simulator.clone())),
        };
        let generator = Arc::new(HttpGenerator::new(
            config.generators.clone(),
            Duration::from_secs(config.generator_timeout_secs),
        ));

        let mut bus = EventBus::new();
        if let Some(path) = &config.event_log {
            let sink = JsonlEventSink::open(path)
                .context(format!("Failed to set up event log {}", path.display()))?;
            bus = bus.with_sink(Arc::new(sink));
        }

        let orchestrator = EscalationOrchestrator::new(generator, validator, agent.clone())
            .with_config(config.orchestrator_config())
            .with_events(bus.shared());

        info!(
            generators = config.generators.configured(),
            max_corrections = config.max_corrections,
            strict = config.strict,
            "Pipeline ready"
        );

        Ok(Self {
            config,
            structural,
            simulator,
            history,
            agent,
            orchestrator,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &EscalationOrchestrator {
        &self.orchestrator
    }

    /// Structural and security validation only. `strict` tightens the
    /// configured mode for this call.
    pub fn validate(&self, command: &str, strict: bool) -> ValidationOutcome {
        self.structural_for(strict).validate(command)
    }

    pub fn validate_batch<S: AsRef<str>>(&self, commands: &[S], strict: bool) -> BatchValidation {
        let (outcomes, summary) = self.structural_for(strict).validate_batch(commands);
        info!(
            total = summary.total,
            accepted = summary.accepted,
            blocked = summary.blocked,
            "Batch validated"
        );
        BatchValidation { outcomes, summary }
    }

    /// Run a command in the sandbox. Commands the validator refuses are never
    /// executed.
    pub async fn simulate(&self, command: &str) -> Result<ExecutionReport> {
        let command = self.accepted_command(command)?;
        Ok(self.simulator.simulate(&command).await)
    }

    /// Rule-engine reading of a sandbox run: every candidate correction and
    /// the one to try first.
    pub fn analyze(&self, report: &ExecutionReport) -> AnalysisReport {
        self.agent.analyzer().report(report)
    }

    /// One self-correction session for a command the caller has already
    /// judged `status`.
    pub async fn repair(
        &self,
        command: &str,
        intent: &str,
        status: ValidationStatus,
        cancel: &CancellationToken,
    ) -> Result<CorrectionSession> {
        let command = self.accepted_command(command)?;
        Ok(self.agent.correct(&command, intent, status, cancel).await)
    }

    /// Full generate/validate/repair/escalate run. Without an explicit tier
    /// the keyword classifier picks the starting tier.
    pub async fn run(
        &self,
        query: &str,
        tier: Option<EscalationTier>,
        cancel: &CancellationToken,
    ) -> PipelineResult<FinalDecision> {
        self.orchestrator.run(query, tier, cancel).await
    }

    pub fn rules(&self) -> RulesOverview {
        RulesOverview {
            risk: self.structural.risk_engine().rules().export(),
            correction_rules: self.agent.analyzer().table().specs().cloned().collect(),
            autonomous_fixes: AutonomousFixTable::standard()
                .coverage()
                .into_iter()
                .map(|(kind, repair_type)| AutonomousCoverage {
                    error_kind: kind.to_string(),
                    repair_type,
                })
                .collect(),
        }
    }

    pub fn history_stats(&self) -> HistoryStats {
        self.history.stats()
    }

    fn structural_for(&self, strict: bool) -> Cow<'_, StructuralValidator> {
        if strict && !self.config.strict {
            Cow::Owned(self.structural.clone().strict(true))
        } else {
            Cow::Borrowed(&self.structural)
        }
    }

    fn accepted_command(&self, raw: &str) -> Result<Command> {
        let outcome = self.structural.validate(raw);
        if let Some(rejection) = outcome.rejection {
            anyhow::bail!("Command rejected: {}", rejection);
        }
        Command::parse(raw).context("Failed to parse command")
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("sessions", &self.history.len())
            .finish()
    }
}
