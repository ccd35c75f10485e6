//! Self-correction agent
//!
//! Repairs a command the validator judged repairable (or any failing
//! command) by running it in the sandbox, fixing what the output reveals
//! and running it again:
//!
//! ```text
//!   Repairable ──▶ simulate ──▶ autonomous fix ──▶ simulate ──▶ success?
//!                                     │                            │ no
//!                                     ▼ unavailable                ▼
//!                      ┌──────── iterative loop (1..=max) ◀── new baseline
//!                      │  simulate ▶ analyze ▶ best correction ▶ simulate
//!                      └──▶ feedback (interim / no_corrections / final)
//! ```
//!
//! Every run produces a [`CorrectionSession`] which is appended to the
//! session history whether it succeeded, failed or was cancelled.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::autonomous::AutonomousFixTable;
use super::error_analyzer::ErrorAnalyzer;
use super::session::{CorrectionAttempt, CorrectionSession, FeedbackRecord, FeedbackStage};
use crate::command::Command;
use crate::escalation::state::ValidationStatus;
use crate::execution::{ExecutionReport, ExecutionSimulator, SuccessCriterion};
use crate::history::SessionRepository;

/// Configuration for the correction loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// Rounds of the iterative phase
    pub max_attempts: u32,
    /// Wall-clock limit per sandbox run
    pub execution_timeout_secs: u64,
    pub success: SuccessCriterion,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            execution_timeout_secs: 300,
            success: SuccessCriterion::default(),
        }
    }
}

/// The run was cancelled while waiting on the sandbox.
struct Cancelled;

/// Drives one correction session per call.
pub struct SelfCorrectionAgent {
    simulator: ExecutionSimulator,
    analyzer: Arc<ErrorAnalyzer>,
    fixes: AutonomousFixTable,
    history: Arc<dyn SessionRepository>,
    config: CorrectionConfig,
}

impl SelfCorrectionAgent {
    pub fn new(simulator: ExecutionSimulator, history: Arc<dyn SessionRepository>) -> Self {
        let config = CorrectionConfig::default();
        Self {
            simulator: simulator.with_timeout(Duration::from_secs(config.execution_timeout_secs)),
            analyzer: Arc::new(ErrorAnalyzer::new()),
            fixes: AutonomousFixTable::standard(),
            history,
            config,
        }
    }

    pub fn with_config(mut self, config: CorrectionConfig) -> Self {
        self.simulator = self
            .simulator
            .with_timeout(Duration::from_secs(config.execution_timeout_secs));
        self.config = config;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<ErrorAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_fixes(mut self, fixes: AutonomousFixTable) -> Self {
        self.fixes = fixes;
        self
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &Arc<ErrorAnalyzer> {
        &self.analyzer
    }

    pub fn history(&self) -> &Arc<dyn SessionRepository> {
        &self.history
    }

    /// Try to turn `command` into one that runs cleanly.
    ///
    /// The autonomous phase only runs for [`ValidationStatus::Repairable`].
    /// The returned session is already recorded in the history.
    pub async fn correct(
        &self,
        command: &Command,
        intent: &str,
        status: ValidationStatus,
        cancel: &CancellationToken,
    ) -> CorrectionSession {
        let mut session = CorrectionSession::new(intent, &command.raw);
        info!(
            session_id = %session.id,
            command = %command,
            status = %status,
            "Self-correction started"
        );

        let result = self.run_phases(&mut session, command, status, cancel).await;
        if result.is_err() {
            session.cancelled = true;
            session.succeeded = false;
            warn!(session_id = %session.id, "Self-correction cancelled");
        }

        if !session.succeeded && !session.cancelled {
            session.feedback.push(FeedbackRecord::from_attempts(
                FeedbackStage::Final,
                &session.attempts,
                self.config.max_attempts,
                intent,
                &session.final_command,
            ));
        }
        session.ended_at = Some(Utc::now());

        if let Err(e) = self.history.append(session.clone()) {
            warn!(session_id = %session.id, error = %e, "Failed to record correction session");
        }

        info!(
            session_id = %session.id,
            outcome = ?session.outcome(),
            attempts = session.attempts.len(),
            final_command = %session.final_command,
            "Self-correction finished"
        );
        session
    }

    async fn run_phases(
        &self,
        session: &mut CorrectionSession,
        command: &Command,
        status: ValidationStatus,
        cancel: &CancellationToken,
    ) -> Result<(), Cancelled> {
        let mut baseline = command.clone();

        if status == ValidationStatus::Repairable {
            let report = self.simulate(&baseline, cancel).await?;
            if report.errors.is_empty() {
                debug!(session_id = %session.id, "Repairable command ran without errors");
                session.succeeded = true;
                session.is_autonomous = true;
                session.final_command = baseline.raw.clone();
                return Ok(());
            }

            let repair = report
                .first_error()
                .and_then(|first| self.fixes.repair(first.kind, &baseline));
            match repair {
                Some(repair) => {
                    let retest = self.simulate(&repair.command, cancel).await?;
                    let succeeded = self.config.success.is_met(&retest);
                    session.attempts.push(CorrectionAttempt {
                        index: session.next_index(),
                        command_before: baseline.raw.clone(),
                        command_after: repair.command.raw.clone(),
                        errors_before: report.errors,
                        errors_after: Some(retest.errors),
                        succeeded,
                        repair_type: Some(repair.repair_type),
                        changes: repair.changes,
                        timestamp: Utc::now(),
                    });
                    session.final_command = repair.command.raw.clone();
                    if succeeded {
                        info!(
                            session_id = %session.id,
                            repair_type = %repair.repair_type,
                            "Autonomous repair succeeded"
                        );
                        session.succeeded = true;
                        session.is_autonomous = true;
                        return Ok(());
                    }
                    baseline = repair.command;
                }
                None => debug!(session_id = %session.id, "Autonomous repair unavailable"),
            }
        }

        for round in 1..=self.config.max_attempts {
            let report = self.simulate(&baseline, cancel).await?;
            if self.config.success.is_met(&report) {
                session.attempts.push(CorrectionAttempt {
                    index: session.next_index(),
                    command_before: baseline.raw.clone(),
                    command_after: baseline.raw.clone(),
                    errors_before: report.errors,
                    errors_after: None,
                    succeeded: true,
                    repair_type: None,
                    changes: Vec::new(),
                    timestamp: Utc::now(),
                });
                session.succeeded = true;
                session.final_command = baseline.raw.clone();
                return Ok(());
            }

            let corrections = self.analyzer.analyze(&report);
            let Some(best) = corrections.into_iter().next() else {
                session.attempts.push(CorrectionAttempt {
                    index: session.next_index(),
                    command_before: baseline.raw.clone(),
                    command_after: baseline.raw.clone(),
                    errors_before: report.errors,
                    errors_after: None,
                    succeeded: false,
                    repair_type: None,
                    changes: Vec::new(),
                    timestamp: Utc::now(),
                });
                session.final_command = baseline.raw.clone();
                session.feedback.push(FeedbackRecord::from_attempts(
                    FeedbackStage::NoCorrections,
                    &session.attempts,
                    self.config.max_attempts,
                    &session.intent,
                    &baseline.raw,
                ));
                return Ok(());
            };

            let candidate = match Command::parse(&best.corrected_command) {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(corrected = %best.corrected_command, error = %e, "Correction does not parse");
                    baseline.clone()
                }
            };

            let (errors_after, succeeded) = if candidate.raw != baseline.raw {
                let retest = self.simulate(&candidate, cancel).await?;
                let ok = self.config.success.is_met(&retest);
                (Some(retest.errors), ok)
            } else {
                (None, false)
            };

            debug!(
                session_id = %session.id,
                round,
                kind = %best.kind,
                confidence = best.confidence,
                candidate = %candidate,
                succeeded,
                "Correction tested"
            );

            session.attempts.push(CorrectionAttempt {
                index: session.next_index(),
                command_before: baseline.raw.clone(),
                command_after: candidate.raw.clone(),
                errors_before: report.errors,
                errors_after,
                succeeded,
                repair_type: None,
                changes: best.changes,
                timestamp: Utc::now(),
            });
            session.final_command = candidate.raw.clone();

            if succeeded {
                session.succeeded = true;
                return Ok(());
            }
            baseline = candidate;

            if round + 1 == self.config.max_attempts {
                session.feedback.push(FeedbackRecord::from_attempts(
                    FeedbackStage::Interim,
                    &session.attempts,
                    self.config.max_attempts,
                    &session.intent,
                    &baseline.raw,
                ));
            }
        }
        Ok(())
    }

    async fn simulate(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, Cancelled> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled),
            report = self.simulator.simulate(command) => Ok(report),
        }
    }
}

impl std::fmt::Debug for SelfCorrectionAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfCorrectionAgent")
            .field("simulator", &self.simulator)
            .field("config", &self.config)
            .finish()
    }
}
