//! Local validator
//!
//! A [`Validator`] built from the in-process components, used when no
//! remote validator is configured:
//!
//! ```text
//! structural/security rejection          → Invalid
//! accepted, simulated run succeeds       → Valid (score = 1 - risk/100)
//! accepted, run fails, a known fix exists → Repairable
//! accepted, run fails, nothing to apply   → Invalid
//! ```
//!
//! "A known fix exists" means the autonomous table repairs the first error,
//! or the rule table proposes a correction that changes the command.

use async_trait::async_trait;
use tracing::debug;

use super::engine::Validator;
use super::state::ValidatorVerdict;
use crate::command::Command;
use crate::error::CollaboratorResult;
use crate::execution::{ExecutionReport, ExecutionSimulator, SuccessCriterion};
use crate::feedback::autonomous::AutonomousFixTable;
use crate::feedback::error_analyzer::ErrorAnalyzer;
use crate::validator::StructuralValidator;

pub struct SimulatingValidator {
    structural: StructuralValidator,
    simulator: ExecutionSimulator,
    analyzer: ErrorAnalyzer,
    fixes: AutonomousFixTable,
    success: SuccessCriterion,
}

impl SimulatingValidator {
    pub fn new(structural: StructuralValidator, simulator: ExecutionSimulator) -> Self {
        Self {
            structural,
            simulator,
            analyzer: ErrorAnalyzer::new(),
            fixes: AutonomousFixTable::standard(),
            success: SuccessCriterion::default(),
        }
    }

    pub fn with_success_criterion(mut self, success: SuccessCriterion) -> Self {
        self.success = success;
        self
    }

    fn has_known_fix(&self, command: &Command, report: &ExecutionReport) -> bool {
        let autonomous = report
            .first_error()
            .is_some_and(|first| self.fixes.repair(first.kind, command).is_some());
        autonomous || self.analyzer.analyze(report).iter().any(|c| !c.is_noop())
    }
}

#[async_trait]
impl Validator for SimulatingValidator {
    async fn validate(&self, command: &Command) -> CollaboratorResult<ValidatorVerdict> {
        let outcome = self.structural.validate(&command.raw);
        if let Some(rejection) = &outcome.rejection {
            let mut issues = vec![rejection.to_string()];
            if let Some(risk) = &outcome.risk_assessment {
                issues.extend(risk.security_issues());
            }
            debug!(command = %command, rejection = %rejection, "Rejected before simulation");
            return Ok(ValidatorVerdict::invalid(issues));
        }

        let risk_score = outcome
            .risk_assessment
            .as_ref()
            .map(|r| r.risk_score)
            .unwrap_or(0);
        let report = self.simulator.simulate(command).await;

        if self.success.is_met(&report) {
            let mut verdict = ValidatorVerdict::valid(1.0 - f64::from(risk_score) / 100.0);
            verdict.issues = report.warnings;
            return Ok(verdict);
        }

        let issues: Vec<String> = report.errors.iter().map(|e| e.message.clone()).collect();
        if self.has_known_fix(command, &report) {
            Ok(ValidatorVerdict::repairable(issues))
        } else {
            Ok(ValidatorVerdict::invalid(issues))
        }
    }

    fn name(&self) -> &str {
        "local"
    }
}

impl std::fmt::Debug for SimulatingValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatingValidator")
            .field("simulator", &self.simulator)
            .field("success", &self.success)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::escalation::state::ValidationStatus;
    use crate::execution::SyntheticRunner;

    fn validator() -> SimulatingValidator {
        SimulatingValidator::new(
            StructuralValidator::new(),
            ExecutionSimulator::new(Arc::new(SyntheticRunner::new())),
        )
    }

    async fn verdict(raw: &str) -> ValidatorVerdict {
        validator().validate(&Command::parse(raw).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_clean_command_is_valid() {
        let v = verdict("nmap -sV scanme.nmap.org").await;
        assert_eq!(v.status, ValidationStatus::Valid);
        assert!((v.score - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_security_rejection_is_invalid() {
        let v = verdict("nmap --script vuln 10.0.0.5").await;
        assert_eq!(v.status, ValidationStatus::Invalid);
        assert!(!v.issues.is_empty());
    }

    #[tokio::test]
    async fn test_fixable_failure_is_repairable() {
        let v = verdict("nmap -sS -p 80 scanme.nmap.org").await;
        assert_eq!(v.status, ValidationStatus::Repairable);
        assert!(v.issues.iter().any(|i| i.contains("root")));
    }

    #[tokio::test]
    async fn test_wrong_program_is_invalid() {
        let v = verdict("masscan scanme.nmap.org").await;
        assert_eq!(v.status, ValidationStatus::Invalid);
    }
}
