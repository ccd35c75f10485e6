//! Structural Validator
//!
//! Decides whether a command line is a well-formed, single scanner
//! invocation with plausible targets, then hands the flag/target split to the
//! risk engine. Checks run in a fixed order and the first failure wins:
//!
//! ```text
//! empty? ─▶ injection? ─▶ tokenize ─▶ program == nmap? ─▶ targets present?
//!        ─▶ targets well-formed? ─▶ risk assessment ─▶ security / strict gate
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::command::{Command, SCANNER_PROGRAM};
use crate::error::{RejectionCategory, ValidationRejection};
use crate::risk::{RiskAssessment, RiskEngine, RiskLevel};
use crate::shell_safety::detect_injection;

static IPV4_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,3}\.){3}\d{1,3}(/\d{1,2})?$").unwrap());

static HOSTNAME_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*\.[A-Za-z]{2,}$",
    )
    .unwrap()
});

/// Returns true when the target looks like an IPv4 address, a CIDR block or
/// a dotted hostname with an alphabetic top-level label.
pub fn is_well_formed_target(target: &str) -> bool {
    IPV4_TARGET.is_match(target) || HOSTNAME_TARGET.is_match(target)
}

/// Everything the validator learned about one command line.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub command_text: String,
    pub structurally_valid: bool,
    pub parsed_command: Option<Command>,
    pub risk_assessment: Option<RiskAssessment>,
    pub rejection: Option<ValidationRejection>,
}

impl ValidationOutcome {
    fn rejected(text: &str, rejection: ValidationRejection) -> Self {
        Self {
            command_text: text.to_string(),
            structurally_valid: false,
            parsed_command: None,
            risk_assessment: None,
            rejection: Some(rejection),
        }
    }

    /// Well-formed and passed the security gate.
    pub fn is_accepted(&self) -> bool {
        self.structurally_valid && self.rejection.is_none()
    }

    /// Warning-level risk findings as `flag: reason` messages.
    pub fn warnings(&self) -> Vec<String> {
        self.risk_assessment
            .as_ref()
            .map(|risk| {
                risk.warnings
                    .iter()
                    .map(|w| format!("{}: {}", w.subject, w.reason))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn rejection_category(&self) -> Option<RejectionCategory> {
        self.rejection.as_ref().map(ValidationRejection::category)
    }
}

/// Aggregate counts over a batch of validations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub accepted: usize,
    pub invalid: usize,
    pub blocked: usize,
    pub high_risk: usize,
    pub pass_rate: f64,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[ValidationOutcome]) -> Self {
        let total = outcomes.len();
        let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
        let blocked = outcomes
            .iter()
            .filter(|o| o.rejection_category() == Some(RejectionCategory::Security))
            .count();
        let invalid = outcomes
            .iter()
            .filter(|o| o.rejection_category() == Some(RejectionCategory::Input))
            .count();
        let high_risk = outcomes
            .iter()
            .filter_map(|o| o.risk_assessment.as_ref())
            .filter(|a| a.risk_level >= RiskLevel::High)
            .count();
        let pass_rate = if total == 0 {
            0.0
        } else {
            accepted as f64 / total as f64
        };
        Self {
            total,
            accepted,
            invalid,
            blocked,
            high_risk,
            pass_rate,
        }
    }
}

/// Validates command lines and attaches a risk assessment.
#[derive(Debug, Clone, Default)]
pub struct StructuralValidator {
    risk: RiskEngine,
    strict: bool,
}

impl StructuralValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(risk: RiskEngine) -> Self {
        Self {
            risk,
            strict: false,
        }
    }

    /// In strict mode a command that carries any warning, or whose risk
    /// level is high or critical, is rejected even when no forbidden rule
    /// matched.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn risk_engine(&self) -> &RiskEngine {
        &self.risk
    }

    pub fn validate(&self, text: &str) -> ValidationOutcome {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return ValidationOutcome::rejected(text, ValidationRejection::Empty);
        }

        if let Err(hit) = detect_injection(trimmed) {
            debug!(pattern = %hit.pattern, position = hit.position, "Injection pattern in command");
            return ValidationOutcome::rejected(
                text,
                ValidationRejection::InjectionDetected {
                    pattern: hit.pattern,
                    position: hit.position,
                },
            );
        }

        let command = match Command::parse(trimmed) {
            Ok(c) => c,
            Err(e) => {
                return ValidationOutcome::rejected(
                    text,
                    ValidationRejection::Unparsable {
                        detail: e.to_string(),
                    },
                )
            }
        };

        if !command.program.eq_ignore_ascii_case(SCANNER_PROGRAM) {
            return ValidationOutcome::rejected(
                text,
                ValidationRejection::WrongProgram {
                    found: command.program.clone(),
                },
            );
        }

        if command.targets.is_empty() {
            return ValidationOutcome::rejected(text, ValidationRejection::NoTargets);
        }

        let malformed: Vec<String> = command
            .targets
            .iter()
            .filter(|t| !is_well_formed_target(t))
            .cloned()
            .collect();
        if !malformed.is_empty() {
            return ValidationOutcome::rejected(
                text,
                ValidationRejection::InvalidTargets { targets: malformed },
            );
        }

        let assessment = self.risk.assess(&command.flags, &command.targets);
        let rejection = if !assessment.is_safe {
            Some(ValidationRejection::SecurityBlocked {
                issues: assessment.security_issues(),
                risk_score: assessment.risk_score,
                risk_level: assessment.risk_level,
            })
        } else if self.strict
            && (!assessment.warnings.is_empty() || assessment.risk_level >= RiskLevel::High)
        {
            Some(ValidationRejection::StrictModeBlocked {
                warnings: assessment
                    .warnings
                    .iter()
                    .map(|w| format!("{}: {}", w.subject, w.reason))
                    .collect(),
                risk_score: assessment.risk_score,
                risk_level: assessment.risk_level,
            })
        } else {
            None
        };

        debug!(
            command = %command,
            risk_score = assessment.risk_score,
            risk_level = %assessment.risk_level,
            accepted = rejection.is_none(),
            "Command validated"
        );

        ValidationOutcome {
            command_text: text.to_string(),
            structurally_valid: true,
            parsed_command: Some(command),
            risk_assessment: Some(assessment),
            rejection,
        }
    }

    pub fn validate_batch<S: AsRef<str>>(
        &self,
        commands: &[S],
    ) -> (Vec<ValidationOutcome>, BatchSummary) {
        let outcomes: Vec<_> = commands.iter().map(|c| self.validate(c.as_ref())).collect();
        let summary = BatchSummary::from_outcomes(&outcomes);
        (outcomes, summary)
    }
}
