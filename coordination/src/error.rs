//! Error taxonomy for the repair pipeline
//!
//! Rejections and collaborator failures are values that steer the pipeline
//! (a rejected command goes back to the generator, a failed collaborator
//! advances the tier). Only [`RuleTableError`] is a programming contract
//! violation, raised when a rule table is assembled.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::escalation::state::{EscalationRecord, EscalationTier};
use crate::feedback::session::FeedbackRecord;
use crate::risk::RiskLevel;

/// Result type alias for pipeline runs
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type alias for collaborator calls
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Which class of problem caused a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCategory {
    /// The text is not a well-formed scanner invocation.
    Input,
    /// The invocation is well-formed but not safe to run.
    Security,
}

impl fmt::Display for RejectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Security => write!(f, "security"),
        }
    }
}

/// Why the structural validator refused a command.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationRejection {
    #[error("Empty command")]
    Empty,

    #[error("Potential command injection detected: '{pattern}' at position {position}")]
    InjectionDetected { pattern: String, position: usize },

    #[error("Failed to parse command: {detail}")]
    Unparsable { detail: String },

    #[error("Only nmap commands are allowed, found '{found}'")]
    WrongProgram { found: String },

    #[error("No scan target specified.")]
    NoTargets,

    #[error("Invalid target format: {}", .targets.join(", "))]
    InvalidTargets { targets: Vec<String> },

    #[error("Security policy violations: {}", .issues.join("; "))]
    SecurityBlocked {
        issues: Vec<String>,
        risk_score: u8,
        risk_level: RiskLevel,
    },

    #[error("Strict mode rejects {risk_level} risk or warned commands (score {risk_score}): {}", .warnings.join("; "))]
    StrictModeBlocked {
        warnings: Vec<String>,
        risk_score: u8,
        risk_level: RiskLevel,
    },
}

impl ValidationRejection {
    pub fn category(&self) -> RejectionCategory {
        match self {
            Self::SecurityBlocked { .. } | Self::StrictModeBlocked { .. } => {
                RejectionCategory::Security
            }
            _ => RejectionCategory::Input,
        }
    }
}

/// A correction or autonomous-fix table that cannot be used.
#[derive(Debug, Error)]
pub enum RuleTableError {
    #[error("Rule {index}: invalid message pattern '{pattern}': {source}")]
    InvalidPattern {
        index: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Rule {index}: confidence {confidence} outside 0.0..=1.0")]
    ConfidenceOutOfRange { index: usize, confidence: f64 },

    #[error("Rule {index}: action {action} cannot implement correction kind {kind}")]
    IncompatibleAction {
        index: usize,
        kind: String,
        action: String,
    },

    #[error("Invalid address range '{0}'")]
    InvalidRange(String),

    #[error("Duplicate autonomous fix entry for error kind {0}")]
    DuplicateFixEntry(String),
}

/// A generator, validator or sandbox did not produce a usable answer.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("{service} unavailable: {reason}")]
    Unavailable { service: String, reason: String },

    #[error("{service} timed out after {secs}s")]
    Timeout { service: String, secs: u64 },

    #[error("{service} returned an invalid response: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error("Sandbox failure: {0}")]
    Sandbox(String),
}

impl CollaboratorError {
    pub fn unavailable(service: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Unavailable {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_response(service: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidResponse {
            service: service.into(),
            reason: reason.to_string(),
        }
    }
}

/// Terminal failure of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Query is not about network scanning: {query}")]
    OffTopic { query: String },

    /// The last tier's generator failed. Carries what earlier tiers left.
    #[error("Generation unavailable at {tier}: {reason}")]
    GenerationUnavailable {
        tier: EscalationTier,
        reason: String,
        escalations: Vec<EscalationRecord>,
        feedback: Vec<FeedbackRecord>,
    },

    #[error("All tiers exhausted after {} escalations", .escalations.len())]
    Exhausted {
        escalations: Vec<EscalationRecord>,
        feedback: Vec<FeedbackRecord>,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl PipelineError {
    /// Stable machine-readable code for event logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::OffTopic { .. } => "off_topic",
            Self::GenerationUnavailable { .. } => "generation_unavailable",
            Self::Exhausted { .. } => "tiers_exhausted",
            Self::Cancelled(_) => "cancelled",
        }
    }

    /// Feedback from the last failed correction session, if any.
    pub fn feedback(&self) -> &[FeedbackRecord] {
        match self {
            Self::GenerationUnavailable { feedback, .. } | Self::Exhausted { feedback, .. } => {
                feedback
            }
            _ => &[],
        }
    }

    pub fn escalations(&self) -> &[EscalationRecord] {
        match self {
            Self::GenerationUnavailable { escalations, .. }
            | Self::Exhausted { escalations, .. } => escalations,
            _ => &[],
        }
    }
}
