//! Pipeline stage events
//!
//! One event per stage transition of a pipeline run. Events are appended to
//! the structured event log as one JSON object each, tagged by `stage`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::escalation::state::{EscalationTier, ValidationStatus};

/// All pipeline stage events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The query passed (or failed) the scan-relevance gate
    Comprehension {
        query: String,
        is_scan_related: bool,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Starting tier chosen
    ComplexityClassification {
        tier: EscalationTier,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// A tier's generator is being called
    GenerationStart {
        tier: EscalationTier,
        is_initial_tier: bool,
        timestamp: DateTime<Utc>,
    },

    /// The generator produced a candidate
    GenerationSuccess {
        tier: EscalationTier,
        command: String,
        timestamp: DateTime<Utc>,
    },

    /// The generator failed or timed out
    GenerationFailure {
        tier: EscalationTier,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// One validator call
    ValidationAttempt {
        tier: EscalationTier,
        attempt: u32,
        status: ValidationStatus,
        score: f64,
        issues: Vec<String>,
        command: String,
        timestamp: DateTime<Utc>,
    },

    /// Self-correction produced a new candidate
    SelfCorrectionSuccess {
        tier: EscalationTier,
        attempt: u32,
        session_id: String,
        new_command: String,
        timestamp: DateTime<Utc>,
    },

    /// Self-correction gave up on the candidate
    SelfCorrectionFailure {
        tier: EscalationTier,
        attempt: u32,
        session_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The validator rejected the candidate outright
    ValidationFailure {
        tier: EscalationTier,
        attempt: u32,
        issues: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A command was accepted
    PipelineSuccess {
        command: String,
        confidence: f64,
        tier: EscalationTier,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// The run ended without a command
    PipelineFailure {
        query: String,
        code: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Stage name, as serialized in the `stage` tag
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Comprehension { .. } => "comprehension",
            Self::ComplexityClassification { .. } => "complexity_classification",
            Self::GenerationStart { .. } => "generation_start",
            Self::GenerationSuccess { .. } => "generation_success",
            Self::GenerationFailure { .. } => "generation_failure",
            Self::ValidationAttempt { .. } => "validation_attempt",
            Self::SelfCorrectionSuccess { .. } => "self_correction_success",
            Self::SelfCorrectionFailure { .. } => "self_correction_failure",
            Self::ValidationFailure { .. } => "validation_failure",
            Self::PipelineSuccess { .. } => "pipeline_success",
            Self::PipelineFailure { .. } => "pipeline_failure",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Comprehension { timestamp, .. }
            | Self::ComplexityClassification { timestamp, .. }
            | Self::GenerationStart { timestamp, .. }
            | Self::GenerationSuccess { timestamp, .. }
            | Self::GenerationFailure { timestamp, .. }
            | Self::ValidationAttempt { timestamp, .. }
            | Self::SelfCorrectionSuccess { timestamp, .. }
            | Self::SelfCorrectionFailure { timestamp, .. }
            | Self::ValidationFailure { timestamp, .. }
            | Self::PipelineSuccess { timestamp, .. }
            | Self::PipelineFailure { timestamp, .. } => *timestamp,
        }
    }

    /// Tier the event belongs to, if any
    pub fn tier(&self) -> Option<EscalationTier> {
        match self {
            Self::ComplexityClassification { tier, .. }
            | Self::GenerationStart { tier, .. }
            | Self::GenerationSuccess { tier, .. }
            | Self::GenerationFailure { tier, .. }
            | Self::ValidationAttempt { tier, .. }
            | Self::SelfCorrectionSuccess { tier, .. }
            | Self::SelfCorrectionFailure { tier, .. }
            | Self::ValidationFailure { tier, .. }
            | Self::PipelineSuccess { tier, .. } => Some(*tier),
            Self::Comprehension { .. } | Self::PipelineFailure { .. } => None,
        }
    }

    /// Terminal events end a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PipelineSuccess { .. } | Self::PipelineFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = PipelineEvent::ValidationAttempt {
            tier: EscalationTier::Tier2,
            attempt: 1,
            status: ValidationStatus::Repairable,
            score: 0.4,
            issues: vec!["requires root".to_string()],
            command: "nmap -sS scanme.nmap.org".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stage"], "validation_attempt");
        assert_eq!(json["tier"], "tier2");
        assert_eq!(json["status"], "repairable");

        let parsed: PipelineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.stage(), "validation_attempt");
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_event_accessors() {
        let event = PipelineEvent::PipelineFailure {
            query: "scan".to_string(),
            code: "tiers_exhausted".to_string(),
            reason: "no tier produced a valid command".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.tier(), None);
        assert!(event.is_terminal());
        assert_eq!(event.stage(), "pipeline_failure");
    }
}
