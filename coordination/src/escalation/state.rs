//! Escalation state: tiers, verdicts and escalation history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generation tiers, cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTier {
    /// Template-driven generation for simple requests
    Tier1,
    /// Retrieval-augmented generation
    Tier2,
    /// Full model generation for hard requests
    Tier3,
}

impl EscalationTier {
    pub const ALL: [EscalationTier; 3] = [Self::Tier1, Self::Tier2, Self::Tier3];

    /// Position in the chain (0-based)
    pub fn index(&self) -> usize {
        match self {
            Self::Tier1 => 0,
            Self::Tier2 => 1,
            Self::Tier3 => 2,
        }
    }

    /// The next tier, or `None` at the top of the chain
    pub fn next(&self) -> Option<Self> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Complexity label the tier is meant for
    pub fn complexity_label(&self) -> &'static str {
        match self {
            Self::Tier1 => "easy",
            Self::Tier2 => "medium",
            Self::Tier3 => "hard",
        }
    }
}

impl std::fmt::Display for EscalationTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tier1 => write!(f, "tier1"),
            Self::Tier2 => write!(f, "tier2"),
            Self::Tier3 => write!(f, "tier3"),
        }
    }
}

impl std::str::FromStr for EscalationTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tier1" | "easy" => Ok(Self::Tier1),
            "tier2" | "medium" => Ok(Self::Tier2),
            "tier3" | "hard" => Ok(Self::Tier3),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// Tri-state validator verdict status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    /// Invalid but believed fixable without regeneration
    Repairable,
    Invalid,
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::Repairable => write!(f, "repairable"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

/// What the validator said about one command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorVerdict {
    pub status: ValidationStatus,
    /// Confidence in [0, 1]
    pub score: f64,
    pub issues: Vec<String>,
}

impl ValidatorVerdict {
    pub fn valid(score: f64) -> Self {
        Self {
            status: ValidationStatus::Valid,
            score: score.clamp(0.0, 1.0),
            issues: Vec::new(),
        }
    }

    pub fn repairable(issues: Vec<String>) -> Self {
        Self {
            status: ValidationStatus::Repairable,
            score: 0.0,
            issues,
        }
    }

    pub fn invalid(issues: Vec<String>) -> Self {
        Self {
            status: ValidationStatus::Invalid,
            score: 0.0,
            issues,
        }
    }
}

/// Reasons for escalation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EscalationReason {
    /// The tier's generator failed or timed out
    GenerationFailed { reason: String },
    /// The validator rejected the candidate outright
    ValidationInvalid { issues: Vec<String> },
    /// Self-correction could not repair the candidate
    CorrectionFailed { session_id: String },
    /// Every validation attempt in the tier was used
    AttemptsExhausted { attempts: u32 },
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GenerationFailed { reason } => write!(f, "generation failed: {}", reason),
            Self::ValidationInvalid { issues } => {
                write!(f, "validation invalid ({} issues)", issues.len())
            }
            Self::CorrectionFailed { session_id } => {
                write!(f, "self-correction failed in session {}", session_id)
            }
            Self::AttemptsExhausted { attempts } => {
                write!(f, "{} validation attempts exhausted", attempts)
            }
        }
    }
}

/// Record of an escalation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub from_tier: EscalationTier,
    /// `None` when the last tier gave up
    pub to_tier: Option<EscalationTier>,
    pub reason: EscalationReason,
    pub timestamp: DateTime<Utc>,
}

/// Accepted command and how it was reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDecision {
    pub command: String,
    /// Validator score of the accepted command
    pub confidence: f64,
    pub tier: EscalationTier,
    /// Validation attempts made in the final tier
    pub attempts_used: u32,
    pub escalations: Vec<EscalationRecord>,
    /// Correction sessions run on the way, in order
    pub correction_sessions: Vec<String>,
}

/// Full escalation state for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationState {
    pub query: String,
    pub current_tier: EscalationTier,
    /// Validation attempts in the current tier
    pub tier_attempts: u32,
    /// Validation attempts across all tiers
    pub total_attempts: u32,
    pub escalation_history: Vec<EscalationRecord>,
    pub correction_sessions: Vec<String>,
    pub resolved: bool,
    pub exhausted: bool,
    pub last_activity: DateTime<Utc>,
}

impl EscalationState {
    pub fn new(query: impl Into<String>, start: EscalationTier) -> Self {
        Self {
            query: query.into(),
            current_tier: start,
            tier_attempts: 0,
            total_attempts: 0,
            escalation_history: Vec::new(),
            correction_sessions: Vec::new(),
            resolved: false,
            exhausted: false,
            last_activity: Utc::now(),
        }
    }

    /// Record one validator call in the current tier
    pub fn record_attempt(&mut self) {
        self.tier_attempts += 1;
        self.total_attempts += 1;
        self.last_activity = Utc::now();
    }

    pub fn record_session(&mut self, session_id: impl Into<String>) {
        self.correction_sessions.push(session_id.into());
        self.last_activity = Utc::now();
    }

    /// Leave the current tier. Returns the next tier, or `None` (and marks
    /// the state exhausted) when there is none.
    pub fn escalate(&mut self, reason: EscalationReason) -> Option<EscalationTier> {
        let next = self.current_tier.next();
        self.escalation_history.push(EscalationRecord {
            from_tier: self.current_tier,
            to_tier: next,
            reason,
            timestamp: Utc::now(),
        });
        match next {
            Some(tier) => {
                self.current_tier = tier;
                self.tier_attempts = 0;
            }
            None => self.exhausted = true,
        }
        self.last_activity = Utc::now();
        next
    }

    pub fn finalize(&mut self, command: impl Into<String>, confidence: f64) -> FinalDecision {
        self.resolved = true;
        FinalDecision {
            command: command.into(),
            confidence,
            tier: self.current_tier,
            attempts_used: self.tier_attempts,
            escalations: self.escalation_history.clone(),
            correction_sessions: self.correction_sessions.clone(),
        }
    }

    /// Get a summary for logging
    pub fn summary(&self) -> String {
        format!(
            "tier={} tier_attempts={} total_attempts={} escalations={} resolved={} exhausted={}",
            self.current_tier,
            self.tier_attempts,
            self.total_attempts,
            self.escalation_history.len(),
            self.resolved,
            self.exhausted,
        )
    }
}
