//! Correction session records
//!
//! A [`CorrectionSession`] is the full account of one self-correction run:
//! every attempt, every feedback record and the outcome. Sessions are
//! appended to the session history when they end and never modified after.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{ErrorKind, ErrorRecord};

/// Category of an autonomous repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairType {
    PermissionFix,
    SyntaxFix,
    ScriptWhitelist,
    TimingAdjustment,
}

impl fmt::Display for RepairType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionFix => write!(f, "permission_fix"),
            Self::SyntaxFix => write!(f, "syntax_fix"),
            Self::ScriptWhitelist => write!(f, "script_whitelist"),
            Self::TimingAdjustment => write!(f, "timing_adjustment"),
        }
    }
}

/// One tested candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionAttempt {
    /// 1-based, unique within the session.
    pub index: u32,
    pub command_before: String,
    pub command_after: String,
    pub errors_before: Vec<ErrorRecord>,
    /// Errors from re-testing `command_after`; absent when no re-test ran.
    pub errors_after: Option<Vec<ErrorRecord>>,
    pub succeeded: bool,
    /// Set for autonomous repairs.
    pub repair_type: Option<RepairType>,
    pub changes: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Advice for the generator when self-correction gives up or is about to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    ParameterChange,
    ComplexityReduction,
    TargetModification,
    PrivilegeEscalation,
    AlternativeApproach,
    CompleteRegeneration,
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterChange => write!(f, "parameter_change"),
            Self::ComplexityReduction => write!(f, "complexity_reduction"),
            Self::TargetModification => write!(f, "target_modification"),
            Self::PrivilegeEscalation => write!(f, "privilege_escalation"),
            Self::AlternativeApproach => write!(f, "alternative_approach"),
            Self::CompleteRegeneration => write!(f, "complete_regeneration"),
        }
    }
}

/// When in the session a feedback record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStage {
    /// One attempt left.
    Interim,
    /// The rule table had nothing to offer.
    NoCorrections,
    /// The session ended without success.
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: String,
    pub suggestion: String,
    pub priority: Priority,
}

impl Recommendation {
    fn new(action: &str, suggestion: &str, priority: Priority) -> Self {
        Self {
            action: action.to_string(),
            suggestion: suggestion.to_string(),
            priority,
        }
    }

    fn for_error(kind: ErrorKind) -> Option<Self> {
        let rec = match kind {
            ErrorKind::PermissionDenied => Self::new(
                "avoid_root_requiring_scans",
                "Use TCP connect scan (-sT) instead of SYN scan (-sS)",
                Priority::High,
            ),
            ErrorKind::NetworkUnreachable => Self::new(
                "verify_target_accessibility",
                "Check target reachability or choose a different target",
                Priority::High,
            ),
            ErrorKind::ScriptNotFound => Self::new(
                "use_basic_scripts",
                "Use only default or safe script categories",
                Priority::Medium,
            ),
            ErrorKind::DnsResolution => Self::new(
                "use_resolvable_targets",
                "Use IP addresses or hostnames that resolve publicly",
                Priority::Medium,
            ),
            ErrorKind::Timeout => Self::new(
                "reduce_scan_scope",
                "Scan fewer ports or drop version detection",
                Priority::Medium,
            ),
            _ => return None,
        };
        Some(rec)
    }
}

/// Structured advice handed back to the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub kind: FeedbackKind,
    pub stage: FeedbackStage,
    pub reason: String,
    pub persistent_errors: Vec<ErrorKind>,
    pub recommendations: Vec<Recommendation>,
    pub attempts: usize,
    pub original_intent: String,
    pub failed_command: String,
    pub timestamp: DateTime<Utc>,
}

/// Error kinds present in every attempt, in order of first appearance.
pub fn persistent_errors(attempts: &[CorrectionAttempt]) -> Vec<ErrorKind> {
    let Some(first) = attempts.first() else {
        return Vec::new();
    };
    let mut kinds = Vec::new();
    for e in &first.errors_before {
        if !kinds.contains(&e.kind)
            && attempts
                .iter()
                .all(|a| a.errors_before.iter().any(|b| b.kind == e.kind))
        {
            kinds.push(e.kind);
        }
    }
    kinds
}

impl FeedbackRecord {
    /// Derive feedback from the attempts made so far.
    ///
    /// A single dominant persistent cause picks the kind. Without one, an
    /// exhausted session asks for a simpler command and an ongoing one for
    /// parameter changes.
    pub fn from_attempts(
        stage: FeedbackStage,
        attempts: &[CorrectionAttempt],
        max_attempts: u32,
        intent: &str,
        failed_command: &str,
    ) -> Self {
        let persistent = persistent_errors(attempts);
        let exhausted = attempts.len() >= max_attempts as usize;

        let dominant: Vec<FeedbackKind> = persistent
            .iter()
            .filter_map(|k| match k {
                ErrorKind::PermissionDenied => Some(FeedbackKind::PrivilegeEscalation),
                ErrorKind::NetworkUnreachable => Some(FeedbackKind::TargetModification),
                ErrorKind::ScriptNotFound => Some(FeedbackKind::AlternativeApproach),
                _ => None,
            })
            .collect();

        let kind = match (stage, dominant.as_slice()) {
            (FeedbackStage::NoCorrections, _) => FeedbackKind::CompleteRegeneration,
            (_, [single]) => *single,
            _ if exhausted => FeedbackKind::ComplexityReduction,
            _ => FeedbackKind::ParameterChange,
        };

        let mut recommendations: Vec<Recommendation> = persistent
            .iter()
            .filter_map(|k| Recommendation::for_error(*k))
            .collect();
        if exhausted {
            recommendations.push(Recommendation::new(
                "simplify_command",
                "Generate a simpler command with fewer options",
                Priority::Medium,
            ));
        }

        let reason = match stage {
            FeedbackStage::Interim => "max_attempts_approaching",
            FeedbackStage::NoCorrections => "no_corrections_available",
            FeedbackStage::Final if exhausted => "max_attempts_exhausted",
            FeedbackStage::Final => "correction_failed",
        };

        Self {
            kind,
            stage,
            reason: reason.to_string(),
            persistent_errors: persistent,
            recommendations,
            attempts: attempts.len(),
            original_intent: intent.to_string(),
            failed_command: failed_command.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    AutonomousRepair,
    IterativeRepair,
    Failed,
    Cancelled,
}

impl SessionOutcome {
    /// Tag used when the session is reported to other components.
    pub fn source_tag(&self) -> &'static str {
        match self {
            Self::AutonomousRepair => "SELF-CORR-AUTO",
            Self::IterativeRepair => "SELF-CORR-ITER",
            Self::Failed | Self::Cancelled => "SELF-CORR-FAILED",
        }
    }
}

/// Full account of one self-correction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionSession {
    pub id: Uuid,
    pub intent: String,
    pub original_command: String,
    pub final_command: String,
    pub attempts: Vec<CorrectionAttempt>,
    pub feedback: Vec<FeedbackRecord>,
    pub succeeded: bool,
    pub is_autonomous: bool,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CorrectionSession {
    pub fn new(intent: &str, original_command: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent: intent.to_string(),
            original_command: original_command.to_string(),
            final_command: original_command.to_string(),
            attempts: Vec::new(),
            feedback: Vec::new(),
            succeeded: false,
            is_autonomous: false,
            cancelled: false,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn next_index(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    pub fn outcome(&self) -> SessionOutcome {
        match (self.cancelled, self.succeeded, self.is_autonomous) {
            (true, _, _) => SessionOutcome::Cancelled,
            (false, true, true) => SessionOutcome::AutonomousRepair,
            (false, true, false) => SessionOutcome::IterativeRepair,
            (false, false, _) => SessionOutcome::Failed,
        }
    }

    /// Every change tried, in attempt order, including failed attempts.
    pub fn all_changes(&self) -> Vec<String> {
        self.attempts
            .iter()
            .flat_map(|a| a.changes.iter().cloned())
            .collect()
    }

    pub fn report(&self) -> SessionReport {
        let duration_ms = self
            .ended_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        let outcome = self.outcome();
        SessionReport {
            session_id: self.id,
            outcome,
            source_tag: outcome.source_tag().to_string(),
            original_command: self.original_command.clone(),
            final_command: self.final_command.clone(),
            attempts: self.attempts.len(),
            repair_types: self.attempts.iter().filter_map(|a| a.repair_type).collect(),
            changes: self
                .attempts
                .iter()
                .filter(|a| a.succeeded)
                .flat_map(|a| a.changes.iter().cloned())
                .collect(),
            last_feedback: self.feedback.last().map(|f| f.kind),
            duration_ms,
        }
    }
}

/// Compact summary of a session for logs and other components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub outcome: SessionOutcome,
    pub source_tag: String,
    pub original_command: String,
    pub final_command: String,
    pub attempts: usize,
    pub repair_types: Vec<RepairType>,
    pub changes: Vec<String>,
    pub last_feedback: Option<FeedbackKind>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(index: u32, kinds: &[ErrorKind]) -> CorrectionAttempt {
        CorrectionAttempt {
            index,
            command_before: "nmap -sS host.example.com".into(),
            command_after: "nmap -sS host.example.com".into(),
            errors_before: kinds
                .iter()
                .map(|k| ErrorRecord::new(*k, "test", k.to_string()))
                .collect(),
            errors_after: None,
            succeeded: false,
            repair_type: None,
            changes: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_persistent_errors_require_every_attempt() {
        let attempts = vec![
            attempt(1, &[ErrorKind::PermissionDenied, ErrorKind::Unknown]),
            attempt(2, &[ErrorKind::PermissionDenied]),
        ];
        assert_eq!(persistent_errors(&attempts), vec![ErrorKind::PermissionDenied]);
        assert!(persistent_errors(&[]).is_empty());
    }

    #[test]
    fn test_single_cause_picks_kind() {
        let attempts = vec![
            attempt(1, &[ErrorKind::PermissionDenied]),
            attempt(2, &[ErrorKind::PermissionDenied]),
            attempt(3, &[ErrorKind::PermissionDenied]),
        ];
        let fb = FeedbackRecord::from_attempts(FeedbackStage::Final, &attempts, 3, "syn scan", "nmap -sS h");
        assert_eq!(fb.kind, FeedbackKind::PrivilegeEscalation);
        assert_eq!(fb.reason, "max_attempts_exhausted");
        assert_eq!(fb.recommendations[0].action, "avoid_root_requiring_scans");
        assert_eq!(fb.recommendations.last().unwrap().action, "simplify_command");
    }

    #[test]
    fn test_no_dominant_cause() {
        let attempts = vec![
            attempt(1, &[ErrorKind::Timeout]),
            attempt(2, &[ErrorKind::Timeout]),
        ];
        let interim = FeedbackRecord::from_attempts(FeedbackStage::Interim, &attempts, 3, "", "nmap h");
        assert_eq!(interim.kind, FeedbackKind::ParameterChange);
        let last = FeedbackRecord::from_attempts(
            FeedbackStage::Final,
            &[attempts.clone(), vec![attempt(3, &[ErrorKind::Timeout])]].concat(),
            3,
            "",
            "nmap h",
        );
        assert_eq!(last.kind, FeedbackKind::ComplexityReduction);
    }

    #[test]
    fn test_no_corrections_requests_regeneration() {
        let attempts = vec![attempt(1, &[ErrorKind::ScriptNotFound])];
        let fb = FeedbackRecord::from_attempts(FeedbackStage::NoCorrections, &attempts, 3, "", "nmap h");
        assert_eq!(fb.kind, FeedbackKind::CompleteRegeneration);
        assert_eq!(fb.reason, "no_corrections_available");
    }

    #[test]
    fn test_session_outcome_tags() {
        let mut s = CorrectionSession::new("scan", "nmap -sS h.example.com");
        assert_eq!(s.outcome().source_tag(), "SELF-CORR-FAILED");
        s.succeeded = true;
        s.is_autonomous = true;
        assert_eq!(s.report().source_tag, "SELF-CORR-AUTO");
        s.is_autonomous = false;
        assert_eq!(s.report().outcome, SessionOutcome::IterativeRepair);
        s.cancelled = true;
        assert_eq!(s.outcome(), SessionOutcome::Cancelled);
    }

    #[test]
    fn test_all_changes_includes_failed_attempts() {
        let mut s = CorrectionSession::new("scan", "nmap -sS h.example.com");
        let mut failed = attempt(1, &[ErrorKind::PermissionDenied]);
        failed.changes = vec!["-sS -> -sT".into()];
        let mut fixed = attempt(2, &[ErrorKind::Timeout]);
        fixed.changes = vec!["-T4 -> -T3".into()];
        fixed.succeeded = true;
        s.attempts = vec![failed, fixed];

        assert_eq!(s.all_changes(), vec!["-sS -> -sT", "-T4 -> -T3"]);
        assert_eq!(s.report().changes, vec!["-T4 -> -T3"]);
    }
}
