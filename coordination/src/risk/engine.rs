//! Risk scoring
//!
//! Scores a parsed flag/target split against [`RiskRules`]. The engine is
//! pure: the same input always yields the same assessment.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::rules::RiskRules;

pub const FORBIDDEN_FLAG_WEIGHT: u32 = 40;
pub const WARNING_FLAG_WEIGHT: u32 = 10;
pub const UNSAFE_TARGET_WEIGHT: u32 = 30;

/// Coarse risk bucket derived from the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            70.. => Self::Critical,
            40..=69 => Self::High,
            20..=39 => Self::Medium,
            _ => Self::Low,
        }
    }

    /// Operator-facing recommendation for this level.
    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::Critical => "BLOCK: Critical security risks detected",
            Self::High => "CAUTION: High risk - review carefully",
            Self::Medium => "WARNING: Medium risk - proceed with caution",
            Self::Low => "ALLOW: Low risk command",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A flag or target that matched a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFinding {
    /// The flag or target as it appeared in the command.
    pub subject: String,
    /// Rule prefix or range that matched.
    pub rule: String,
    pub reason: String,
}

/// Result of scoring one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub violations: Vec<RiskFinding>,
    pub warnings: Vec<RiskFinding>,
    pub unsafe_targets: Vec<RiskFinding>,
    /// Targets found on the public allow-list (informational only).
    pub safe_targets: Vec<String>,
    pub is_safe: bool,
    pub recommendation: String,
}

impl RiskAssessment {
    /// Human-readable security issues, one per violation or unsafe target.
    pub fn security_issues(&self) -> Vec<String> {
        self.violations
            .iter()
            .map(|v| format!("Forbidden flag {}: {}", v.subject, v.reason))
            .chain(
                self.unsafe_targets
                    .iter()
                    .map(|t| format!("Unsafe target {}: {}", t.subject, t.reason)),
            )
            .collect()
    }

    pub fn compliance(&self) -> ComplianceSummary {
        let checks_failed = self.violations.len() + self.unsafe_targets.len();
        ComplianceSummary {
            compliant: self.is_safe,
            checks_failed,
            warnings: self.warnings.len(),
            safety_score: 100 - self.risk_score,
        }
    }
}

/// Pass/fail view of an assessment for audit output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceSummary {
    pub compliant: bool,
    pub checks_failed: usize,
    pub warnings: usize,
    pub safety_score: u8,
}

/// Deterministic risk scorer.
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    rules: RiskRules,
}

impl RiskEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: RiskRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RiskRules {
        &self.rules
    }

    /// Score a flag list and target list.
    ///
    /// Each flag contributes at most one forbidden match and one warning
    /// match. `is_safe` is false whenever anything forbidden or unsafe was
    /// found, regardless of the numeric score.
    pub fn assess<F, T>(&self, flags: &[F], targets: &[T]) -> RiskAssessment
    where
        F: AsRef<str>,
        T: AsRef<str>,
    {
        let mut violations = Vec::new();
        let mut warnings = Vec::new();
        for flag in flags.iter().map(AsRef::as_ref) {
            if let Some(rule) = self.rules.forbidden_match(flag) {
                violations.push(RiskFinding {
                    subject: flag.to_string(),
                    rule: rule.prefix.clone(),
                    reason: rule.reason.clone(),
                });
            }
            if let Some(rule) = self.rules.warning_match(flag) {
                warnings.push(RiskFinding {
                    subject: flag.to_string(),
                    rule: rule.prefix.clone(),
                    reason: rule.reason.clone(),
                });
            }
        }

        let mut unsafe_targets = Vec::new();
        let mut safe_targets = Vec::new();
        for target in targets.iter().map(AsRef::as_ref) {
            if self.rules.is_safe_target(target) {
                safe_targets.push(target.to_string());
            }
            if let Some(rule) = self.rules.unsafe_range_for(target) {
                unsafe_targets.push(RiskFinding {
                    subject: target.to_string(),
                    rule: rule.range.to_string(),
                    reason: rule.reason.clone(),
                });
            }
        }

        let raw = violations.len() as u32 * FORBIDDEN_FLAG_WEIGHT
            + warnings.len() as u32 * WARNING_FLAG_WEIGHT
            + unsafe_targets.len() as u32 * UNSAFE_TARGET_WEIGHT;
        let risk_score = raw.min(100) as u8;
        let risk_level = RiskLevel::from_score(risk_score);
        let is_safe = violations.is_empty() && unsafe_targets.is_empty();

        RiskAssessment {
            risk_score,
            risk_level,
            violations,
            warnings,
            unsafe_targets,
            safe_targets,
            is_safe,
            recommendation: risk_level.recommendation().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assess(flags: &[&str], targets: &[&str]) -> RiskAssessment {
        RiskEngine::new().assess(flags, targets)
    }

    #[test]
    fn test_clean_command_is_low_risk() {
        let a = assess(&["-sT", "-p"], &["scanme.nmap.org"]);
        assert_eq!(a.risk_score, 0);
        assert_eq!(a.risk_level, RiskLevel::Low);
        assert!(a.is_safe);
        assert_eq!(a.safe_targets, vec!["scanme.nmap.org"]);
        assert_eq!(a.recommendation, "ALLOW: Low risk command");
    }

    #[test]
    fn test_single_forbidden_flag_is_high_and_unsafe() {
        for flag in ["--script", "-sC", "-oN", "-oX", "--badsum", "-T5"] {
            let a = assess(&[flag], &["10.0.0.1"]);
            assert_eq!(a.risk_score, 40, "flag {flag}");
            assert_eq!(a.risk_level, RiskLevel::High, "flag {flag}");
            assert!(!a.is_safe, "flag {flag}");
        }
    }

    #[test]
    fn test_version_scan_scores_one_warning() {
        let a = assess(&["-sV"], &["scanme.nmap.org"]);
        assert_eq!(a.risk_score, 10);
        assert_eq!(a.risk_level, RiskLevel::Low);
        assert!(a.is_safe);
        assert_eq!(a.warnings.len(), 1);
    }

    #[test]
    fn test_unsafe_target_adds_thirty() {
        let a = assess(&["-sT"], &["224.0.0.1"]);
        assert_eq!(a.risk_score, 30);
        assert_eq!(a.risk_level, RiskLevel::Medium);
        assert!(!a.is_safe);
        assert_eq!(
            a.security_issues(),
            vec!["Unsafe target 224.0.0.1: Multicast range"]
        );
    }

    #[test]
    fn test_score_clamped_at_hundred() {
        let a = assess(&["--script", "-sC", "-oN", "-T5"], &["239.0.0.1"]);
        assert_eq!(a.risk_score, 100);
        assert_eq!(a.risk_level, RiskLevel::Critical);
        assert_eq!(a.violations.len(), 4);
    }

    #[test]
    fn test_level_boundaries() {
        assert_eq!(RiskLevel::from_score(19), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(20), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(39), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(40), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(69), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(70), RiskLevel::Critical);
    }

    #[test]
    fn test_warnings_alone_never_unsafe() {
        let a = assess(&["-A", "-sS", "-O", "-T4", "-sV", "-p-", "--traceroute"], &["h.example.com"]);
        assert_eq!(a.risk_score, 70);
        assert_eq!(a.risk_level, RiskLevel::Critical);
        assert!(a.is_safe);
    }

    #[test]
    fn test_forbidden_issue_format() {
        let a = assess(&["--script"], &["192.168.1.1"]);
        assert_eq!(
            a.security_issues(),
            vec!["Forbidden flag --script: Script execution not allowed"]
        );
        let c = a.compliance();
        assert!(!c.compliant);
        assert_eq!(c.checks_failed, 1);
        assert_eq!(c.safety_score, 60);
    }
}
