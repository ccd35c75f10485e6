//! Correction-rule engine
//!
//! Maps classified execution errors to concrete command corrections using an
//! ordered rule table. For each error the first rule whose error kind and
//! message pattern both match wins. Candidates from all errors are returned
//! most-confident first.

use std::sync::{LazyLock, Mutex};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::transforms::{apply, CorrectionAction, CorrectionKind};
use crate::command::Command;
use crate::error::RuleTableError;
use crate::execution::{ErrorKind, ErrorRecord, ExecutionReport};

/// Serializable rule definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub error_kind: ErrorKind,
    /// Case-insensitive regex matched against the error message.
    pub message_pattern: String,
    pub kind: CorrectionKind,
    pub action: CorrectionAction,
    pub confidence: f64,
    pub explanation: String,
}

impl RuleSpec {
    fn new(
        error_kind: ErrorKind,
        message_pattern: &str,
        kind: CorrectionKind,
        action: CorrectionAction,
        confidence: f64,
        explanation: &str,
    ) -> Self {
        Self {
            error_kind,
            message_pattern: message_pattern.to_string(),
            kind,
            action,
            confidence,
            explanation: explanation.to_string(),
        }
    }
}

fn flags(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
    list.iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

/// The built-in rule table, in priority order.
pub fn standard_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec::new(
            ErrorKind::PermissionDenied,
            r"requires[_ ]root|Operation not permitted",
            CorrectionKind::ReplaceFlag,
            CorrectionAction::ReplaceFlag {
                replacements: pairs(&[
                    ("-sS", "-sT"),
                    ("-sA", "-sT"),
                    ("-sF", "-sT"),
                    ("-sX", "-sT"),
                    ("-sN", "-sT"),
                    ("-sU", "-sT"),
                ]),
            },
            0.95,
            "Replace raw-socket scan type with TCP connect scan",
        ),
        RuleSpec::new(
            ErrorKind::PermissionDenied,
            r"PCAP permission problem",
            CorrectionKind::RemoveFlag,
            CorrectionAction::RemoveFlags {
                flags: flags(&["-O", "--osscan-guess"]),
            },
            0.90,
            "Remove OS detection which needs raw packet capture",
        ),
        RuleSpec::new(
            ErrorKind::PortSpecification,
            r"Illegal port number|port specifications are illegal",
            CorrectionKind::FixSyntax,
            CorrectionAction::FixPortSpec,
            0.85,
            "Fix port range ordering and separators",
        ),
        RuleSpec::new(
            ErrorKind::DnsResolution,
            r"Failed to resolve|Could not resolve hostname",
            CorrectionKind::AddFlag,
            CorrectionAction::AddFlag {
                flag: "-n".to_string(),
            },
            0.80,
            "Skip DNS resolution",
        ),
        RuleSpec::new(
            ErrorKind::ScriptNotFound,
            r"Failed to load.*script|script.*does not exist",
            CorrectionKind::AlternativeApproach,
            CorrectionAction::SubstituteScript {
                alternatives: pairs(&[
                    ("vuln", "default"),
                    ("exploit", "safe"),
                    ("brute", "auth"),
                ]),
                fallback: "default".to_string(),
            },
            0.75,
            "Use an available script category",
        ),
        RuleSpec::new(
            ErrorKind::Timeout,
            r"timed out|timeout",
            CorrectionKind::AdjustTiming,
            CorrectionAction::AdjustTiming {
                ladder: pairs(&[("-T5", "-T4"), ("-T4", "-T3"), ("-T3", "-T2")]),
                default: "-T3".to_string(),
            },
            0.85,
            "Use a slower timing template",
        ),
        RuleSpec::new(
            ErrorKind::NetworkUnreachable,
            r"No route to host|Network is unreachable",
            CorrectionKind::SimplifyCommand,
            CorrectionAction::simplify_default(),
            0.70,
            "Simplify scan to reduce network load",
        ),
        RuleSpec::new(
            ErrorKind::SyntaxError,
            r"unrecognized option|requires an argument",
            CorrectionKind::FixSyntax,
            CorrectionAction::FixGeneralSyntax,
            0.80,
            "Fix command-line syntax",
        ),
    ]
}

#[derive(Debug, Clone)]
struct CompiledRule {
    spec: RuleSpec,
    pattern: Regex,
}

/// Validated, ordered rule table.
#[derive(Debug, Clone)]
pub struct CorrectionRuleTable {
    rules: Vec<CompiledRule>,
}

static STANDARD_TABLE: LazyLock<CorrectionRuleTable> =
    LazyLock::new(|| CorrectionRuleTable::compile(standard_rules()).unwrap());

impl CorrectionRuleTable {
    /// Validate and compile a rule table. Fails on bad patterns, confidences
    /// outside `0.0..=1.0`, or actions that do not implement their kind.
    pub fn compile(specs: Vec<RuleSpec>) -> Result<Self, RuleTableError> {
        let mut rules = Vec::with_capacity(specs.len());
        for (index, spec) in specs.into_iter().enumerate() {
            if !(0.0..=1.0).contains(&spec.confidence) {
                return Err(RuleTableError::ConfidenceOutOfRange {
                    index,
                    confidence: spec.confidence,
                });
            }
            if !spec.action.implements(spec.kind) {
                return Err(RuleTableError::IncompatibleAction {
                    index,
                    kind: spec.kind.to_string(),
                    action: spec.action.name().to_string(),
                });
            }
            let pattern = Regex::new(&format!("(?i){}", spec.message_pattern)).map_err(|source| {
                RuleTableError::InvalidPattern {
                    index,
                    pattern: spec.message_pattern.clone(),
                    source,
                }
            })?;
            rules.push(CompiledRule { spec, pattern });
        }
        Ok(Self { rules })
    }

    pub fn standard() -> Self {
        STANDARD_TABLE.clone()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn specs(&self) -> impl Iterator<Item = &RuleSpec> {
        self.rules.iter().map(|r| &r.spec)
    }

    fn first_match(&self, error: &ErrorRecord) -> Option<(usize, &CompiledRule)> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, r)| r.spec.error_kind == error.kind && r.pattern.is_match(&error.message))
    }
}

/// A concrete rewrite proposed for one error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub error: ErrorRecord,
    pub kind: CorrectionKind,
    pub rule_index: usize,
    pub original_command: String,
    pub corrected_command: String,
    pub changes: Vec<String>,
    pub confidence: f64,
    pub explanation: String,
}

impl Correction {
    pub fn is_noop(&self) -> bool {
        self.original_command == self.corrected_command
    }
}

/// One analyzer invocation, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub error_kinds: Vec<ErrorKind>,
    pub corrections: Vec<Correction>,
}

/// Aggregate view of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub analyses: usize,
    pub corrections_proposed: usize,
    pub analyses_without_correction: usize,
    pub mean_top_confidence: Option<f64>,
}

/// Per-report analysis: every candidate plus the one to try first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub command: String,
    pub error_count: usize,
    pub error_kinds: Vec<ErrorKind>,
    pub best_correction: Option<Correction>,
    pub corrections: Vec<Correction>,
}

/// Applies the rule table to execution reports and keeps an append-only
/// audit log of every analysis.
#[derive(Debug)]
pub struct ErrorAnalyzer {
    table: CorrectionRuleTable,
    audit: Mutex<Vec<AnalysisRecord>>,
}

impl Default for ErrorAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorAnalyzer {
    pub fn new() -> Self {
        Self::with_table(CorrectionRuleTable::standard())
    }

    pub fn with_table(table: CorrectionRuleTable) -> Self {
        Self {
            table,
            audit: Mutex::new(Vec::new()),
        }
    }

    pub fn table(&self) -> &CorrectionRuleTable {
        &self.table
    }

    /// Propose corrections for every error in the report, most confident
    /// first. Equal confidences keep error order.
    pub fn analyze(&self, report: &ExecutionReport) -> Vec<Correction> {
        let mut corrections = Vec::new();
        match Command::parse(&report.command) {
            Ok(command) => {
                for error in &report.errors {
                    let Some((rule_index, rule)) = self.table.first_match(error) else {
                        debug!(kind = %error.kind, message = %error.message, "No correction rule matched");
                        continue;
                    };
                    let transformed = apply(&rule.spec.action, &command);
                    corrections.push(Correction {
                        error: error.clone(),
                        kind: rule.spec.kind,
                        rule_index,
                        original_command: command.raw.clone(),
                        corrected_command: transformed.command.raw,
                        changes: transformed.changes,
                        confidence: rule.spec.confidence,
                        explanation: rule.spec.explanation.clone(),
                    });
                }
            }
            Err(e) => {
                debug!(command = %report.command, error = %e, "Report command does not parse");
            }
        }

        corrections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        info!(
            command = %report.command,
            errors = report.errors.len(),
            corrections = corrections.len(),
            "Errors analyzed"
        );

        if let Ok(mut audit) = self.audit.lock() {
            audit.push(AnalysisRecord {
                timestamp: Utc::now(),
                command: report.command.clone(),
                error_kinds: report.error_kinds(),
                corrections: corrections.clone(),
            });
        }
        corrections
    }

    /// Analyze a report and package the result for display.
    pub fn report(&self, report: &ExecutionReport) -> AnalysisReport {
        let corrections = self.analyze(report);
        AnalysisReport {
            command: report.command.clone(),
            error_count: report.errors.len(),
            error_kinds: report.error_kinds(),
            best_correction: corrections.first().cloned(),
            corrections,
        }
    }

    /// Snapshot of the audit log, oldest first.
    pub fn history(&self) -> Vec<AnalysisRecord> {
        self.audit.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn summary(&self) -> AnalysisSummary {
        let history = self.history();
        let tops: Vec<f64> = history
            .iter()
            .filter_map(|r| r.corrections.first().map(|c| c.confidence))
            .collect();
        AnalysisSummary {
            analyses: history.len(),
            corrections_proposed: history.iter().map(|r| r.corrections.len()).sum(),
            analyses_without_correction: history.iter().filter(|r| r.corrections.is_empty()).count(),
            mean_top_confidence: if tops.is_empty() {
                None
            } else {
                Some(tops.iter().sum::<f64>() / tops.len() as f64)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::execution::RunOutput;

    fn report(command: &str, stderr: &str, code: i32) -> ExecutionReport {
        ExecutionReport::from_output(command, &RunOutput::new("", stderr, code), Duration::ZERO)
    }

    #[test]
    fn test_standard_table_compiles() {
        let table = CorrectionRuleTable::standard();
        assert_eq!(table.len(), 8);
    }

    #[test]
    fn test_permission_error_replaces_scan_type() {
        let analyzer = ErrorAnalyzer::new();
        let r = report(
            "nmap -sS -p 80 scanme.nmap.org",
            "You requested a scan type which requires root privileges.",
            0,
        );
        let corrections = analyzer.analyze(&r);
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].corrected_command, "nmap -sT -p 80 scanme.nmap.org");
        assert_eq!(corrections[0].confidence, 0.95);
        assert_eq!(corrections[0].kind, CorrectionKind::ReplaceFlag);
    }

    #[test]
    fn test_pcap_problem_removes_os_detection() {
        let analyzer = ErrorAnalyzer::new();
        let r = report(
            "nmap -O scanme.nmap.org",
            "pcap_open_live(): PCAP permission problem, OS detection needs raw packet access",
            0,
        );
        let corrections = analyzer.analyze(&r);
        assert_eq!(corrections[0].rule_index, 1);
        assert_eq!(corrections[0].corrected_command, "nmap scanme.nmap.org");
    }

    #[test]
    fn test_reversed_port_range() {
        let r = report("nmap -p 80-70 example.com", "Your port specifications are illegal.", 0);
        let corrections = ErrorAnalyzer::new().analyze(&r);
        assert!(corrections[0].corrected_command.contains("-p 70-80"));
    }

    #[test]
    fn test_sorted_by_confidence() {
        let mut r = report("nmap -T5 nowhere.invalid", "Failed to resolve \"nowhere.invalid\".", 0);
        r.errors.push(ErrorRecord::new(
            ErrorKind::Timeout,
            "execution_timeout",
            "Command timed out after 300 seconds",
        ));
        let corrections = ErrorAnalyzer::new().analyze(&r);
        assert_eq!(corrections.len(), 2);
        assert_eq!(corrections[0].kind, CorrectionKind::AdjustTiming);
        assert_eq!(corrections[0].corrected_command, "nmap -T4 nowhere.invalid");
        assert_eq!(corrections[1].kind, CorrectionKind::AddFlag);
        assert!(corrections[0].confidence >= corrections[1].confidence);
    }

    #[test]
    fn test_zero_errors_zero_corrections() {
        let r = report("nmap -sT scanme.nmap.org", "", 0);
        assert!(ErrorAnalyzer::new().analyze(&r).is_empty());
    }

    #[test]
    fn test_kind_must_match_as_well_as_message() {
        let mut r = report("nmap -sS host.example.com", "", 0);
        r.errors.push(ErrorRecord::new(ErrorKind::Unknown, "x", "requires root privileges"));
        assert!(ErrorAnalyzer::new().analyze(&r).is_empty());
    }

    #[test]
    fn test_audit_log_append_only() {
        let analyzer = ErrorAnalyzer::new();
        analyzer.analyze(&report("nmap -sT a.example.com", "", 0));
        analyzer.analyze(&report("nmap -sS b.example.com", "Operation not permitted", 0));
        let history = analyzer.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].command, "nmap -sT a.example.com");
        let summary = analyzer.summary();
        assert_eq!(summary.analyses, 2);
        assert_eq!(summary.analyses_without_correction, 1);
        assert_eq!(summary.mean_top_confidence, Some(0.95));
    }

    #[test]
    fn test_invalid_tables_rejected() {
        let mut specs = standard_rules();
        specs[0].confidence = 1.5;
        assert!(matches!(
            CorrectionRuleTable::compile(specs),
            Err(RuleTableError::ConfidenceOutOfRange { index: 0, .. })
        ));

        let mut specs = standard_rules();
        specs[2].message_pattern = "(unclosed".into();
        assert!(matches!(
            CorrectionRuleTable::compile(specs),
            Err(RuleTableError::InvalidPattern { index: 2, .. })
        ));

        let mut specs = standard_rules();
        specs[3].kind = CorrectionKind::SimplifyCommand;
        assert!(matches!(
            CorrectionRuleTable::compile(specs),
            Err(RuleTableError::IncompatibleAction { index: 3, .. })
        ));
    }

    #[test]
    fn test_report_picks_most_confident() {
        let analyzer = ErrorAnalyzer::new();
        let r = report(
            "nmap -sS -p 80 scanme.nmap.org",
            "You requested a scan type which requires root privileges.\nFailed to resolve \"scanme.nmap.org\".",
            1,
        );
        let analysis = analyzer.report(&r);
        assert_eq!(analysis.error_count, r.errors.len());
        let best = analysis.best_correction.unwrap();
        assert_eq!(best.kind, CorrectionKind::ReplaceFlag);
        assert_eq!(analysis.corrections[0], best);
        assert_eq!(analyzer.history().len(), 1);
    }
}
