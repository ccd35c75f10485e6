//! Autonomous fix table
//!
//! Well-understood failures are repaired in one step without consulting the
//! rule engine. The table is keyed by error kind. Each entry lists fixes that
//! apply when their pattern matches the command text and their predicate (if
//! any) holds; all applicable fixes are applied in order.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::session::RepairType;
use super::transforms::{apply, CorrectionAction};
use crate::command::Command;
use crate::error::RuleTableError;
use crate::execution::ErrorKind;

/// Extra condition a fix needs beyond its pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixPredicate {
    /// Some `start-end` element of the port list has `start > end`.
    PortRangeReversed,
    /// The script selection mentions one of these names.
    ScriptSelectionMentions(Vec<String>),
}

impl FixPredicate {
    pub fn holds(&self, command: &Command) -> bool {
        match self {
            Self::PortRangeReversed => command.port_spec().is_some_and(|spec| {
                spec.split([',', ';']).any(|element| {
                    let range = element.rsplit(':').next().unwrap_or(element);
                    match range.split_once('-') {
                        Some((a, b)) => matches!(
                            (a.parse::<u32>(), b.parse::<u32>()),
                            (Ok(start), Ok(end)) if start > end
                        ),
                        None => false,
                    }
                })
            }),
            Self::ScriptSelectionMentions(names) => command
                .script_selection()
                .is_some_and(|sel| names.iter().any(|n| sel.contains(n.as_str()))),
        }
    }
}

/// One autonomous fix.
#[derive(Debug, Clone)]
pub struct AutonomousFix {
    pub pattern: Regex,
    pub predicate: Option<FixPredicate>,
    pub action: CorrectionAction,
}

impl AutonomousFix {
    pub fn new(
        pattern: &str,
        predicate: Option<FixPredicate>,
        action: CorrectionAction,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            predicate,
            action,
        })
    }

    fn applies_to(&self, command: &Command) -> bool {
        self.pattern.is_match(&command.raw)
            && self.predicate.as_ref().map_or(true, |p| p.holds(command))
    }
}

/// Fixes for one error kind.
#[derive(Debug, Clone)]
pub struct FixEntry {
    pub repair_type: RepairType,
    pub fixes: Vec<AutonomousFix>,
}

/// Result of an autonomous repair.
#[derive(Debug, Clone, PartialEq)]
pub struct AutonomousRepair {
    pub command: Command,
    pub repair_type: RepairType,
    pub changes: Vec<String>,
}

/// Error kind to fix list mapping.
#[derive(Debug, Clone, Default)]
pub struct AutonomousFixTable {
    entries: HashMap<ErrorKind, FixEntry>,
}

static STANDARD_FIXES: LazyLock<AutonomousFixTable> = LazyLock::new(|| {
    let replace = |old: &str, new: &str| CorrectionAction::ReplaceFlag {
        replacements: vec![(old.to_string(), new.to_string())],
    };
    let mut table = AutonomousFixTable::default();
    table
        .insert(
            ErrorKind::PermissionDenied,
            FixEntry {
                repair_type: RepairType::PermissionFix,
                fixes: vec![
                    AutonomousFix::new(r"(^|\s)-sS(\s|$)", None, replace("-sS", "-sT")).unwrap(),
                    AutonomousFix::new(r"(^|\s)-sA(\s|$)", None, replace("-sA", "-sT")).unwrap(),
                ],
            },
        )
        .unwrap();
    table
        .insert(
            ErrorKind::PortSpecification,
            FixEntry {
                repair_type: RepairType::SyntaxFix,
                fixes: vec![AutonomousFix::new(
                    r"-p\s*\d+-\d+",
                    Some(FixPredicate::PortRangeReversed),
                    CorrectionAction::FixPortSpec,
                )
                .unwrap()],
            },
        )
        .unwrap();
    table
        .insert(
            ErrorKind::ScriptNotFound,
            FixEntry {
                repair_type: RepairType::ScriptWhitelist,
                fixes: vec![AutonomousFix::new(
                    r"--script[\s=]",
                    Some(FixPredicate::ScriptSelectionMentions(
                        ["exploit", "brute", "malware", "vuln"]
                            .iter()
                            .map(|s| s.to_string())
                            .collect(),
                    )),
                    CorrectionAction::SubstituteScript {
                        alternatives: Vec::new(),
                        fallback: "default".to_string(),
                    },
                )
                .unwrap()],
            },
        )
        .unwrap();
    table
        .insert(
            ErrorKind::Timeout,
            FixEntry {
                repair_type: RepairType::TimingAdjustment,
                fixes: vec![AutonomousFix::new(
                    r"-T[45]\b",
                    None,
                    CorrectionAction::ReplaceFlag {
                        replacements: vec![
                            ("-T5".to_string(), "-T3".to_string()),
                            ("-T4".to_string(), "-T3".to_string()),
                        ],
                    },
                )
                .unwrap()],
            },
        )
        .unwrap();
    table
});

impl AutonomousFixTable {
    pub fn standard() -> Self {
        STANDARD_FIXES.clone()
    }

    /// Register the fixes for an error kind. Each kind has one entry.
    pub fn insert(&mut self, kind: ErrorKind, entry: FixEntry) -> Result<(), RuleTableError> {
        if self.entries.contains_key(&kind) {
            return Err(RuleTableError::DuplicateFixEntry(kind.to_string()));
        }
        self.entries.insert(kind, entry);
        Ok(())
    }

    pub fn covers(&self, kind: ErrorKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Covered error kinds with the repair type each produces, sorted by kind name.
    pub fn coverage(&self) -> Vec<(ErrorKind, RepairType)> {
        let mut coverage: Vec<_> = self
            .entries
            .iter()
            .map(|(kind, entry)| (*kind, entry.repair_type))
            .collect();
        coverage.sort_by_key(|(kind, _)| kind.to_string());
        coverage
    }

    /// Apply every applicable fix for `kind`, in order. `None` when the
    /// kind has no entry or nothing changed.
    pub fn repair(&self, kind: ErrorKind, command: &Command) -> Option<AutonomousRepair> {
        let entry = self.entries.get(&kind)?;
        let mut current = command.clone();
        let mut changes = Vec::new();
        for fix in &entry.fixes {
            if !fix.applies_to(&current) {
                continue;
            }
            let transformed = apply(&fix.action, &current);
            if transformed.is_changed() {
                changes.extend(transformed.changes);
                current = transformed.command;
            }
        }
        if changes.is_empty() {
            debug!(kind = %kind, command = %command, "No autonomous fix applied");
            return None;
        }
        Some(AutonomousRepair {
            command: current,
            repair_type: entry.repair_type,
            changes,
        })
    }
}
