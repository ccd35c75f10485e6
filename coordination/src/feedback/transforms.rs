//! Command transforms
//!
//! Every correction, whether it comes from the rule table or the autonomous
//! fix table, is a [`CorrectionAction`]: plain data interpreted by
//! [`apply`]. Transforms work on tokens, never on raw text, and the result is
//! re-parsed. A transform that produces an unparsable command degrades to
//! "no change".

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::command::{takes_argument, Command};

/// Closed set of correction strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    ReplaceFlag,
    AddFlag,
    RemoveFlag,
    ModifyParameter,
    ChangeScanType,
    AdjustTiming,
    FixSyntax,
    SimplifyCommand,
    EscalatePrivileges,
    AlternativeApproach,
}

impl fmt::Display for CorrectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReplaceFlag => write!(f, "replace_flag"),
            Self::AddFlag => write!(f, "add_flag"),
            Self::RemoveFlag => write!(f, "remove_flag"),
            Self::ModifyParameter => write!(f, "modify_parameter"),
            Self::ChangeScanType => write!(f, "change_scan_type"),
            Self::AdjustTiming => write!(f, "adjust_timing"),
            Self::FixSyntax => write!(f, "fix_syntax"),
            Self::SimplifyCommand => write!(f, "simplify_command"),
            Self::EscalatePrivileges => write!(f, "escalate_privileges"),
            Self::AlternativeApproach => write!(f, "alternative_approach"),
        }
    }
}

/// Data-only description of a command rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CorrectionAction {
    /// Swap the first present `old` flag for its `new` flag. Candidates are
    /// tried in order and only one substitution is made.
    ReplaceFlag { replacements: Vec<(String, String)> },
    /// Strip every occurrence of the flags (and their values, if they take
    /// one).
    RemoveFlags { flags: Vec<String> },
    /// Add a flag after the program name unless already present.
    AddFlag { flag: String },
    /// Step timing down one rung of the ladder, or add `default` when no
    /// timing template is set.
    AdjustTiming {
        ladder: Vec<(String, String)>,
        default: String,
    },
    /// Swap reversed ranges and normalize separators in the port list.
    FixPortSpec,
    /// Drop argument-taking flags that lack their argument and duplicate
    /// flags.
    FixGeneralSyntax,
    /// Replace the script selection with a configured alternative, falling
    /// back to `fallback`.
    SubstituteScript {
        alternatives: Vec<(String, String)>,
        fallback: String,
    },
    /// Shrink the scan: bound the port range, drop expensive flags, cap
    /// timing.
    Simplify {
        all_ports_replacement: String,
        max_port_span: u32,
        strip_flags: Vec<String>,
        aggressive_timing: Vec<String>,
        timing_ceiling: String,
    },
}

impl CorrectionAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReplaceFlag { .. } => "replace_flag",
            Self::RemoveFlags { .. } => "remove_flags",
            Self::AddFlag { .. } => "add_flag",
            Self::AdjustTiming { .. } => "adjust_timing",
            Self::FixPortSpec => "fix_port_spec",
            Self::FixGeneralSyntax => "fix_general_syntax",
            Self::SubstituteScript { .. } => "substitute_script",
            Self::Simplify { .. } => "simplify",
        }
    }

    /// Whether this action is a valid implementation of `kind`.
    pub fn implements(&self, kind: CorrectionKind) -> bool {
        matches!(
            (kind, self),
            (CorrectionKind::ReplaceFlag, Self::ReplaceFlag { .. })
                | (CorrectionKind::AddFlag, Self::AddFlag { .. })
                | (CorrectionKind::RemoveFlag, Self::RemoveFlags { .. })
                | (CorrectionKind::ModifyParameter, Self::ReplaceFlag { .. })
                | (CorrectionKind::ModifyParameter, Self::FixPortSpec)
                | (CorrectionKind::ModifyParameter, Self::SubstituteScript { .. })
                | (CorrectionKind::ChangeScanType, Self::ReplaceFlag { .. })
                | (CorrectionKind::AdjustTiming, Self::AdjustTiming { .. })
                | (CorrectionKind::AdjustTiming, Self::ReplaceFlag { .. })
                | (CorrectionKind::FixSyntax, Self::FixPortSpec)
                | (CorrectionKind::FixSyntax, Self::FixGeneralSyntax)
                | (CorrectionKind::SimplifyCommand, Self::Simplify { .. })
                | (CorrectionKind::EscalatePrivileges, Self::AddFlag { .. })
                | (CorrectionKind::AlternativeApproach, Self::SubstituteScript { .. })
                | (CorrectionKind::AlternativeApproach, Self::ReplaceFlag { .. })
        )
    }

    /// Standard simplification policy.
    pub fn simplify_default() -> Self {
        Self::Simplify {
            all_ports_replacement: "1-1000".to_string(),
            max_port_span: 100,
            strip_flags: ["-A", "--version-all", "-sV", "-O"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            aggressive_timing: vec!["-T5".to_string(), "-T4".to_string()],
            timing_ceiling: "-T3".to_string(),
        }
    }
}

/// Outcome of applying an action.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub command: Command,
    /// Human-readable change descriptions. Empty means unchanged.
    pub changes: Vec<String>,
}

impl Transformed {
    pub fn is_changed(&self) -> bool {
        !self.changes.is_empty()
    }

    fn unchanged(command: &Command) -> Self {
        Self {
            command: command.clone(),
            changes: Vec::new(),
        }
    }
}

/// Apply one action to a command.
pub fn apply(action: &CorrectionAction, command: &Command) -> Transformed {
    let mut tokens = command.tokens().to_vec();
    let changes = rewrite(action, &mut tokens);
    if changes.is_empty() {
        return Transformed::unchanged(command);
    }
    match Command::from_tokens(&tokens) {
        Ok(rewritten) => Transformed {
            command: rewritten,
            changes,
        },
        Err(e) => {
            warn!(action = action.name(), error = %e, "Rewritten command does not parse, keeping original");
            Transformed::unchanged(command)
        }
    }
}

fn rewrite(action: &CorrectionAction, tokens: &mut Vec<String>) -> Vec<String> {
    match action {
        CorrectionAction::ReplaceFlag { replacements } => replace_flag(tokens, replacements),
        CorrectionAction::RemoveFlags { flags } => {
            let mut changes = Vec::new();
            for flag in flags {
                changes.extend(remove_flag(tokens, flag));
            }
            changes
        }
        CorrectionAction::AddFlag { flag } => add_flag(tokens, flag),
        CorrectionAction::AdjustTiming { ladder, default } => adjust_timing(tokens, ladder, default),
        CorrectionAction::FixPortSpec => fix_port_spec(tokens),
        CorrectionAction::FixGeneralSyntax => fix_general_syntax(tokens),
        CorrectionAction::SubstituteScript {
            alternatives,
            fallback,
        } => substitute_script(tokens, alternatives, fallback),
        CorrectionAction::Simplify {
            all_ports_replacement,
            max_port_span,
            strip_flags,
            aggressive_timing,
            timing_ceiling,
        } => {
            let mut changes = bound_ports(tokens, all_ports_replacement, *max_port_span);
            for flag in strip_flags {
                changes.extend(remove_flag(tokens, flag));
            }
            changes.extend(replace_flag_all(tokens, aggressive_timing, timing_ceiling));
            changes
        }
    }
}

/// Location of a flag's value: token index and byte offset of the value in
/// that token.
struct ValueSlot {
    index: usize,
    offset: usize,
}

impl ValueSlot {
    fn read<'a>(&self, tokens: &'a [String]) -> &'a str {
        &tokens[self.index][self.offset..]
    }

    fn write(&self, tokens: &mut [String], value: &str) {
        let prefix = tokens[self.index][..self.offset].to_string();
        tokens[self.index] = format!("{}{}", prefix, value);
    }
}

fn value_slot(tokens: &[String], flag: &str, allow_attached: bool) -> Option<ValueSlot> {
    let eq_prefix = format!("{}=", flag);
    for (i, token) in tokens.iter().enumerate().skip(1) {
        if token == flag {
            return tokens
                .get(i + 1)
                .filter(|v| !v.starts_with('-'))
                .map(|_| ValueSlot {
                    index: i + 1,
                    offset: 0,
                });
        }
        if token.starts_with(&eq_prefix) {
            return Some(ValueSlot {
                index: i,
                offset: eq_prefix.len(),
            });
        }
        if allow_attached && token.len() > flag.len() && token.starts_with(flag) && token != "-p-" {
            return Some(ValueSlot {
                index: i,
                offset: flag.len(),
            });
        }
    }
    None
}

fn port_slot(tokens: &[String]) -> Option<ValueSlot> {
    value_slot(tokens, "--ports", false).or_else(|| value_slot(tokens, "-p", true))
}

fn is_timing_token(token: &str) -> bool {
    token
        .strip_prefix("-T")
        .is_some_and(|level| level.len() == 1 && level.chars().all(|c| c.is_ascii_digit()))
}

fn replace_flag(tokens: &mut [String], replacements: &[(String, String)]) -> Vec<String> {
    for (old, new) in replacements {
        if let Some(i) = tokens.iter().skip(1).position(|t| t == old) {
            tokens[i + 1] = new.clone();
            return vec![format!("Replaced {} with {}", old, new)];
        }
    }
    Vec::new()
}

fn replace_flag_all(tokens: &mut [String], olds: &[String], new: &str) -> Vec<String> {
    let mut changes = Vec::new();
    for token in tokens.iter_mut().skip(1) {
        if olds.contains(token) {
            changes.push(format!("Replaced {} with {}", token, new));
            *token = new.to_string();
        }
    }
    changes
}

fn remove_flag(tokens: &mut Vec<String>, flag: &str) -> Vec<String> {
    let eq_prefix = format!("{}=", flag);
    let mut removed = false;
    let mut i = 1;
    while i < tokens.len() {
        if tokens[i] == flag {
            tokens.remove(i);
            if takes_argument(flag) && tokens.get(i).is_some_and(|v| !v.starts_with('-')) {
                tokens.remove(i);
            }
            removed = true;
        } else if tokens[i].starts_with(&eq_prefix) {
            tokens.remove(i);
            removed = true;
        } else {
            i += 1;
        }
    }
    if removed {
        vec![format!("Removed {}", flag)]
    } else {
        Vec::new()
    }
}

fn add_flag(tokens: &mut Vec<String>, flag: &str) -> Vec<String> {
    if tokens.iter().skip(1).any(|t| t == flag) {
        return Vec::new();
    }
    let at = tokens.len().min(1);
    tokens.insert(at, flag.to_string());
    vec![format!("Added {}", flag)]
}

fn adjust_timing(tokens: &mut Vec<String>, ladder: &[(String, String)], default: &str) -> Vec<String> {
    for (old, new) in ladder {
        if let Some(i) = tokens.iter().skip(1).position(|t| t == old) {
            tokens[i + 1] = new.clone();
            return vec![format!("Adjusted timing from {} to {}", old, new)];
        }
    }
    if tokens.iter().skip(1).any(|t| is_timing_token(t)) {
        return Vec::new();
    }
    let at = tokens.len().min(1);
    tokens.insert(at, default.to_string());
    vec![format!("Added timing template {}", default)]
}

/// Swap reversed `a-b` elements and turn `;` separators into `,`.
fn normalize_port_list(spec: &str) -> String {
    spec.replace(';', ",")
        .split(',')
        .map(|element| {
            let (proto, range) = match element.split_once(':') {
                Some((p, r)) => (format!("{}:", p), r),
                None => (String::new(), element),
            };
            match range.split_once('-') {
                Some((a, b)) => match (a.parse::<u32>(), b.parse::<u32>()) {
                    (Ok(start), Ok(end)) if start > end => format!("{}{}-{}", proto, end, start),
                    _ => element.to_string(),
                },
                None => element.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn fix_port_spec(tokens: &mut [String]) -> Vec<String> {
    let Some(slot) = port_slot(tokens) else {
        return Vec::new();
    };
    let spec = slot.read(tokens).to_string();
    let fixed = normalize_port_list(&spec);
    if fixed == spec {
        return Vec::new();
    }
    slot.write(tokens, &fixed);
    vec![format!("Fixed port specification {} -> {}", spec, fixed)]
}

fn fix_general_syntax(tokens: &mut Vec<String>) -> Vec<String> {
    let mut changes = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    let mut i = 1;
    while i < tokens.len() {
        let token = tokens[i].clone();
        let dangling = takes_argument(&token)
            && tokens.get(i + 1).map_or(true, |next| next.starts_with('-'));
        if dangling {
            tokens.remove(i);
            changes.push(format!("Removed {} (missing argument)", token));
            continue;
        }
        if token.starts_with('-') && !takes_argument(&token) {
            if seen.contains(&token) {
                tokens.remove(i);
                changes.push(format!("Removed duplicate {}", token));
                continue;
            }
            seen.push(token);
        } else if takes_argument(&token) {
            // Skip the value so it is never treated as a flag.
            i += 1;
        }
        i += 1;
    }
    changes
}

fn substitute_script(
    tokens: &mut [String],
    alternatives: &[(String, String)],
    fallback: &str,
) -> Vec<String> {
    let Some(slot) = value_slot(tokens, "--script", false) else {
        return Vec::new();
    };
    let current = slot.read(tokens).to_string();
    let replacement = alternatives
        .iter()
        .find(|(problem, _)| current.split(',').any(|s| s.contains(problem.as_str())))
        .map(|(_, alt)| alt.as_str())
        .unwrap_or(fallback);
    if replacement == current {
        return Vec::new();
    }
    slot.write(tokens, replacement);
    vec![format!("Replaced script {} with {}", current, replacement)]
}

fn bound_ports(tokens: &mut Vec<String>, all_ports_replacement: &str, max_span: u32) -> Vec<String> {
    if let Some(i) = tokens.iter().skip(1).position(|t| t == "-p-") {
        let i = i + 1;
        tokens[i] = "-p".to_string();
        tokens.insert(i + 1, all_ports_replacement.to_string());
        return vec![format!("Limited all-port scan to {}", all_ports_replacement)];
    }
    let Some(slot) = port_slot(tokens) else {
        return Vec::new();
    };
    let spec = slot.read(tokens).to_string();
    let bounded = spec
        .split(',')
        .map(|element| bound_range(element, max_span))
        .collect::<Vec<_>>()
        .join(",");
    if bounded == spec {
        return Vec::new();
    }
    slot.write(tokens, &bounded);
    vec![format!("Limited port range {} -> {}", spec, bounded)]
}

/// Cut one `[proto:]start-end` element down to at most `max_ports` ports.
fn bound_range(element: &str, max_ports: u32) -> String {
    let (proto, range) = match element.split_once(':') {
        Some((p, r)) => (format!("{}:", p), r),
        None => (String::new(), element),
    };
    let Some((a, b)) = range.split_once('-') else {
        return element.to_string();
    };
    match (a.parse::<u32>(), b.parse::<u32>()) {
        (Ok(start), Ok(end)) if max_ports > 0 && end >= start && end - start >= max_ports => {
            format!("{}{}-{}", proto, start, start + max_ports - 1)
        }
        _ => element.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(action: &CorrectionAction, raw: &str) -> Transformed {
        apply(action, &Command::parse(raw).unwrap())
    }

    #[test]
    fn test_replace_flag_first_candidate_only() {
        let action = CorrectionAction::ReplaceFlag {
            replacements: vec![
                ("-sS".into(), "-sT".into()),
                ("-sU".into(), "-sT".into()),
            ],
        };
        let t = run(&action, "nmap -sU -sS -p 80 host.example.com");
        assert_eq!(t.command.raw, "nmap -sU -sT -p 80 host.example.com");
        assert_eq!(t.changes, vec!["Replaced -sS with -sT"]);
    }

    #[test]
    fn test_replace_flag_is_token_exact() {
        let action = CorrectionAction::ReplaceFlag {
            replacements: vec![("-sS".into(), "-sT".into())],
        };
        let t = run(&action, "nmap -sSV host.example.com");
        assert!(!t.is_changed());
        assert_eq!(t.command.raw, "nmap -sSV host.example.com");
    }

    #[test]
    fn test_remove_flag_keeps_targets() {
        let action = CorrectionAction::RemoveFlags {
            flags: vec!["-O".into(), "--osscan-guess".into()],
        };
        let t = run(&action, "nmap -O --osscan-guess scanme.nmap.org");
        assert_eq!(t.command.raw, "nmap scanme.nmap.org");
        assert_eq!(t.changes.len(), 2);
    }

    #[test]
    fn test_remove_argument_flag_takes_value() {
        let action = CorrectionAction::RemoveFlags {
            flags: vec!["--script".into()],
        };
        let t = run(&action, "nmap --script vuln host.example.com");
        assert_eq!(t.command.raw, "nmap host.example.com");
    }

    #[test]
    fn test_unrenderable_result_keeps_original() {
        let action = CorrectionAction::AddFlag {
            flag: "-n\0".into(),
        };
        let t = run(&action, "nmap -p 80 scanme.nmap.org");
        assert!(!t.is_changed());
        assert_eq!(t.command.raw, "nmap -p 80 scanme.nmap.org");
    }

    #[test]
    fn test_add_flag_once() {
        let action = CorrectionAction::AddFlag { flag: "-n".into() };
        let t = run(&action, "nmap nowhere.example.com");
        assert_eq!(t.command.raw, "nmap -n nowhere.example.com");
        assert!(!run(&action, "nmap -n nowhere.example.com").is_changed());
    }

    #[test]
    fn test_timing_ladder() {
        let action = CorrectionAction::AdjustTiming {
            ladder: vec![
                ("-T5".into(), "-T4".into()),
                ("-T4".into(), "-T3".into()),
                ("-T3".into(), "-T2".into()),
            ],
            default: "-T3".into(),
        };
        assert_eq!(run(&action, "nmap -T5 h.example.com").command.raw, "nmap -T4 h.example.com");
        assert_eq!(run(&action, "nmap -T3 h.example.com").command.raw, "nmap -T2 h.example.com");
        assert_eq!(run(&action, "nmap h.example.com").command.raw, "nmap -T3 h.example.com");
        assert!(!run(&action, "nmap -T1 h.example.com").is_changed());
    }

    #[test]
    fn test_fix_port_spec_swaps_reversed_range() {
        let t = run(&CorrectionAction::FixPortSpec, "nmap -p 80-70 example.com");
        assert_eq!(t.command.raw, "nmap -p 70-80 example.com");

        let t = run(&CorrectionAction::FixPortSpec, "nmap -p443-22,T:90-80 example.com");
        assert_eq!(t.command.raw, "nmap -p22-443,T:80-90 example.com");

        assert!(!run(&CorrectionAction::FixPortSpec, "nmap -p 22,80 example.com").is_changed());
    }

    #[test]
    fn test_normalize_separators() {
        assert_eq!(normalize_port_list("22;80;90-85"), "22,80,85-90");
    }

    #[test]
    fn test_general_syntax() {
        let t = run(&CorrectionAction::FixGeneralSyntax, "nmap -sT -sT example.com -p");
        assert_eq!(t.command.raw, "nmap -sT example.com");
        assert_eq!(t.changes.len(), 2);

        let t = run(&CorrectionAction::FixGeneralSyntax, "nmap --script -sV example.com");
        assert_eq!(t.command.raw, "nmap -sV example.com");
    }

    #[test]
    fn test_substitute_script() {
        let action = CorrectionAction::SubstituteScript {
            alternatives: vec![
                ("vuln".into(), "default".into()),
                ("exploit".into(), "safe".into()),
            ],
            fallback: "default".into(),
        };
        assert_eq!(
            run(&action, "nmap --script exploit h.example.com").command.raw,
            "nmap --script safe h.example.com"
        );
        assert_eq!(
            run(&action, "nmap --script=http-title h.example.com").command.raw,
            "nmap --script=default h.example.com"
        );
        assert!(!run(&action, "nmap --script default h.example.com").is_changed());
    }

    #[test]
    fn test_simplify() {
        let action = CorrectionAction::simplify_default();
        let t = run(&action, "nmap -A -sV -T5 -p- 10.0.0.1");
        assert_eq!(t.command.raw, "nmap -T3 -p 1-1000 10.0.0.1");

        let t = run(&action, "nmap -p 1-5000 10.0.0.1");
        assert_eq!(t.command.raw, "nmap -p 1-100 10.0.0.1");

        assert!(!run(&action, "nmap -p 1-100 10.0.0.1").is_changed());

        assert!(!run(&action, "nmap -sT -p 22 10.0.0.1").is_changed());
    }

    #[test]
    fn test_simplify_bounds_each_range_element() {
        let action = CorrectionAction::simplify_default();
        let t = run(&action, "nmap -p 1-5000,8080,T:2000-2500 10.0.0.1");
        assert_eq!(t.command.raw, "nmap -p 1-100,8080,T:2000-2099 10.0.0.1");
        assert_eq!(
            t.changes,
            vec!["Limited port range 1-5000,8080,T:2000-2500 -> 1-100,8080,T:2000-2099"]
        );
    }

    #[test]
    fn test_action_kind_compatibility() {
        assert!(CorrectionAction::FixPortSpec.implements(CorrectionKind::FixSyntax));
        assert!(!CorrectionAction::FixPortSpec.implements(CorrectionKind::SimplifyCommand));
        assert!(CorrectionAction::simplify_default().implements(CorrectionKind::SimplifyCommand));
    }
}
