//! Risk rule tables
//!
//! The tables are plain data: forbidden flag prefixes, warning flag prefixes,
//! unsafe IPv4 ranges and an allow-list of public scan targets. They can be
//! extended at startup and exported for review, but never change while a
//! pipeline is running.

use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RuleTableError;

/// A flag prefix with the reason it is flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRule {
    pub prefix: String,
    pub reason: String,
}

impl FlagRule {
    pub fn new(prefix: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            reason: reason.into(),
        }
    }
}

/// An IPv4 network in CIDR form. Host bits are masked off on parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Range {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Range {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, RuleTableError> {
        if prefix_len > 32 {
            return Err(RuleTableError::InvalidRange(format!("{}/{}", addr, prefix_len)));
        }
        let network = Ipv4Addr::from(u32::from(addr) & Self::mask(prefix_len));
        Ok(Self {
            network,
            prefix_len,
        })
    }

    fn mask(prefix_len: u8) -> u32 {
        if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_len))
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & Self::mask(self.prefix_len) == u32::from(self.network)
    }

    /// Two CIDR blocks overlap iff one contains the other's network address.
    pub fn overlaps(&self, other: &Ipv4Range) -> bool {
        self.contains(other.network) || other.contains(self.network)
    }
}

impl FromStr for Ipv4Range {
    type Err = RuleTableError;

    /// Accepts `a.b.c.d/n` or a bare address (treated as `/32`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RuleTableError::InvalidRange(s.to_string());
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => (addr, len.parse::<u8>().map_err(|_| invalid())?),
            None => (s, 32),
        };
        let addr = addr.parse::<Ipv4Addr>().map_err(|_| invalid())?;
        Self::new(addr, len).map_err(|_| invalid())
    }
}

impl std::fmt::Display for Ipv4Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl Serialize for Ipv4Range {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ipv4Range {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

const FORBIDDEN_FLAGS: &[(&str, &str)] = &[
    ("--script", "Script execution not allowed"),
    ("-sC", "Default scripts not allowed"),
    ("-oN", "File output not allowed"),
    ("-oX", "XML output not allowed"),
    ("-oG", "Grepable output not allowed"),
    ("-oA", "All output formats not allowed"),
    ("--stylesheet", "Stylesheet not allowed"),
    ("--osscan-guess", "Aggressive OS guessing not allowed"),
    ("--badsum", "Bad checksum packets not allowed"),
    ("-T5", "Insane timing not allowed"),
];

const WARNING_FLAGS: &[(&str, &str)] = &[
    ("-A", "Aggressive scan enables OS detection, version detection, scripts"),
    ("-sS", "SYN scan requires root privileges"),
    ("-sU", "UDP scan requires root privileges"),
    ("-O", "OS detection requires root privileges"),
    ("-T4", "Aggressive timing may trigger IDS"),
    ("--traceroute", "Traceroute may be intrusive"),
    ("-sV", "Version detection is more intrusive"),
    ("-p-", "Scanning all ports is time-consuming"),
];

const UNSAFE_RANGES: &[(&str, &str)] = &[
    ("224.0.0.0/4", "Multicast range"),
    ("240.0.0.0/4", "Reserved range"),
];

const SAFE_TARGETS: &[&str] = &["scanme.nmap.org", "scanme.org"];

/// An unsafe network with the reason it is off limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRule {
    pub range: Ipv4Range,
    pub reason: String,
}

/// The complete rule set consulted by the risk engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRules {
    pub forbidden_flags: Vec<FlagRule>,
    pub warning_flags: Vec<FlagRule>,
    pub unsafe_ranges: Vec<RangeRule>,
    pub safe_targets: Vec<String>,
}

impl Default for RiskRules {
    fn default() -> Self {
        let to_rules = |table: &[(&str, &str)]| {
            table
                .iter()
                .map(|(prefix, reason)| FlagRule::new(*prefix, *reason))
                .collect::<Vec<_>>()
        };
        let unsafe_ranges = UNSAFE_RANGES
            .iter()
            .filter_map(|(cidr, reason)| {
                cidr.parse().ok().map(|range| RangeRule {
                    range,
                    reason: reason.to_string(),
                })
            })
            .collect();
        Self {
            forbidden_flags: to_rules(FORBIDDEN_FLAGS),
            warning_flags: to_rules(WARNING_FLAGS),
            unsafe_ranges,
            safe_targets: SAFE_TARGETS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RiskRules {
    /// Built-in tables extended with deployment-specific entries.
    ///
    /// Extra entries are appended, so built-in rules keep precedence on ties.
    pub fn with_custom(
        extra_forbidden: &[(String, String)],
        extra_unsafe_ranges: &[(String, String)],
    ) -> Result<Self, RuleTableError> {
        let mut rules = Self::default();
        for (prefix, reason) in extra_forbidden {
            rules.forbidden_flags.push(FlagRule::new(prefix, reason));
        }
        for (cidr, reason) in extra_unsafe_ranges {
            rules.unsafe_ranges.push(RangeRule {
                range: cidr.parse()?,
                reason: reason.clone(),
            });
        }
        Ok(rules)
    }

    /// Forbidden rule for a flag: the longest matching prefix, ties broken by
    /// table order.
    pub fn forbidden_match(&self, flag: &str) -> Option<&FlagRule> {
        longest_prefix(&self.forbidden_flags, flag)
    }

    /// Warning rule for a flag, matched like [`Self::forbidden_match`].
    pub fn warning_match(&self, flag: &str) -> Option<&FlagRule> {
        longest_prefix(&self.warning_flags, flag)
    }

    /// Unsafe range overlapping the target, if the target is an IPv4 address
    /// or CIDR block. Hostnames and unparsable addresses never match.
    pub fn unsafe_range_for(&self, target: &str) -> Option<&RangeRule> {
        let candidate: Ipv4Range = target.parse().ok()?;
        self.unsafe_ranges
            .iter()
            .find(|rule| rule.range.overlaps(&candidate))
    }

    pub fn is_safe_target(&self, target: &str) -> bool {
        self.safe_targets
            .iter()
            .any(|safe| safe.eq_ignore_ascii_case(target))
    }

    /// Snapshot of the tables for review tooling.
    pub fn export(&self) -> serde_json::Value {
        serde_json::json!({
            "forbidden_flags": self.forbidden_flags,
            "warning_flags": self.warning_flags,
            "unsafe_ranges": self.unsafe_ranges,
            "safe_targets": self.safe_targets,
            "scoring": {
                "forbidden_flag": super::engine::FORBIDDEN_FLAG_WEIGHT,
                "warning_flag": super::engine::WARNING_FLAG_WEIGHT,
                "unsafe_target": super::engine::UNSAFE_TARGET_WEIGHT,
            },
        })
    }
}

fn longest_prefix<'a>(rules: &'a [FlagRule], flag: &str) -> Option<&'a FlagRule> {
    let mut best: Option<&FlagRule> = None;
    for rule in rules {
        if flag.starts_with(rule.prefix.as_str())
            && best.map_or(true, |b| rule.prefix.len() > b.prefix.len())
        {
            best = Some(rule);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_parse_masks_host_bits() {
        let range: Ipv4Range = "192.168.1.77/24".parse().unwrap();
        assert_eq!(range.network(), Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(range.to_string(), "192.168.1.0/24");

        let host: Ipv4Range = "10.0.0.1".parse().unwrap();
        assert_eq!(host.prefix_len(), 32);
    }

    #[test]
    fn test_range_parse_rejects_garbage() {
        assert!("999.1.1.1".parse::<Ipv4Range>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Range>().is_err());
        assert!("scanme.nmap.org".parse::<Ipv4Range>().is_err());
    }

    #[test]
    fn test_overlap_is_symmetric() {
        let multicast: Ipv4Range = "224.0.0.0/4".parse().unwrap();
        let inside: Ipv4Range = "239.1.2.3".parse().unwrap();
        let covering: Ipv4Range = "192.0.0.0/2".parse().unwrap();
        let disjoint: Ipv4Range = "10.0.0.0/8".parse().unwrap();

        assert!(multicast.overlaps(&inside));
        assert!(inside.overlaps(&multicast));
        assert!(multicast.overlaps(&covering));
        assert!(covering.overlaps(&multicast));
        assert!(!multicast.overlaps(&disjoint));
    }

    #[test]
    fn test_zero_prefix_covers_everything() {
        let all: Ipv4Range = "0.0.0.0/0".parse().unwrap();
        assert!(all.contains(Ipv4Addr::new(255, 255, 255, 255)));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut rules = RiskRules::default();
        rules
            .forbidden_flags
            .push(FlagRule::new("--script-args", "Script arguments not allowed"));
        let hit = rules.forbidden_match("--script-args").unwrap();
        assert_eq!(hit.prefix, "--script-args");
        let hit = rules.forbidden_match("--script=vuln").unwrap();
        assert_eq!(hit.prefix, "--script");
    }

    #[test]
    fn test_flag_matching_is_case_sensitive() {
        let rules = RiskRules::default();
        assert!(rules.warning_match("-O").is_some());
        assert!(rules.warning_match("-oN").is_none());
        assert!(rules.forbidden_match("-oN").is_some());
        assert!(rules.warning_match("--osscan-guess").is_none());
    }

    #[test]
    fn test_unsafe_range_lookup() {
        let rules = RiskRules::default();
        assert_eq!(
            rules.unsafe_range_for("224.0.0.1").unwrap().reason,
            "Multicast range"
        );
        assert!(rules.unsafe_range_for("250.1.1.0/24").is_some());
        assert!(rules.unsafe_range_for("192.168.1.1").is_none());
        assert!(rules.unsafe_range_for("scanme.nmap.org").is_none());
    }

    #[test]
    fn test_with_custom_appends() {
        let rules = RiskRules::with_custom(
            &[("--data-length".into(), "Padding not allowed".into())],
            &[("10.0.0.0/8".into(), "Internal network".into())],
        )
        .unwrap();
        assert!(rules.forbidden_match("--data-length").is_some());
        assert!(rules.unsafe_range_for("10.1.2.3").is_some());

        let err = RiskRules::with_custom(&[], &[("10.0.0.0/99".into(), "bad".into())]);
        assert!(matches!(err, Err(RuleTableError::InvalidRange(_))));
    }

    #[test]
    fn test_export_contains_tables() {
        let exported = RiskRules::default().export();
        assert_eq!(exported["unsafe_ranges"][0]["range"], "224.0.0.0/4");
        assert_eq!(exported["scoring"]["forbidden_flag"], 40);
        assert_eq!(exported["safe_targets"][0], "scanme.nmap.org");
    }
}
