//! Scanner output classification
//!
//! Maps individual output lines to a closed set of error kinds. The pattern
//! table is ordered and the first match wins, so more specific messages are
//! listed ahead of the generic ones they overlap with.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Closed set of execution failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    DnsResolution,
    NetworkUnreachable,
    SyntaxError,
    PortSpecification,
    ScriptNotFound,
    ResourceLimit,
    Timeout,
    InvalidArgument,
    Unknown,
}

impl ErrorKind {
    /// Fixed severity of each kind.
    pub fn severity(&self) -> Severity {
        match self {
            Self::PermissionDenied | Self::SyntaxError | Self::Timeout => Severity::Critical,
            Self::NetworkUnreachable | Self::DnsResolution | Self::ScriptNotFound => {
                Severity::High
            }
            Self::PortSpecification
            | Self::ResourceLimit
            | Self::InvalidArgument
            | Self::Unknown => Severity::Medium,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "permission_denied"),
            Self::DnsResolution => write!(f, "dns_resolution"),
            Self::NetworkUnreachable => write!(f, "network_unreachable"),
            Self::SyntaxError => write!(f, "syntax_error"),
            Self::PortSpecification => write!(f, "port_specification"),
            Self::ScriptNotFound => write!(f, "script_not_found"),
            Self::ResourceLimit => write!(f, "resource_limit"),
            Self::Timeout => write!(f, "timeout"),
            Self::InvalidArgument => write!(f, "invalid_argument"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One row of the classification table.
#[derive(Debug)]
pub struct OutputPattern {
    pub regex: Regex,
    pub kind: ErrorKind,
    pub subtype: &'static str,
}

const PATTERN_TABLE: &[(&str, ErrorKind, &str)] = &[
    (r"Operation not permitted", ErrorKind::PermissionDenied, "requires_root"),
    (r"requires root privileges", ErrorKind::PermissionDenied, "requires_root"),
    (r"PCAP permission problem", ErrorKind::PermissionDenied, "pcap_permission"),
    (r"socket troubles", ErrorKind::PermissionDenied, "socket_permission"),
    (r"Failed to resolve", ErrorKind::DnsResolution, "dns_failure"),
    (r"Could not resolve hostname", ErrorKind::DnsResolution, "hostname_invalid"),
    (r"No route to host", ErrorKind::NetworkUnreachable, "no_route"),
    (r"Host seems down", ErrorKind::NetworkUnreachable, "host_down"),
    (r"Network is unreachable", ErrorKind::NetworkUnreachable, "network_unreachable"),
    (r"Invalid argument", ErrorKind::InvalidArgument, "invalid_arg"),
    (r"Unknown argument", ErrorKind::InvalidArgument, "unknown_arg"),
    (r"Illegal port number", ErrorKind::PortSpecification, "illegal_port"),
    (r"Your port specifications are illegal", ErrorKind::PortSpecification, "port_spec_error"),
    (r"NSE: Failed to load.*script", ErrorKind::ScriptNotFound, "script_load_fail"),
    (r"script .* does not exist", ErrorKind::ScriptNotFound, "script_missing"),
    (r"Unknown script", ErrorKind::ScriptNotFound, "unknown_script"),
    (r"memory allocation problem", ErrorKind::ResourceLimit, "memory_limit"),
    (r"Too many open files", ErrorKind::ResourceLimit, "file_limit"),
    (r"nmap: unrecognized option", ErrorKind::SyntaxError, "unrecognized_option"),
    (r"option requires an argument", ErrorKind::SyntaxError, "missing_argument"),
];

static OUTPUT_PATTERNS: LazyLock<Vec<OutputPattern>> = LazyLock::new(|| {
    PATTERN_TABLE
        .iter()
        .map(|(pattern, kind, subtype)| OutputPattern {
            regex: Regex::new(&format!("(?i){}", pattern)).unwrap(),
            kind: *kind,
            subtype: *subtype,
        })
        .collect()
});

static WARNING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(warning|warn|caution)\b").unwrap());

/// Classify one output line. The first matching table row wins.
pub fn classify_line(line: &str) -> Option<&'static OutputPattern> {
    OUTPUT_PATTERNS.iter().find(|p| p.regex.is_match(line))
}

/// True when a line that matched no error pattern is still worth surfacing.
pub fn is_warning_line(line: &str) -> bool {
    WARNING_PATTERN.is_match(line)
}

/// Meaning of the scanner's documented non-zero exit codes.
pub fn exit_code_meaning(code: i32) -> Option<&'static str> {
    match code {
        1 => Some("General runtime error"),
        2 => Some("Parse error (invalid command line)"),
        3 => Some("No targets specified"),
        255 => Some("Killed by signal"),
        _ => None,
    }
}
