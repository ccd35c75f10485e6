//! Execution reports
//!
//! Turns raw scanner output into a structured [`ExecutionReport`] and defines
//! the single success criterion shared by every phase of self-correction.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::patterns::{classify_line, exit_code_meaning, is_warning_line, ErrorKind, Severity};

static HOST_UP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)Host is up").unwrap());

static OPEN_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)/(?:tcp|udp)\s+open\b").unwrap());

static SERVICE_INFO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Service Info:").unwrap());

static PROGRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)% done").unwrap());

static SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Nmap done: (\d+) IP address(?:es)? \((\d+) hosts? up\) scanned in ([\d.]+) seconds")
        .unwrap()
});

/// One classified failure found in scanner output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub subtype: String,
    pub message: String,
    pub severity: Severity,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, subtype: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            subtype: subtype.into(),
            message: message.into(),
            severity: kind.severity(),
        }
    }

    /// Override the kind's default severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Counters extracted from successful scan output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanMetrics {
    pub hosts_up: u32,
    pub open_ports: Vec<u16>,
    pub services_detected: u32,
    pub progress_percent: Option<f64>,
    pub total_ips: Option<u32>,
    pub hosts_reported_up: Option<u32>,
    pub scan_seconds: Option<f64>,
}

/// Raw output of one sandboxed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl RunOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
        }
    }
}

/// Structured result of executing (or failing to execute) one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub command: String,
    pub errors: Vec<ErrorRecord>,
    pub warnings: Vec<String>,
    pub metrics: ScanMetrics,
    pub exit_code: Option<i32>,
    pub completed: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionReport {
    /// Classify a finished run.
    ///
    /// Output lines are scanned in order (stdout, then stderr). A line that
    /// matches an error pattern becomes an error record, otherwise it may be
    /// kept as a warning. Documented non-zero exit codes add one more record.
    pub fn from_output(command: &str, output: &RunOutput, duration: Duration) -> Self {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut metrics = ScanMetrics::default();

        for line in output.stdout.lines().chain(output.stderr.lines()) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(pattern) = classify_line(line) {
                errors.push(ErrorRecord::new(pattern.kind, pattern.subtype, line));
            } else if is_warning_line(line) {
                warnings.push(line.to_string());
            }
            collect_metrics(line, &mut metrics);
        }

        if let Some(code) = output.exit_code.filter(|c| *c != 0) {
            if let Some(meaning) = exit_code_meaning(code) {
                errors.push(ErrorRecord::new(
                    ErrorKind::Unknown,
                    format!("exit_code_{}", code),
                    format!("Exit code {}: {}", code, meaning),
                ));
            }
        }

        Self {
            command: command.to_string(),
            errors,
            warnings,
            metrics,
            exit_code: output.exit_code,
            completed: true,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    /// The wall-clock limit elapsed before the run finished.
    pub fn timed_out(command: &str, limit: Duration) -> Self {
        Self::interrupted(
            command,
            ErrorRecord::new(
                ErrorKind::Timeout,
                "execution_timeout",
                format!("Command timed out after {} seconds", limit.as_secs()),
            ),
            limit,
        )
    }

    /// The sandbox itself failed; nothing is known about the scan.
    pub fn sandbox_failure(command: &str, reason: &str, duration: Duration) -> Self {
        Self::interrupted(
            command,
            ErrorRecord::new(
                ErrorKind::Unknown,
                "simulation_error",
                format!("Simulation error: {}", reason),
            )
            .with_severity(Severity::Critical),
            duration,
        )
    }

    fn interrupted(command: &str, error: ErrorRecord, duration: Duration) -> Self {
        Self {
            command: command.to_string(),
            errors: vec![error],
            warnings: Vec::new(),
            metrics: ScanMetrics::default(),
            exit_code: None,
            completed: false,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    /// Distinct error kinds in order of first appearance.
    pub fn error_kinds(&self) -> Vec<ErrorKind> {
        let mut kinds = Vec::new();
        for e in &self.errors {
            if !kinds.contains(&e.kind) {
                kinds.push(e.kind);
            }
        }
        kinds
    }

    pub fn first_error(&self) -> Option<&ErrorRecord> {
        self.errors.first()
    }

    pub fn has_severity_at_least(&self, severity: Severity) -> bool {
        self.errors.iter().any(|e| e.severity >= severity)
    }
}

fn collect_metrics(line: &str, metrics: &mut ScanMetrics) {
    if HOST_UP.is_match(line) {
        metrics.hosts_up += 1;
    }
    if let Some(port) = OPEN_PORT
        .captures(line)
        .and_then(|c| c[1].parse::<u16>().ok())
    {
        metrics.open_ports.push(port);
    }
    if SERVICE_INFO.is_match(line) {
        metrics.services_detected += 1;
    }
    if let Some(pct) = PROGRESS.captures(line).and_then(|c| c[1].parse::<f64>().ok()) {
        metrics.progress_percent = Some(pct);
    }
    if let Some(caps) = SUMMARY.captures(line) {
        metrics.total_ips = caps[1].parse().ok();
        metrics.hosts_reported_up = caps[2].parse().ok();
        metrics.scan_seconds = caps[3].parse().ok();
    }
}

/// What counts as a successful run.
///
/// Both the autonomous phase and the iterative loop of self-correction test
/// candidates against the same criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessCriterion {
    /// Any error at or above this severity fails the run.
    pub blocking_severity: Severity,
    pub require_zero_exit: bool,
    pub require_completion: bool,
}

impl Default for SuccessCriterion {
    fn default() -> Self {
        Self {
            blocking_severity: Severity::Critical,
            require_zero_exit: true,
            require_completion: true,
        }
    }
}

impl SuccessCriterion {
    pub fn is_met(&self, report: &ExecutionReport) -> bool {
        if self.require_completion && !report.completed {
            return false;
        }
        if self.require_zero_exit && report.exit_code != Some(0) {
            return false;
        }
        !report.has_severity_at_least(self.blocking_severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN_SCAN: &str = "Starting Nmap 7.94 ( https://nmap.org )
Nmap scan report for scanme.nmap.org (45.33.32.156)
Host is up (0.071s latency).
PORT   STATE SERVICE
22/tcp open  ssh
80/tcp open  http
Service Info: OS: Linux; CPE: cpe:/o:linux:linux_kernel
Nmap done: 1 IP address (1 host up) scanned in 2.31 seconds
";

    #[test]
    fn test_clean_scan_metrics() {
        let output = RunOutput::new(CLEAN_SCAN, "", 0);
        let report = ExecutionReport::from_output("nmap -sV scanme.nmap.org", &output, Duration::from_millis(2310));
        assert!(report.errors.is_empty());
        assert_eq!(report.metrics.hosts_up, 1);
        assert_eq!(report.metrics.open_ports, vec![22, 80]);
        assert_eq!(report.metrics.services_detected, 1);
        assert_eq!(report.metrics.total_ips, Some(1));
        assert_eq!(report.metrics.hosts_reported_up, Some(1));
        assert_eq!(report.metrics.scan_seconds, Some(2.31));
        assert!(SuccessCriterion::default().is_met(&report));
    }

    #[test]
    fn test_errors_and_exit_code() {
        let output = RunOutput::new(
            "Starting Nmap 7.94",
            "You requested a scan type which requires root privileges.\nQUITTING!",
            1,
        );
        let report = ExecutionReport::from_output("nmap -sS host", &output, Duration::ZERO);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[0].kind, ErrorKind::PermissionDenied);
        assert_eq!(report.errors[1].kind, ErrorKind::Unknown);
        assert_eq!(report.errors[1].message, "Exit code 1: General runtime error");
        assert_eq!(report.errors[1].severity, Severity::Medium);
        assert_eq!(
            report.error_kinds(),
            vec![ErrorKind::PermissionDenied, ErrorKind::Unknown]
        );
        assert!(!SuccessCriterion::default().is_met(&report));
    }

    #[test]
    fn test_warnings_collected() {
        let output = RunOutput::new(
            "WARNING: No targets were specified, so 0 hosts scanned.\nNmap done: 0 IP addresses (0 hosts up) scanned in 0.02 seconds",
            "",
            0,
        );
        let report = ExecutionReport::from_output("nmap", &output, Duration::ZERO);
        assert!(report.errors.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.metrics.total_ips, Some(0));
    }

    #[test]
    fn test_high_severity_does_not_block_by_default() {
        let output = RunOutput::new("Note: Host seems down.", "", 0);
        let report = ExecutionReport::from_output("nmap host", &output, Duration::ZERO);
        assert_eq!(report.errors[0].kind, ErrorKind::NetworkUnreachable);
        assert!(SuccessCriterion::default().is_met(&report));

        let strict = SuccessCriterion {
            blocking_severity: Severity::High,
            ..SuccessCriterion::default()
        };
        assert!(!strict.is_met(&report));
    }

    #[test]
    fn test_timeout_report() {
        let report = ExecutionReport::timed_out("nmap -p- host", Duration::from_secs(300));
        assert!(!report.completed);
        assert_eq!(report.exit_code, None);
        assert_eq!(report.errors[0].kind, ErrorKind::Timeout);
        assert_eq!(report.errors[0].severity, Severity::Critical);
        assert_eq!(report.errors[0].message, "Command timed out after 300 seconds");
    }

    #[test]
    fn test_sandbox_failure_is_critical() {
        let report = ExecutionReport::sandbox_failure("nmap host", "docker not found", Duration::ZERO);
        assert_eq!(report.errors[0].kind, ErrorKind::Unknown);
        assert_eq!(report.errors[0].severity, Severity::Critical);
        assert!(!SuccessCriterion::default().is_met(&report));
    }
}
