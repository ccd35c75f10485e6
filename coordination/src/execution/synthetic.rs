//! Deterministic in-process sandbox
//!
//! [`SyntheticRunner`] answers like an unprivileged scanner inside an
//! isolated network would, without running anything. It is used when no
//! container runtime is configured and by the test suites. Fatal problems are
//! reported in the order the scanner itself checks them:
//!
//! ```text
//! unknown option ─▶ missing argument ─▶ port spec ─▶ privileges ─▶ scripts
//!     ─▶ target resolution / reachability ─▶ scan (possibly too slow)
//! ```

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;

use super::report::RunOutput;
use super::simulator::SandboxRunner;
use crate::command::{takes_argument, Command, ARGUMENT_FLAGS};
use crate::error::CollaboratorResult;
use crate::risk::Ipv4Range;

/// Flags the synthetic scanner understands besides [`ARGUMENT_FLAGS`].
const KNOWN_FLAGS: &[&str] = &[
    "-sS", "-sT", "-sA", "-sW", "-sM", "-sN", "-sF", "-sX", "-sU", "-sO", "-sV", "-sC", "-sn",
    "-sL", "-Pn", "-PE", "-PP", "-PM", "-PS", "-PA", "-F", "-A", "-O", "-n", "-R", "-r", "-6",
    "-v", "-vv", "-d", "-p-", "--open", "--reason", "--traceroute", "--version-all",
    "--version-light", "--osscan-guess", "--osscan-limit", "--badsum", "--packet-trace",
    "--system-dns",
];

/// Scan types that need raw sockets.
const RAW_SCAN_TYPES: &[&str] = &["-sS", "-sA", "-sW", "-sM", "-sN", "-sF", "-sX", "-sU", "-sO"];

const DEFAULT_SCRIPTS: &[&str] = &["default", "safe", "discovery", "version", "auth"];

/// Documentation ranges that have no route from the sandbox network.
const UNREACHABLE_RANGES: &[&str] = &["198.51.100.0/24", "203.0.113.0/24"];

/// Reserved top-level labels that never resolve.
const UNRESOLVABLE_SUFFIXES: &[&str] = &[".invalid", ".test"];

/// Ports the synthetic hosts expose.
const OPEN_PORTS: &[(u16, &str)] = &[(22, "ssh"), (80, "http"), (443, "https")];

fn is_known_flag(flag: &str) -> bool {
    if KNOWN_FLAGS.contains(&flag) || takes_argument(flag) {
        return true;
    }
    if let Some((name, _)) = flag.split_once('=') {
        return ARGUMENT_FLAGS.contains(&name);
    }
    if let Some(level) = flag.strip_prefix("-T") {
        return matches!(level, "0" | "1" | "2" | "3" | "4" | "5");
    }
    // -p22, -p80-90
    flag.starts_with("-p") && flag.len() > 2
}

/// Parse a port specification into inclusive ranges. `None` when illegal.
fn parse_port_spec(spec: &str) -> Option<Vec<(u32, u32)>> {
    let mut ranges = Vec::new();
    for element in spec.split(',') {
        let element = element
            .strip_prefix("T:")
            .or_else(|| element.strip_prefix("U:"))
            .unwrap_or(element);
        if element.is_empty() {
            return None;
        }
        let (start, end) = match element.split_once('-') {
            Some((a, b)) => (
                if a.is_empty() { 1 } else { a.parse().ok()? },
                if b.is_empty() { 65535 } else { b.parse().ok()? },
            ),
            None => {
                let p: u32 = element.parse().ok()?;
                (p, p)
            }
        };
        if start > end || end > 65535 {
            return None;
        }
        ranges.push((start, end));
    }
    Some(ranges)
}

/// In-process stand-in for a sandboxed scanner.
#[derive(Debug, Clone)]
pub struct SyntheticRunner {
    privileged: bool,
    available_scripts: Vec<String>,
    unreachable: Vec<Ipv4Range>,
    slow_scan_delay: Duration,
}

impl Default for SyntheticRunner {
    fn default() -> Self {
        Self {
            privileged: false,
            available_scripts: DEFAULT_SCRIPTS.iter().map(|s| s.to_string()).collect(),
            unreachable: UNREACHABLE_RANGES
                .iter()
                .filter_map(|r| r.parse().ok())
                .collect(),
            slow_scan_delay: Duration::from_secs(600),
        }
    }
}

impl SyntheticRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave as if the sandbox granted raw socket capabilities.
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// How long an all-ports service scan takes before producing output.
    pub fn with_slow_scan_delay(mut self, delay: Duration) -> Self {
        self.slow_scan_delay = delay;
        self
    }

    fn fatal(stderr: String, code: i32) -> RunOutput {
        RunOutput::new("Starting Nmap 7.94 ( https://nmap.org )", stderr, code)
    }

    fn check_options(&self, command: &Command) -> Option<RunOutput> {
        if let Some(flag) = command.flags.iter().find(|f| !is_known_flag(f)) {
            return Some(Self::fatal(
                format!(
                    "nmap: unrecognized option '{}'\nSee the output of nmap -h for a summary of options.",
                    flag
                ),
                2,
            ));
        }

        let tokens = command.tokens();
        for (i, token) in tokens.iter().enumerate() {
            if takes_argument(token) && tokens.get(i + 1).map_or(true, |next| next.starts_with('-')) {
                return Some(Self::fatal(
                    format!(
                        "nmap: option requires an argument -- '{}'",
                        token.trim_start_matches('-')
                    ),
                    2,
                ));
            }
        }

        if let Some(spec) = command.port_spec().filter(|s| *s != "-") {
            match parse_port_spec(spec) {
                Some(_) => {}
                None if spec.split([',', '-', ';']).any(|p| p.parse::<u32>().is_ok_and(|n| n > 65535)) => {
                    return Some(Self::fatal(format!("Illegal port number in \"{}\"\nQUITTING!", spec), 1));
                }
                None => {
                    return Some(Self::fatal(
                        "Your port specifications are illegal.  Example of proper form: \"-100,200-1024,T:3000-4000,U:60000-\"\nQUITTING!".to_string(),
                        1,
                    ));
                }
            }
        }
        None
    }

    fn check_privileges(&self, command: &Command) -> Option<RunOutput> {
        if self.privileged {
            return None;
        }
        if command.flags.iter().any(|f| RAW_SCAN_TYPES.contains(&f.as_str())) {
            return Some(Self::fatal(
                "You requested a scan type which requires root privileges.\nQUITTING!".to_string(),
                1,
            ));
        }
        if command.has_flag("-O") {
            return Some(Self::fatal(
                "pcap_open_live(): PCAP permission problem, OS detection needs raw packet access\nQUITTING!"
                    .to_string(),
                1,
            ));
        }
        None
    }

    fn check_scripts(&self, command: &Command) -> Option<RunOutput> {
        let selection = command.script_selection()?;
        let missing = selection
            .split(',')
            .find(|s| !self.available_scripts.iter().any(|a| a == s))?;
        Some(Self::fatal(
            format!("NSE: Failed to load '{}' script: no such category or file\nQUITTING!", missing),
            1,
        ))
    }

    fn is_unreachable(&self, target: &str) -> bool {
        let Some(addr) = target
            .split('/')
            .next()
            .and_then(|a| a.parse::<Ipv4Addr>().ok())
        else {
            return false;
        };
        self.unreachable.iter().any(|r| r.contains(addr))
    }

    fn scan(&self, command: &Command) -> RunOutput {
        let mut stdout = vec!["Starting Nmap 7.94 ( https://nmap.org )".to_string()];
        let mut stderr = Vec::new();
        let mut healthy = Vec::new();

        for target in &command.targets {
            let lower = target.to_ascii_lowercase();
            if UNRESOLVABLE_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
                stderr.push(format!("Failed to resolve \"{}\".", target));
            } else if self.is_unreachable(target) {
                stderr.push(format!(
                    "sendto in send_ip_packet_sd: sendto(5, packet, 44, 0, {}, 16) => Network is unreachable",
                    target
                ));
            } else {
                healthy.push(target.as_str());
            }
        }

        if healthy.is_empty() {
            stdout.push("WARNING: No targets were specified, so 0 hosts scanned.".to_string());
            stdout.push("Nmap done: 0 IP addresses (0 hosts up) scanned in 0.04 seconds".to_string());
            return RunOutput::new(stdout.join("\n"), stderr.join("\n"), 1);
        }

        let ranges = command
            .port_spec()
            .filter(|s| *s != "-")
            .and_then(parse_port_spec);
        let version_scan = command.has_flag("-sV") || command.has_flag("-A");

        for target in &healthy {
            stdout.push(format!("Nmap scan report for {}", target));
            stdout.push("Host is up (0.012s latency).".to_string());
            stdout.push("PORT    STATE SERVICE".to_string());
            for (port, service) in OPEN_PORTS {
                let wanted = ranges.as_ref().map_or(true, |r| {
                    r.iter()
                        .any(|(a, b)| (*a..=*b).contains(&u32::from(*port)))
                });
                if wanted {
                    stdout.push(format!("{}/tcp open  {}", port, service));
                }
            }
            if version_scan {
                stdout.push("Service Info: OS: Linux; CPE: cpe:/o:linux:linux_kernel".to_string());
            }
        }

        let n = healthy.len();
        stdout.push(format!(
            "Nmap done: {} IP address{} ({} host{} up) scanned in 1.02 seconds",
            n,
            if n == 1 { "" } else { "es" },
            n,
            if n == 1 { "" } else { "s" }
        ));
        RunOutput::new(stdout.join("\n"), stderr.join("\n"), 0)
    }
}

#[async_trait]
impl SandboxRunner for SyntheticRunner {
    async fn run(&self, command: &Command) -> CollaboratorResult<RunOutput> {
        if let Some(out) = self
            .check_options(command)
            .or_else(|| self.check_privileges(command))
            .or_else(|| self.check_scripts(command))
        {
            return Ok(out);
        }

        let exhaustive = command.has_flag("-p-") && (command.has_flag("-sV") || command.has_flag("-A"));
        if exhaustive {
            tokio::time::sleep(self.slow_scan_delay).await;
        }
        Ok(self.scan(command))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::patterns::ErrorKind;
    use crate::execution::report::ExecutionReport;

    async fn run(raw: &str) -> ExecutionReport {
        run_with(SyntheticRunner::new(), raw).await
    }

    async fn run_with(runner: SyntheticRunner, raw: &str) -> ExecutionReport {
        let command = Command::parse(raw).unwrap();
        let output = runner.run(&command).await.unwrap();
        ExecutionReport::from_output(raw, &output, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_connect_scan_succeeds() {
        let report = run("nmap -sT -p 80,443 scanme.nmap.org").await;
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.metrics.open_ports, vec![80, 443]);
    }

    #[tokio::test]
    async fn test_syn_scan_needs_root() {
        let report = run("nmap -sS -p 80 scanme.nmap.org").await;
        assert_eq!(report.errors[0].kind, ErrorKind::PermissionDenied);
        assert_eq!(report.errors[0].subtype, "requires_root");

        let report = run_with(SyntheticRunner::new().privileged(true), "nmap -sS -p 80 scanme.nmap.org").await;
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_os_detection_reports_pcap_problem() {
        let report = run("nmap -O scanme.nmap.org").await;
        assert_eq!(report.errors[0].subtype, "pcap_permission");
    }

    #[tokio::test]
    async fn test_reversed_port_range() {
        let report = run("nmap -p 80-70 example.com").await;
        assert_eq!(report.errors[0].kind, ErrorKind::PortSpecification);
    }

    #[tokio::test]
    async fn test_port_out_of_range() {
        let report = run("nmap -p 70000 example.com").await;
        assert_eq!(report.errors[0].subtype, "illegal_port");
    }

    #[tokio::test]
    async fn test_unknown_option_and_missing_argument() {
        let report = run("nmap --frobnicate example.com").await;
        assert_eq!(report.errors[0].subtype, "unrecognized_option");
        assert_eq!(report.exit_code, Some(2));

        let report = run("nmap example.com -p").await;
        assert_eq!(report.errors[0].subtype, "missing_argument");
    }

    #[tokio::test]
    async fn test_unavailable_script() {
        let report = run("nmap --script exploit example.com").await;
        assert_eq!(report.errors[0].kind, ErrorKind::ScriptNotFound);
        let report = run("nmap --script default,safe example.com").await;
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_and_unreachable_targets() {
        let report = run("nmap -sT nowhere.invalid").await;
        assert_eq!(report.errors[0].kind, ErrorKind::DnsResolution);
        assert_eq!(report.exit_code, Some(1));

        let report = run("nmap -sT 203.0.113.5").await;
        assert_eq!(report.errors[0].kind, ErrorKind::NetworkUnreachable);

        // One healthy target keeps the scan alive.
        let report = run("nmap -sT 203.0.113.5 scanme.nmap.org").await;
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.metrics.hosts_up, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustive_service_scan_is_slow() {
        let runner = SyntheticRunner::new().with_slow_scan_delay(Duration::from_secs(900));
        let command = Command::parse("nmap -sV -p- scanme.nmap.org").unwrap();
        let result = tokio::time::timeout(Duration::from_secs(300), runner.run(&command)).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_port_spec_parser() {
        assert_eq!(parse_port_spec("22,80-90"), Some(vec![(22, 22), (80, 90)]));
        assert_eq!(parse_port_spec("-100"), Some(vec![(1, 100)]));
        assert_eq!(parse_port_spec("T:80,U:53"), Some(vec![(80, 80), (53, 53)]));
        assert_eq!(parse_port_spec("80-70"), None);
        assert_eq!(parse_port_spec("80;443"), None);
        assert_eq!(parse_port_spec("70000"), None);
    }
}
