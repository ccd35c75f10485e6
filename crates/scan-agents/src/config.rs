//! Pipeline configuration
//!
//! Defaults come from the environment. A TOML file can overlay any subset of
//! fields; fields missing from the file keep their environment value.
//!
//! | Variable | Field |
//! |---|---|
//! | `NMAP_TIER1_URL` .. `NMAP_TIER3_URL` | `generators.tier1` .. `generators.tier3` |
//! | `NMAP_VALIDATOR_URL` | `validator_url` (unset: local simulating validator) |
//! | `MAX_CORRECTIONS` | `max_corrections` |
//! | `MAX_CORRECTION_ATTEMPTS` | `max_attempts` |
//! | `NMAP_GENERATOR_TIMEOUT` / `NMAP_VALIDATOR_TIMEOUT` / `NMAP_EXECUTION_TIMEOUT` | timeouts, seconds |
//! | `NMAP_EVENT_LOG` | `event_log` |
//! | `NMAP_SANDBOX_IMAGE` | `sandbox.image` (unset: synthetic runner) |
//! | `NMAP_SANDBOX_NETWORK` | `sandbox.network` |
//!
//! Site-specific risk rules (`[risk]`) exist only in the TOML file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use scan_coordination::feedback::CorrectionConfig;
use scan_coordination::{EscalationTier, OrchestratorConfig, RiskRules, RuleTableError};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Generator endpoint per tier. A tier without a URL fails generation and
/// the orchestrator moves on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierEndpoints {
    pub tier1: Option<String>,
    pub tier2: Option<String>,
    pub tier3: Option<String>,
}

impl TierEndpoints {
    fn from_env() -> Self {
        Self {
            tier1: std::env::var("NMAP_TIER1_URL").ok(),
            tier2: std::env::var("NMAP_TIER2_URL").ok(),
            tier3: std::env::var("NMAP_TIER3_URL").ok(),
        }
    }

    pub fn get(&self, tier: EscalationTier) -> Option<&str> {
        match tier {
            EscalationTier::Tier1 => self.tier1.as_deref(),
            EscalationTier::Tier2 => self.tier2.as_deref(),
            EscalationTier::Tier3 => self.tier3.as_deref(),
        }
    }

    pub fn configured(&self) -> usize {
        EscalationTier::ALL
            .iter()
            .filter(|t| self.get(**t).is_some())
            .count()
    }
}

/// Container settings for real sandboxed runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Image with nmap on its PATH
    pub image: String,
    pub network: String,
    pub cpus: String,
    pub memory: String,
    /// Container name prefix; sanitized before use
    pub name_prefix: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "instrumentisto/nmap".into(),
            network: std::env::var("NMAP_SANDBOX_NETWORK").unwrap_or_else(|_| "nmap-ai-net".into()),
            cpus: "0.5".into(),
            memory: "512m".into(),
            name_prefix: "nmap-sim".into(),
        }
    }
}

/// One extra risk rule: a flag prefix or an IPv4 CIDR block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub pattern: String,
    pub reason: String,
}

/// Deployment rules appended to the built-in risk tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    pub forbidden_flags: Vec<PolicyRule>,
    pub unsafe_ranges: Vec<PolicyRule>,
}

impl RiskPolicy {
    pub fn is_empty(&self) -> bool {
        self.forbidden_flags.is_empty() && self.unsafe_ranges.is_empty()
    }

    /// Built-in tables plus this policy. Malformed ranges fail here, before
    /// any command is scored.
    pub fn rules(&self) -> Result<RiskRules, RuleTableError> {
        let pairs = |rules: &[PolicyRule]| -> Vec<(String, String)> {
            rules
                .iter()
                .map(|r| (r.pattern.clone(), r.reason.clone()))
                .collect()
        };
        RiskRules::with_custom(&pairs(&self.forbidden_flags), &pairs(&self.unsafe_ranges))
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub generators: TierEndpoints,
    /// Remote validator; `None` uses the local simulating validator
    pub validator_url: Option<String>,
    /// Repairs per tier before escalating
    pub max_corrections: u32,
    /// Iterative rounds per correction session
    pub max_attempts: u32,
    pub generator_timeout_secs: u64,
    pub validator_timeout_secs: u64,
    pub execution_timeout_secs: u64,
    /// JSONL stage event log
    pub event_log: Option<PathBuf>,
    /// Docker sandbox; `None` runs the synthetic runner
    pub sandbox: Option<SandboxConfig>,
    /// Reject accepted commands that carry warnings or high risk
    pub strict: bool,
    pub risk: RiskPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let orchestrator = OrchestratorConfig::default();
        let correction = CorrectionConfig::default();
        Self {
            generators: TierEndpoints::from_env(),
            validator_url: std::env::var("NMAP_VALIDATOR_URL").ok(),
            max_corrections: env_parse("MAX_CORRECTIONS", orchestrator.max_corrections),
            max_attempts: env_parse("MAX_CORRECTION_ATTEMPTS", correction.max_attempts),
            generator_timeout_secs: env_parse(
                "NMAP_GENERATOR_TIMEOUT",
                orchestrator.generator_timeout_secs,
            ),
            validator_timeout_secs: env_parse(
                "NMAP_VALIDATOR_TIMEOUT",
                orchestrator.validator_timeout_secs,
            ),
            execution_timeout_secs: env_parse(
                "NMAP_EXECUTION_TIMEOUT",
                correction.execution_timeout_secs,
            ),
            event_log: std::env::var("NMAP_EVENT_LOG").ok().map(PathBuf::from),
            sandbox: std::env::var("NMAP_SANDBOX_IMAGE").ok().map(|image| SandboxConfig {
                image,
                ..SandboxConfig::default()
            }),
            strict: false,
            risk: RiskPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Environment defaults overlaid by a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&content)
            .context(format!("Failed to load pipeline config from {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse pipeline config TOML")
    }

    /// File config when a path is given, environment defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_corrections: self.max_corrections,
            generator_timeout_secs: self.generator_timeout_secs,
            validator_timeout_secs: self.validator_timeout_secs,
        }
    }

    pub fn correction_config(&self) -> CorrectionConfig {
        CorrectionConfig {
            max_attempts: self.max_attempts,
            execution_timeout_secs: self.execution_timeout_secs,
            ..CorrectionConfig::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!(key, value = %value, "Ignoring unparsable environment value");
            default
        }),
        Err(_) => default,
    }
}
