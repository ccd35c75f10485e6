//! Query comprehension and initial tier selection
//!
//! Two keyword gates run before any generator is called:
//!
//! ```text
//! query → is_scan_related ──no──▶ PipelineError::OffTopic
//!             │ yes
//!             ▼
//!      classify_initial_tier
//!             │  udp, all ports, evasion ...   │→ Tier3 (hard)
//!             │  version, scripts, timing ...  │→ Tier2 (medium)
//!             │  anything else                 │→ Tier1 (easy)
//! ```
//!
//! The orchestrator accepts any starting tier; these functions are the
//! default classifier used by the CLI.

use serde::{Deserialize, Serialize};

use crate::escalation::state::EscalationTier;

/// Keywords that mark a query as being about port scanning.
const SCAN_HINTS: &[&str] = &[
    "nmap", "-ss", "-su", "-a", "-p", "--open", "udp", "tcp", "scan", "port", "os detect",
];

/// Keywords that indicate a hard request.
const HARD_KEYWORDS: &[&str] = &[
    "udp",
    "all ports",
    "os detect",
    "fragment",
    "bypass",
    "evasion",
];

/// Keywords that indicate a medium request.
const MEDIUM_KEYWORDS: &[&str] = &["version", "scripts", "timing", "exclude", "-sv"];

/// Outcome of the comprehension gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comprehension {
    pub is_scan_related: bool,
    pub reason: String,
}

/// Recommendation for the initial tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialTierRecommendation {
    pub tier: EscalationTier,
    /// Confidence score (0.0 to 1.0).
    pub confidence: f64,
    /// Keyword that decided the level, if any.
    pub matched: Option<String>,
}

/// Does the query talk about scanning at all?
pub fn is_scan_related(query: &str) -> Comprehension {
    let lower = query.to_lowercase();
    match SCAN_HINTS.iter().find(|hint| lower.contains(*hint)) {
        Some(hint) => Comprehension {
            is_scan_related: true,
            reason: format!("Contains scan keyword '{}'", hint),
        },
        None => Comprehension {
            is_scan_related: false,
            reason: "No scan keyword found".to_string(),
        },
    }
}

/// Pick the starting tier from the query text. Hard signals dominate.
pub fn classify_initial_tier(query: &str) -> InitialTierRecommendation {
    let lower = query.to_lowercase();
    let hit = |keywords: &[&str]| {
        keywords
            .iter()
            .find(|kw| lower.contains(*kw))
            .map(|kw| kw.to_string())
    };

    if let Some(kw) = hit(HARD_KEYWORDS) {
        return InitialTierRecommendation {
            tier: EscalationTier::Tier3,
            confidence: 0.7,
            matched: Some(kw),
        };
    }
    if let Some(kw) = hit(MEDIUM_KEYWORDS) {
        return InitialTierRecommendation {
            tier: EscalationTier::Tier2,
            confidence: 0.6,
            matched: Some(kw),
        };
    }
    InitialTierRecommendation {
        tier: EscalationTier::Tier1,
        confidence: 0.8,
        matched: None,
    }
}
