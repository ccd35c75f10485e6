//! Risk Engine
//!
//! Scores scan commands for operational risk. Flags are matched by prefix
//! against forbidden and warning tables, IPv4 targets by CIDR overlap against
//! unsafe ranges.
//!
//! ```text
//! flags ──▶ forbidden? (+40) ──┐
//!       └─▶ warning?   (+10) ──┼──▶ score (clamped 0..=100) ──▶ level
//! targets ─▶ unsafe?   (+30) ──┘
//! ```

pub mod engine;
pub mod rules;

pub use engine::{ComplianceSummary, RiskAssessment, RiskEngine, RiskFinding, RiskLevel};
pub use rules::{FlagRule, Ipv4Range, RangeRule, RiskRules};
