//! Execution Feedback Module
//!
//! Turns classified execution errors into command repairs:
//! - Autonomous fixes for well-understood failures, applied in one step
//! - A ranked correction-rule table for everything else
//! - A bounded loop that re-tests each candidate in the sandbox
//!
//! # Architecture
//!
//! ```text
//! Command → Simulator → ErrorAnalyzer → transforms::apply → Candidate
//!               ↑                                               |
//!               └───────────────────────────────────────────────┘
//! ```
//!
//! Rules and fixes are plain data; [`transforms::apply`] is the only place
//! that rewrites command tokens.

pub mod autonomous;
pub mod correction_loop;
pub mod error_analyzer;
pub mod session;
pub mod transforms;

pub use autonomous::{AutonomousFix, AutonomousFixTable, AutonomousRepair, FixEntry, FixPredicate};
pub use correction_loop::{CorrectionConfig, SelfCorrectionAgent};
pub use error_analyzer::{
    standard_rules, AnalysisRecord, AnalysisReport, AnalysisSummary, Correction,
    CorrectionRuleTable, ErrorAnalyzer, RuleSpec,
};
pub use session::{
    persistent_errors, CorrectionAttempt, CorrectionSession, FeedbackKind, FeedbackRecord,
    FeedbackStage, Priority, Recommendation, RepairType, SessionOutcome, SessionReport,
};
pub use transforms::{apply, CorrectionAction, CorrectionKind, Transformed};
