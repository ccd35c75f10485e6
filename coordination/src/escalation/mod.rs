//! Escalation orchestrator: the tier chain for command generation
//!
//! Routes a request through the generation tiers, cheapest first, and
//! decides at each step whether to accept, repair or escalate. The
//! routing itself makes no model calls; generators and validators are
//! collaborators behind traits.
//!
//! # Escalation Ladder
//!
//! ```text
//! Tier1 (easy): template generation
//!     │
//!     ├─ Valid → accept
//!     ├─ Repairable → self-correction, validate again (max_corrections + 1 validations)
//!     ├─ Invalid / correction failed / generator failed → escalate
//!     │
//!     ▼
//! Tier2 (medium): retrieval-augmented generation
//!     │  receives the last session's feedback
//!     ▼
//! Tier3 (hard): full generation
//!     │
//!     ▼
//! Still nothing valid → PipelineError::Exhausted with the last feedback
//! ```

pub mod classify;
pub mod engine;
pub mod state;
pub mod verdict;

pub use classify::{classify_initial_tier, is_scan_related, Comprehension, InitialTierRecommendation};
pub use engine::{
    EscalationOrchestrator, GenerationRequest, Generator, OrchestratorConfig, Validator,
};
pub use state::{
    EscalationReason, EscalationRecord, EscalationState, EscalationTier, FinalDecision,
    ValidationStatus, ValidatorVerdict,
};
pub use verdict::SimulatingValidator;
