//! Scan Coordination Library
//!
//! Deterministic core of the nmap command pipeline:
//!
//! - [`risk`]: scores flags and targets against forbidden/warning tables
//! - [`validator`]: structural checks, injection screening and the security gate
//! - [`execution`]: sandboxed runs classified into structured reports
//! - [`feedback`]: autonomous fixes, correction rules and the self-correction loop
//! - [`escalation`]: the tier chain that generates, validates and repairs
//! - [`history`] and [`events`]: session history and the stage event log
//!
//! # Flow
//!
//! ```text
//! query ─▶ Generator(tier) ─▶ Validator ─┬─ Valid ──────▶ FinalDecision
//!                                        ├─ Repairable ─▶ SelfCorrectionAgent ─▶ Validator
//!                                        └─ Invalid ────▶ next tier
//! ```
//!
//! Generators, remote validators and the sandbox are collaborators behind
//! async traits; the `scan-agents` crate provides HTTP and Docker
//! implementations.

#![allow(clippy::uninlined_format_args)]

pub mod command;
pub mod error;
pub mod escalation;
pub mod events;
pub mod execution;
pub mod feedback;
pub mod history;
pub mod risk;
pub mod shell_safety;
pub mod validator;

pub use command::{Command, CommandParseError};
pub use error::{
    CollaboratorError, CollaboratorResult, PipelineError, PipelineResult, RejectionCategory,
    RuleTableError, ValidationRejection,
};
pub use escalation::{
    EscalationOrchestrator, EscalationTier, FinalDecision, GenerationRequest, Generator,
    OrchestratorConfig, SimulatingValidator, ValidationStatus, Validator, ValidatorVerdict,
};
pub use events::{EventBus, EventSink, MemoryEventSink, NullEventSink, PipelineEvent};
pub use execution::{ExecutionReport, ExecutionSimulator, SandboxRunner, SyntheticRunner};
pub use feedback::{CorrectionSession, ErrorAnalyzer, SelfCorrectionAgent};
pub use history::{HistoryError, InMemorySessionHistory, SessionRepository};
pub use risk::{RiskAssessment, RiskEngine, RiskLevel, RiskRules};
pub use validator::{StructuralValidator, ValidationOutcome};
