//! Execution Simulator
//!
//! Runs candidate commands in a sandbox and turns the raw output into a
//! structured report the correction machinery can reason about.
//!
//! ```text
//! Command ──▶ SandboxRunner (timeout) ──▶ RunOutput ──▶ line classifier ──▶ ExecutionReport
//!                                                        (first pattern wins)
//! ```

pub mod patterns;
pub mod report;
pub mod simulator;
pub mod synthetic;

pub use patterns::{classify_line, ErrorKind, Severity};
pub use report::{ErrorRecord, ExecutionReport, RunOutput, ScanMetrics, SuccessCriterion};
pub use simulator::{
    requires_privileges, ExecutionSimulator, SandboxRunner, DEFAULT_EXECUTION_TIMEOUT,
    PRIVILEGED_FLAGS,
};
pub use synthetic::SyntheticRunner;
