//! Runtime for the nmap command pipeline.
//!
//! Wires the deterministic core in `scan_coordination` to the outside world:
//! HTTP generation and validation services, a Docker sandbox, a JSONL stage
//! event log and environment/TOML configuration.

pub mod clients;
pub mod config;
pub mod pipeline;
pub mod runner;
pub mod telemetry;

pub use clients::{HttpGenerator, HttpValidator};
pub use config::{PipelineConfig, PolicyRule, RiskPolicy, SandboxConfig, TierEndpoints};
pub use pipeline::Pipeline;
pub use runner::DockerRunner;
pub use telemetry::JsonlEventSink;
