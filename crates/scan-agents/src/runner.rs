//! Docker sandbox runner
//!
//! Each run gets a throwaway container on an isolated network with every
//! capability dropped. Scan types that need raw sockets get `NET_RAW` and
//! `NET_ADMIN` back, nothing else. The `docker` client process is killed when
//! the simulator's timeout drops the run.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use scan_coordination::execution::{requires_privileges, RunOutput};
use scan_coordination::shell_safety::sanitize_identifier;
use scan_coordination::{CollaboratorError, CollaboratorResult, Command, SandboxRunner};
use tracing::{debug, warn};

use crate::config::SandboxConfig;

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub struct DockerRunner {
    config: SandboxConfig,
    docker: String,
}

impl DockerRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            docker: "docker".into(),
        }
    }

    /// Use a different client binary (e.g. `podman`).
    pub fn with_binary(mut self, docker: impl Into<String>) -> Self {
        self.docker = docker.into();
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Unique, sanitized container name for the next run.
    pub fn container_name(&self) -> String {
        let seq = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
        sanitize_identifier(&format!(
            "{}-{}-{}",
            self.config.name_prefix,
            std::process::id(),
            seq
        ))
    }

    /// Full argument list for `docker`, command tokens last.
    pub fn docker_args(&self, command: &Command, container_name: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "run",
            "--rm",
            "--name",
            container_name,
            "--network",
            self.config.network.as_str(),
            "--cpus",
            self.config.cpus.as_str(),
            "--memory",
            self.config.memory.as_str(),
            "--cap-drop",
            "ALL",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if requires_privileges(command) {
            args.extend(["--cap-add", "NET_RAW", "--cap-add", "NET_ADMIN"].map(String::from));
        }

        args.push(self.config.image.clone());
        args.extend(command.tokens().iter().cloned());
        args
    }
}

#[async_trait]
impl SandboxRunner for DockerRunner {
    async fn run(&self, command: &Command) -> CollaboratorResult<RunOutput> {
        let name = self.container_name();
        let args = self.docker_args(command, &name);
        debug!(container = %name, image = %self.config.image, command = %command, "Starting sandbox");

        let output = tokio::process::Command::new(&self.docker)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                warn!(container = %name, error = %e, "Failed to launch sandbox");
                CollaboratorError::Sandbox(format!("failed to launch {}: {}", self.docker, e))
            })?;

        let exit_code = output.status.code();
        debug!(container = %name, exit_code = ?exit_code, "Sandbox finished");
        Ok(RunOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code,
        })
    }

    fn name(&self) -> &str {
        "docker"
    }
}
