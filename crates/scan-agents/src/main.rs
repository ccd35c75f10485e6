//! scan-agents CLI
//!
//! ```bash
//! # Structural and security check
//! scan-agents validate "nmap -sV scanme.nmap.org" --strict
//!
//! # Several commands with a pass-rate summary
//! scan-agents validate "nmap -sT scanme.nmap.org" "nmap --script vuln 10.0.0.1"
//!
//! # Sandbox run, classified, with candidate corrections
//! scan-agents simulate "nmap -sS -p 80 scanme.nmap.org"
//!
//! # One self-correction session
//! scan-agents repair "nmap -p 80-70 scanme.nmap.org" --intent "check the web port"
//!
//! # Full pipeline
//! NMAP_TIER1_URL=http://localhost:8001/api/v1/generate scan-agents run "scan top ports on scanme.nmap.org"
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use scan_agents::{Pipeline, PipelineConfig};
use scan_coordination::{EscalationTier, ValidationStatus};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file overlaying the environment configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Structural and security validation; several commands print a summary
    Validate {
        #[arg(required = true)]
        commands: Vec<String>,
        /// Reject commands with warnings or high risk
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Run a command in the sandbox, classify the output and propose fixes
    Simulate { command: String },
    /// Run one self-correction session on a command
    Repair {
        command: String,
        /// How the command was judged before repair
        #[arg(long, value_enum, default_value_t = StatusArg::Repairable)]
        status: StatusArg,
        /// What the user wanted the command to do
        #[arg(long, default_value = "")]
        intent: String,
    },
    /// Generate, validate, repair and escalate until a command is accepted
    Run {
        query: String,
        /// Starting tier (tier1|tier2|tier3 or easy|medium|hard)
        #[arg(long)]
        tier: Option<EscalationTier>,
    },
    /// Print the rule tables in effect
    Rules,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StatusArg {
    Repairable,
    Invalid,
}

impl From<StatusArg> for ValidationStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Repairable => ValidationStatus::Repairable,
            StatusArg::Invalid => ValidationStatus::Invalid,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = PipelineConfig::load(args.config.as_deref())?;
    let pipeline = Pipeline::from_config(config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match args.command {
        Commands::Validate { commands, strict } => match commands.as_slice() {
            [command] => print_json(&pipeline.validate(command, strict))?,
            _ => print_json(&pipeline.validate_batch(&commands, strict))?,
        },
        Commands::Simulate { command } => {
            let report = pipeline.simulate(&command).await?;
            let analysis = pipeline.analyze(&report);
            print_json(&serde_json::json!({
                "execution": report,
                "analysis": analysis,
            }))?;
        }
        Commands::Repair {
            command,
            status,
            intent,
        } => {
            let session = pipeline
                .repair(&command, &intent, status.into(), &cancel)
                .await?;
            let report = session.report();
            print_json(&serde_json::json!({
                "session": session,
                "report": report,
            }))?;
        }
        Commands::Run { query, tier } => match pipeline.run(&query, tier, &cancel).await {
            Ok(decision) => {
                info!(tier = %decision.tier, attempts = decision.attempts_used, "Command accepted");
                print_json(&decision)?;
            }
            Err(e) => {
                print_json(&serde_json::json!({
                    "error": e.code(),
                    "message": e.to_string(),
                    "escalations": e.escalations(),
                    "feedback": e.feedback(),
                }))?;
                std::process::exit(1);
            }
        },
        Commands::Rules => {
            print_json(&pipeline.rules())?;
        }
    }

    Ok(())
}
