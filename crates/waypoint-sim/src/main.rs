//! Waypoint simulator
//!
//! `waypoint-sim stress` drives concurrent executions through checkpoint and
//! rollback and verifies isolation; `waypoint-sim report` prints checkpoint
//! statistics for a deterministic run.

mod sim;

use anyhow::{ensure, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use waypoint_store::StoreConfig;

#[derive(Debug, Parser)]
#[command(name = "waypoint-sim", version, about = "Checkpoint and partial rollback simulator")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run concurrent executions through checkpoint and rollback
    Stress {
        /// Number of concurrent executions
        #[arg(long, default_value_t = 100)]
        executions: usize,

        /// Phases checkpointed per execution
        #[arg(long, default_value_t = 5)]
        phases: usize,

        /// Override the configured retention count
        #[arg(long)]
        retention: Option<usize>,

        /// Store configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print checkpoint statistics for a deterministic run
    Report {
        /// Output as JSON
        #[arg(long)]
        json: bool,

        #[arg(long, default_value_t = 3)]
        executions: usize,

        #[arg(long, default_value_t = 4)]
        phases: usize,

        /// Store configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>, retention: Option<usize>) -> anyhow::Result<StoreConfig> {
    let mut config = match path {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading store config from {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(count) = retention {
        config = config.with_retention(count);
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Stress {
            executions,
            phases,
            retention,
            config,
            json,
        } => {
            ensure!(executions > 0, "--executions must be at least 1");
            ensure!(phases > 0, "--phases must be at least 1");
            let config = load_config(config.as_ref(), retention)?;

            if !json {
                println!("Running stress test...");
                println!("Executions: {executions}");
                println!("Phases: {phases}");
                println!("Retention: {}", config.retention_count);
                println!();
            }

            let report = sim::run_stress(config, executions, phases).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.generate_text());
            }

            Ok(if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Report {
            json,
            executions,
            phases,
            config,
        } => {
            let config = load_config(config.as_ref(), None)?;
            let stats =
                tokio::task::spawn_blocking(move || sim::seeded_stats(config, executions, phases))
                    .await??;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Checkpoint Report");
                println!("=================");
                for s in &stats {
                    println!();
                    println!("{}:", s.execution_id);
                    println!("  Checkpoints: {} ({} compressed)", s.total_checkpoints, s.compressed_checkpoints);
                    println!("  Size: {} bytes -> {} bytes", s.total_size, s.compressed_size);
                    println!("  Compression Ratio: {:.1}%", s.compression_ratio);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
