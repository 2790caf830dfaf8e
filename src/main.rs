//! strain-cascade - chunked clustering and per-cluster phylogenomics
//!
//! Exit codes: 0 every group finished (warnings allowed), 1 at least one group
//! failed, 2 the run was aborted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use strain_cascade::{ConfigService, RunPlan, Workflow, WorkflowConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const EXIT_ABORTED: i32 = 2;

/// strain-cascade - chunked clustering and per-cluster phylogenomics
#[derive(Parser, Debug)]
#[command(name = "strain-cascade")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the whole workflow, resuming from checkpoints
    Run {
        /// Workflow configuration file
        #[arg(short, long, default_value = "strain-cascade.toml")]
        config: PathBuf,
    },

    /// Show chunking and resource profiles without running anything
    Plan {
        /// Workflow configuration file
        #[arg(short, long, default_value = "strain-cascade.toml")]
        config: PathBuf,
    },

    /// Write the default configuration
    Init {
        /// Destination file
        #[arg(short, long, default_value = "strain-cascade.toml")]
        config: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn print_plan(plan: &RunPlan) {
    println!(
        "{} samples in {} chunk(s), up to {} clustering at once",
        plan.catalog_size,
        plan.chunks.len(),
        plan.max_concurrent_chunks
    );
    println!(
        "{:<12} {:>8} {:<18} {:<12} {:>10}",
        "UNIT", "SAMPLES", "TIER", "CLASS", "MEMORY_MB"
    );
    for chunk in &plan.chunks {
        println!(
            "{:<12} {:>8} {:<18} {:<12} {:>10}",
            chunk.unit,
            chunk.samples,
            chunk.tier.to_string(),
            chunk.ceiling_class.to_string(),
            chunk.memory_mb
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Init { config, force } => {
            ConfigService::write_template(&config, &WorkflowConfig::default(), force)
                .with_context(|| format!("failed to write {}", config.display()))?;
            println!("Wrote default configuration to {}", config.display());
            Ok(())
        }
        Commands::Plan { config } => {
            let service = match ConfigService::load(&config) {
                Ok(service) => service,
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(EXIT_ABORTED);
                }
            };
            match Workflow::new(service.into_config()).plan() {
                Ok(plan) => {
                    print_plan(&plan);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(EXIT_ABORTED);
                }
            }
        }
        Commands::Run { config } => {
            let service = match ConfigService::load(&config) {
                Ok(service) => service,
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(EXIT_ABORTED);
                }
            };
            let workflow = Workflow::new(service.into_config());
            match workflow.run().await {
                Ok(report) => {
                    println!(
                        "{}: {} done, {} done with warning, {} failed (report: {})",
                        report.status,
                        report.counts.done,
                        report.counts.done_with_warning,
                        report.counts.failed,
                        workflow.layout().report_path().display()
                    );
                    if let Some(reason) = &report.abort_reason {
                        eprintln!("Run aborted: {}", reason);
                    }
                    // Exit directly so the code reflects group outcomes.
                    std::process::exit(report.exit_code());
                }
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(EXIT_ABORTED);
                }
            }
        }
    }
}
