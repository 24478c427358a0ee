//! airgraph - bulk loader for the air-routes graph

use std::path::PathBuf;

use airgraph_client::GraphClient;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use crate::config::LoaderConfig;
use crate::phases::{Phase, PhaseRunner, PhaseSummary, Prompter};

mod config;
mod input;
mod phases;
mod queries;

/// Load the air-routes graph into a Gremlin-style query service
#[derive(Parser, Debug)]
#[command(name = "airgraph")]
#[command(about = "Bulk loader for the air-routes graph", long_about = None)]
struct Args {
    /// Optional configuration file (json or toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Phases to run, in order (defaults to all)
    #[arg(short, long, value_enum, value_delimiter = ',')]
    phase: Vec<Phase>,

    /// Wait for Enter before each phase
    #[arg(short, long)]
    interactive: bool,

    /// Override the vertex CSV path
    #[arg(long)]
    vertices: Option<PathBuf>,

    /// Override the edge CSV path
    #[arg(long)]
    edges: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config =
        LoaderConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(path) = args.vertices {
        config.vertices_path = path;
    }
    if let Some(path) = args.edges {
        config.edges_path = path;
    }
    init_tracing(&config, args.debug);
    info!("loader config:\n{:?}", config);

    let phases = if args.phase.is_empty() {
        Phase::ALL.to_vec()
    } else {
        args.phase
    };
    let mut prompter = if args.interactive {
        Some(Prompter::new()?)
    } else {
        None
    };

    let client = GraphClient::connect(&config.to_connection_config())
        .await
        .with_context(|| format!("failed to connect to {}", config.endpoint_uri))?;
    let result = run_phases(&client, &config, &phases, prompter.as_mut()).await;
    client.close().await;
    result?;

    println!("\nAnd that's all! Load complete");
    Ok(())
}

async fn run_phases(
    client: &GraphClient,
    config: &LoaderConfig,
    phases: &[Phase],
    mut prompter: Option<&mut Prompter>,
) -> Result<()> {
    let runner = PhaseRunner::new(client, config);
    for &phase in phases {
        if let Some(prompter) = prompter.as_deref_mut() {
            if !prompter.confirm(phase)? {
                info!(%phase, "stopped at prompt");
                return Ok(());
            }
        }
        match runner.run(phase).await? {
            PhaseSummary::Single(result) => {
                println!("> {phase}: {} record(s)", result.total_records);
                for record in &result.records {
                    println!("\t{record}");
                }
                println!("\tstatus attributes: {:?}", result.status_attributes);
            }
            PhaseSummary::Batch(report) => {
                println!(
                    "> {phase}: {} loaded, {} failed, {} malformed, {:.2} RU",
                    report.succeeded, report.failed, report.malformed, report.request_charge
                );
                for (category, count) in &report.failures_by_category {
                    println!("\t{category}: {count}");
                }
            }
        }
    }
    Ok(())
}

fn init_tracing(config: &LoaderConfig, debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .init();
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .init();
    }
}
