//! songbatch CLI: serve the batch API or run one batch in the foreground.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use songbatch::client::{GenerationClient, SunoClient};
use songbatch::config::Config;
use songbatch::engine::{BatchController, BatchRequest, DirectGenerator};
use songbatch::model::Variant;
use songbatch::server::{self, AppState};
use songbatch::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "songbatch", about = "Batch runner for AI song generation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP batch service
    Serve {
        /// Address to bind, overrides BIND_ADDR
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run a single batch from a CSV file and wait for it to finish
    Run {
        /// Input CSV file
        csv: PathBuf,
        /// Run name, used for the results file and download directory
        #[arg(long)]
        run_name: String,
        /// Input carries lyrics and tags instead of prompts
        #[arg(long)]
        custom: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "songbatch".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let client: Arc<dyn GenerationClient> = Arc::new(SunoClient::new(config.api_url.clone()));
    let controller = Arc::new(BatchController::new(
        Arc::clone(&client),
        config.runner.clone(),
        config.output_root.clone(),
    ));

    match cli.command {
        Command::Serve { bind } => {
            let addr = bind.unwrap_or_else(|| config.bind_addr.clone());
            let direct = Arc::new(DirectGenerator::new(client, &config.runner));
            server::serve(&addr, AppState { controller, direct }).await?;
        }
        Command::Run {
            csv,
            run_name,
            custom,
        } => cmd_run(&controller, csv, run_name, custom).await?,
    }
    Ok(())
}

async fn cmd_run(
    controller: &BatchController,
    csv: PathBuf,
    run_name: String,
    custom: bool,
) -> anyhow::Result<()> {
    let csv_text = tokio::fs::read_to_string(&csv)
        .await
        .with_context(|| format!("reading {}", csv.display()))?;
    let variant = if custom {
        Variant::Custom
    } else {
        Variant::Prompt
    };

    let ticket = controller
        .submit(BatchRequest {
            csv_text,
            run_name,
            variant,
        })
        .await?;
    eprintln!(
        "Started {} ({} items) -> {}",
        ticket.run_name, ticket.total, ticket.output_dir
    );

    let summary = controller
        .wait()
        .await
        .context("batch vanished before it finished")??;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
