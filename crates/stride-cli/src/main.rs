//! Stride CLI - producer-side entry point
//!
//! Submits batches, queues the ones the backend could not take, and runs the
//! retry scheduler over the local queue.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::batch::{run_enqueue, run_submit};
use crate::commands::common::resolve_config;
use crate::commands::inspect::{run_clear_completed, run_export_failed, run_failed, run_stats};
use crate::commands::records::{run_delete, run_lookup};
use crate::commands::retry::{run_once, run_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stride=info".parse().expect("valid directive"))
                .add_directive("stride_core=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    let config = resolve_config(cli.queue_path, cli.api_url)?;

    match cli.command {
        Commands::Enqueue { kind, owner, file } => {
            run_enqueue(&config, kind, &owner, file.as_deref()).await?;
        }
        Commands::Submit {
            kind,
            owner,
            file,
            json,
        } => run_submit(&config, kind, &owner, file.as_deref(), json).await?,
        Commands::Run {
            budget_secs,
            reserve_secs,
            json,
        } => run_once(&config, budget_secs, reserve_secs, json).await?,
        Commands::Watch {
            interval_secs,
            budget_secs,
            reserve_secs,
        } => run_watch(&config, interval_secs, budget_secs, reserve_secs).await?,
        Commands::Stats { json } => run_stats(&config, json).await?,
        Commands::Failed { limit, json } => run_failed(&config, limit, json).await?,
        Commands::ExportFailed { output } => run_export_failed(&config, output.as_deref()).await?,
        Commands::ClearCompleted => run_clear_completed(&config).await?,
        Commands::Lookup {
            kind,
            owner,
            origin_ids,
        } => run_lookup(&config, kind, &owner, &origin_ids).await?,
        Commands::Delete {
            kind,
            owner,
            origin_ids,
        } => run_delete(&config, kind, &owner, &origin_ids).await?,
    }

    Ok(())
}
