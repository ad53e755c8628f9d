use std::path::Path;

use stride_core::config::ClientConfig;

use crate::commands::common::{format_operation_lines, open_queue, operation_to_item, OperationItem};
use crate::error::CliError;

pub async fn run_stats(config: &ClientConfig, as_json: bool) -> Result<(), CliError> {
    let stats = open_queue(config).await?.stats().await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("pending:   {} ({} due)", stats.pending_count, stats.due_count);
        println!("failed:    {}", stats.failed_count);
        println!("completed: {}", stats.completed_count);
    }
    Ok(())
}

pub async fn run_failed(config: &ClientConfig, limit: usize, as_json: bool) -> Result<(), CliError> {
    let queue = open_queue(config).await?;
    let mut operations = queue.failed_operations().await?;
    operations.truncate(limit);

    if as_json {
        let items = operations
            .iter()
            .map(|operation| operation_to_item(operation, false))
            .collect::<Vec<OperationItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if operations.is_empty() {
        println!("No failed entries");
    } else {
        for line in format_operation_lines(&operations, queue.now()) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_export_failed(
    config: &ClientConfig,
    output_path: Option<&Path>,
) -> Result<(), CliError> {
    let operations = open_queue(config).await?.failed_operations().await?;
    let items = operations
        .iter()
        .map(|operation| operation_to_item(operation, true))
        .collect::<Vec<OperationItem>>();
    let rendered = serde_json::to_string_pretty(&items)?;

    if let Some(path) = output_path {
        std::fs::write(path, rendered)?;
        println!("{}", path.display());
    } else {
        println!("{rendered}");
    }
    Ok(())
}

pub async fn run_clear_completed(config: &ClientConfig) -> Result<(), CliError> {
    let removed = open_queue(config).await?.clear_completed().await?;
    println!("Removed {removed} completed entries");
    Ok(())
}
