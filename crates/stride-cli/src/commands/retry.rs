use std::time::Duration;

use stride_core::config::ClientConfig;
use stride_core::scheduler::{
    run_periodic, ExecutionBudget, PassOutcome, PassReport, PeriodicConfig, RetryScheduler,
};
use tokio_util::sync::CancellationToken;

use crate::commands::common::{http_deliverer, open_queue};
use crate::error::CliError;

pub async fn build_scheduler(config: &ClientConfig) -> Result<RetryScheduler, CliError> {
    let queue = open_queue(config).await?;
    Ok(RetryScheduler::new(queue, http_deliverer(config)?))
}

pub fn pass_budget(budget_secs: Option<u64>, reserve_secs: u64) -> ExecutionBudget {
    budget_secs.map_or_else(ExecutionBudget::unbounded, |limit| {
        ExecutionBudget::new(
            Duration::from_secs(limit),
            Duration::from_secs(reserve_secs),
        )
    })
}

pub async fn run_once(
    config: &ClientConfig,
    budget_secs: Option<u64>,
    reserve_secs: u64,
    as_json: bool,
) -> Result<(), CliError> {
    let scheduler = build_scheduler(config).await?;
    let expiry = CancellationToken::new();
    let interrupt = tokio::spawn(cancel_on_interrupt(expiry.clone()));

    let outcome = scheduler
        .run_pass(pass_budget(budget_secs, reserve_secs), &expiry)
        .await;
    interrupt.abort();

    match outcome? {
        PassOutcome::Completed(report) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for line in format_pass_report(&report) {
                    println!("{line}");
                }
            }
        }
        PassOutcome::Skipped => println!("Another pass is already running"),
    }
    Ok(())
}

pub async fn run_watch(
    config: &ClientConfig,
    interval_secs: u64,
    budget_secs: u64,
    reserve_secs: u64,
) -> Result<(), CliError> {
    let scheduler = build_scheduler(config).await?;
    let periodic = PeriodicConfig {
        interval: Duration::from_secs(interval_secs),
        pass_budget: Some(Duration::from_secs(budget_secs)),
        attempt_reserve: Duration::from_secs(reserve_secs),
        ..PeriodicConfig::default()
    };

    let shutdown = CancellationToken::new();
    let interrupt = tokio::spawn(cancel_on_interrupt(shutdown.clone()));
    tracing::info!(interval_secs, budget_secs, "Watching retry queue");
    run_periodic(&scheduler, periodic, shutdown).await;
    interrupt.abort();
    Ok(())
}

async fn cancel_on_interrupt(token: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Interrupt received; abandoning the running pass");
            token.cancel();
        }
        Err(error) => tracing::error!("Failed to listen for interrupt: {error}"),
    }
}

pub fn format_pass_report(report: &PassReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Attempted {}: {} delivered, {} rescheduled, {} exhausted, {} rejected",
        report.attempted,
        report.delivered,
        report.retry_scheduled,
        report.exhausted,
        report.rejected
    )];
    if report.follow_up_required {
        lines.push(format!(
            "Stopped early; {} due entries left for the next pass",
            report.left_untouched
        ));
    }
    lines
}
