//! Retry scheduler
//!
//! A pass pulls the due entries from the [`SyncQueue`] and redelivers them one
//! at a time, oldest first. Only one pass runs at a time, both within the
//! process and across processes sharing the queue file (through a lease row
//! in the queue database); a trigger that arrives while a pass is in flight
//! is skipped.
//!
//! A pass stops early when the host's budget runs low or its expiry signal
//! fires. Entries it did not reach, and an entry whose delivery was still in
//! flight when the signal fired, are left exactly as they were.

mod budget;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::delivery::{Deliverer, DeliveryOutcome};
use crate::error::Result;
use crate::models::{OperationStatus, SyncOperation};
use crate::queue::SyncQueue;
use crate::util::owner_fingerprint;

pub use budget::ExecutionBudget;

/// Counts for one scheduler pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Deliveries that resolved (any outcome)
    pub attempted: usize,
    pub delivered: usize,
    pub retry_scheduled: usize,
    /// Entries that reached the retry limit during this pass
    pub exhausted: usize,
    /// Entries the backend refused permanently
    pub rejected: usize,
    /// Due entries this pass did not touch
    pub left_untouched: usize,
    /// The pass stopped early and another one should be scheduled
    pub follow_up_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(PassReport),
    /// Another pass was already running
    Skipped,
}

/// Settings for [`run_periodic`]
#[derive(Debug, Clone, Copy)]
pub struct PeriodicConfig {
    /// Wait between natural triggers
    pub interval: Duration,
    /// Budget per pass; `None` lets each pass drain the due set
    pub pass_budget: Option<Duration>,
    /// Worst-case duration of one delivery
    pub attempt_reserve: Duration,
    /// Wait before the follow-up of a pass that stopped early
    pub follow_up_delay: Duration,
}

impl Default for PeriodicConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            pass_budget: Some(Duration::from_secs(25)),
            attempt_reserve: Duration::from_secs(10),
            follow_up_delay: Duration::from_secs(5),
        }
    }
}

impl PeriodicConfig {
    fn budget(&self) -> ExecutionBudget {
        self.pass_budget.map_or_else(ExecutionBudget::unbounded, |limit| {
            ExecutionBudget::new(limit, self.attempt_reserve)
        })
    }
}

/// How long a pass may hold the queue lease between renewals
const LEASE_TTL_MINUTES: i64 = 5;

/// Single-flight redelivery of due queue entries
pub struct RetryScheduler {
    /// Queue the passes drain.
    queue: SyncQueue,
    /// Transport for redelivery.
    deliverer: Arc<dyn Deliverer>,
    /// Set while a pass of this scheduler runs.
    in_flight: AtomicBool,
    /// Lease holder id, shared with other processes through the queue file.
    holder: String,
}

fn lease_ttl() -> chrono::Duration {
    chrono::Duration::minutes(LEASE_TTL_MINUTES)
}

/// Releases the single-flight flag when a pass ends, however it ends
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RetryScheduler {
    pub fn new(queue: SyncQueue, deliverer: Arc<dyn Deliverer>) -> Self {
        Self {
            queue,
            deliverer,
            in_flight: AtomicBool::new(false),
            holder: Uuid::now_v7().to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one pass over the due set
    pub async fn run_pass(
        &self,
        budget: ExecutionBudget,
        expiry: &CancellationToken,
    ) -> Result<PassOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Scheduler pass already in flight; skipping trigger");
            return Ok(PassOutcome::Skipped);
        }
        let _guard = PassGuard(&self.in_flight);

        if !self.queue.try_acquire_lease(&self.holder, lease_ttl()).await? {
            tracing::debug!("Queue lease held by another scheduler; skipping trigger");
            return Ok(PassOutcome::Skipped);
        }

        let result = self.drain(budget, expiry).await;
        if let Err(error) = self.queue.release_lease(&self.holder).await {
            tracing::warn!("Failed to release queue lease: {error}");
        }
        result.map(PassOutcome::Completed)
    }

    async fn drain(
        &self,
        budget: ExecutionBudget,
        expiry: &CancellationToken,
    ) -> Result<PassReport> {
        let due = self.queue.due_operations().await?;
        let mut report = PassReport::default();
        if due.is_empty() {
            tracing::debug!("No due sync operations");
            return Ok(report);
        }
        tracing::info!(due = due.len(), "Starting scheduler pass");

        for (index, operation) in due.iter().enumerate() {
            if expiry.is_cancelled() || !budget.allows_another_attempt() {
                report.left_untouched = due.len() - index;
                report.follow_up_required = true;
                tracing::info!(
                    left_untouched = report.left_untouched,
                    remaining_budget = ?budget.remaining(),
                    "Stopping scheduler pass before budget expiry"
                );
                break;
            }

            if !self.queue.try_acquire_lease(&self.holder, lease_ttl()).await? {
                report.left_untouched = due.len() - index;
                report.follow_up_required = true;
                tracing::warn!(
                    left_untouched = report.left_untouched,
                    "Queue lease taken over; stopping scheduler pass"
                );
                break;
            }

            let outcome = tokio::select! {
                biased;
                () = expiry.cancelled() => None,
                outcome = self.deliverer.deliver(&operation.endpoint, &operation.payload) => Some(outcome),
            };

            let Some(outcome) = outcome else {
                // The in-flight attempt is abandoned without touching the entry
                report.left_untouched = due.len() - index;
                report.follow_up_required = true;
                tracing::info!(
                    operation = %operation.id,
                    left_untouched = report.left_untouched,
                    "Scheduler pass interrupted during delivery"
                );
                break;
            };

            report.attempted += 1;
            self.apply(operation, outcome, &mut report).await?;
        }

        tracing::info!(
            attempted = report.attempted,
            delivered = report.delivered,
            retry_scheduled = report.retry_scheduled,
            exhausted = report.exhausted,
            rejected = report.rejected,
            left_untouched = report.left_untouched,
            "Scheduler pass finished"
        );
        Ok(report)
    }

    async fn apply(
        &self,
        operation: &SyncOperation,
        outcome: DeliveryOutcome,
        report: &mut PassReport,
    ) -> Result<()> {
        match outcome {
            DeliveryOutcome::Delivered(response) => {
                self.queue.mark_success(&operation.id).await?;
                report.delivered += 1;
                tracing::info!(
                    operation = %operation.id,
                    owner = owner_fingerprint(&operation.owner_id),
                    inserted = response.count_inserted,
                    duplicates_skipped = response.duplicates_skipped,
                    errors = response.errors_count,
                    "Delivered queued batch"
                );
            }
            DeliveryOutcome::Retryable(error) => {
                let updated = self
                    .queue
                    .mark_failure(&operation.id, &error.to_string())
                    .await?;
                if updated.status == OperationStatus::Failed {
                    report.exhausted += 1;
                } else {
                    report.retry_scheduled += 1;
                }
            }
            DeliveryOutcome::Rejected(error) => {
                self.queue
                    .mark_rejected(&operation.id, &error.to_string())
                    .await?;
                report.rejected += 1;
            }
        }
        Ok(())
    }
}

/// Trigger passes on an interval until `shutdown` fires.
///
/// A pass that stopped early is followed up after `follow_up_delay` instead
/// of the full interval. `shutdown` doubles as the expiry signal of the
/// running pass.
pub async fn run_periodic(
    scheduler: &RetryScheduler,
    config: PeriodicConfig,
    shutdown: CancellationToken,
) {
    loop {
        let wait = match scheduler.run_pass(config.budget(), &shutdown).await {
            Ok(PassOutcome::Completed(report)) if report.follow_up_required => {
                config.follow_up_delay
            }
            Ok(_) => config.interval,
            Err(error) => {
                tracing::error!("Scheduler pass failed: {error}");
                config.interval
            }
        };

        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("Shutdown requested; stopping retry scheduler");
                break;
            }
            () = tokio::time::sleep(wait) => {}
        }
    }
}
