use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use super::*;
use crate::clock::ManualClock;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
}

async fn setup() -> (SyncQueue, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let policy = RetryPolicy::default().with_base_delay(Duration::seconds(1));
    let queue = SyncQueue::open_in_memory(policy)
        .await
        .unwrap()
        .with_clock(clock.clone());
    (queue, clock)
}

async fn enqueue_steps(queue: &SyncQueue, owner: &str) -> SyncOperation {
    queue
        .enqueue(
            OperationType::StepBatch,
            owner,
            br#"{"owner_id":"o","records":[]}"#.to_vec(),
            "/v1/ingest/step",
        )
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueue_creates_pending_entry_due_now() {
    let (queue, _clock) = setup().await;
    let op = enqueue_steps(&queue, "owner-1").await;

    let stored = queue.get(&op.id).await.unwrap().unwrap();
    assert_eq!(stored, op);
    assert_eq!(stored.status, OperationStatus::Pending);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.next_retry_at, Some(start()));

    let due = queue.due_operations().await.unwrap();
    assert_eq!(due.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueue_rejects_empty_owner_and_endpoint() {
    let (queue, _clock) = setup().await;
    let err = queue
        .enqueue(OperationType::SleepBatch, "  ", vec![], "/v1/ingest/sleep")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = queue
        .enqueue(OperationType::SleepBatch, "owner", vec![], "")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn due_operations_are_oldest_first() {
    let (queue, clock) = setup().await;
    let first = enqueue_steps(&queue, "a").await;
    clock.advance(Duration::milliseconds(5));
    let second = enqueue_steps(&queue, "b").await;
    clock.advance(Duration::milliseconds(5));
    let third = enqueue_steps(&queue, "c").await;

    // Push the oldest entry's retry time out, then let everything become overdue
    queue.mark_failure(&first.id, "timeout").await.unwrap();
    clock.advance(Duration::minutes(10));

    let due: Vec<_> = queue
        .due_operations()
        .await
        .unwrap()
        .into_iter()
        .map(|op| op.id)
        .collect();
    assert_eq!(due, vec![first.id, second.id, third.id]);
}

#[tokio::test(flavor = "multi_thread")]
async fn due_operations_skip_entries_waiting_for_backoff() {
    let (queue, clock) = setup().await;
    let op = enqueue_steps(&queue, "owner").await;
    queue.mark_failure(&op.id, "offline").await.unwrap();

    assert!(queue.due_operations().await.unwrap().is_empty());

    clock.advance(Duration::seconds(1));
    assert!(queue.due_operations().await.unwrap().is_empty());

    clock.advance(Duration::seconds(1));
    assert_eq!(queue.due_operations().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn backoff_grows_exponentially_between_failures() {
    let (queue, clock) = setup().await;
    let op = enqueue_steps(&queue, "owner").await;

    let mut delays = Vec::new();
    for _ in 1..=4 {
        let failed_at = clock.now();
        let updated = queue.mark_failure(&op.id, "HTTP 503").await.unwrap();
        let next = updated.next_retry_at.unwrap();
        delays.push((next - failed_at).num_seconds());
        clock.set(next);
    }

    assert_eq!(delays, vec![2, 4, 8, 16]);
    assert!(delays.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test(flavor = "multi_thread")]
async fn fifth_failure_exhausts_the_entry() {
    let (queue, clock) = setup().await;
    let op = enqueue_steps(&queue, "owner").await;

    for attempt in 1..=5 {
        let updated = queue
            .mark_failure(&op.id, &format!("attempt {attempt}"))
            .await
            .unwrap();
        assert_eq!(updated.retry_count, attempt);
        clock.advance(Duration::minutes(5));
    }

    let stored = queue.get(&op.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OperationStatus::Failed);
    assert_eq!(stored.retry_count, 5);
    assert_eq!(stored.next_retry_at, None);
    assert_eq!(stored.last_error.as_deref(), Some("attempt 5"));

    // Terminal entries never come back
    let again = queue.mark_failure(&op.id, "late").await.unwrap();
    assert_eq!(again.retry_count, 5);
    assert_eq!(again.next_retry_at, None);
    clock.advance(Duration::days(1));
    assert!(queue.due_operations().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn mark_success_is_terminal_and_idempotent() {
    let (queue, clock) = setup().await;
    let op = enqueue_steps(&queue, "owner").await;
    clock.advance(Duration::seconds(3));

    queue.mark_success(&op.id).await.unwrap();
    queue.mark_success(&op.id).await.unwrap();

    let stored = queue.get(&op.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OperationStatus::Completed);
    assert_eq!(stored.completed_at, Some(start() + Duration::seconds(3)));
    assert_eq!(stored.next_retry_at, None);

    let after_failure = queue.mark_failure(&op.id, "stale").await.unwrap();
    assert_eq!(after_failure.status, OperationStatus::Completed);
    assert_eq!(after_failure.retry_count, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn mark_success_does_not_reopen_failed_entry() {
    let (queue, _clock) = setup().await;
    let op = enqueue_steps(&queue, "owner").await;
    queue.mark_rejected(&op.id, "unknown owner").await.unwrap();

    queue.mark_success(&op.id).await.unwrap();

    let stored = queue.get(&op.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OperationStatus::Failed);
    assert_eq!(stored.completed_at, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn mark_rejected_fails_immediately() {
    let (queue, _clock) = setup().await;
    let op = enqueue_steps(&queue, "owner").await;

    let rejected = queue.mark_rejected(&op.id, "HTTP 400").await.unwrap();
    assert_eq!(rejected.status, OperationStatus::Failed);
    assert_eq!(rejected.retry_count, 1);

    let failed = queue.failed_operations().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, op.id);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_ids_are_not_found() {
    let (queue, _clock) = setup().await;
    let missing = OperationId::new();
    assert!(matches!(
        queue.mark_success(&missing).await.unwrap_err(),
        Error::NotFound(_)
    ));
    assert!(matches!(
        queue.mark_failure(&missing, "x").await.unwrap_err(),
        Error::NotFound(_)
    ));
    assert!(queue.get(&missing).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn stats_and_clear_completed() {
    let (queue, clock) = setup().await;
    let done = enqueue_steps(&queue, "a").await;
    let waiting = enqueue_steps(&queue, "b").await;
    let broken = enqueue_steps(&queue, "c").await;
    let _due = enqueue_steps(&queue, "d").await;

    queue.mark_success(&done.id).await.unwrap();
    queue.mark_failure(&waiting.id, "offline").await.unwrap();
    queue.mark_rejected(&broken.id, "HTTP 422").await.unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(
        stats,
        QueueStats {
            pending_count: 2,
            failed_count: 1,
            completed_count: 1,
            due_count: 1,
        }
    );

    assert_eq!(queue.clear_completed().await.unwrap(), 1);
    assert_eq!(queue.clear_completed().await.unwrap(), 0);
    assert!(queue.get(&done.id).await.unwrap().is_none());

    clock.advance(Duration::minutes(1));
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.completed_count, 0);
    assert_eq!(stats.due_count, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn enqueued_entries_survive_reopen() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("nested").join("queue.db");

    let id = {
        let queue = SyncQueue::open(&path, RetryPolicy::default()).await.unwrap();
        let op = queue
            .enqueue(
                OperationType::WorkoutBatch,
                "owner-1",
                b"payload".to_vec(),
                "/v1/ingest/workout",
            )
            .await
            .unwrap();
        op.id
    };

    let reopened = SyncQueue::open(&path, RetryPolicy::default()).await.unwrap();
    let stored = reopened.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.payload, b"payload".to_vec());
    assert_eq!(stored.operation_type, OperationType::WorkoutBatch);
    assert_eq!(stored.status, OperationStatus::Pending);
}

#[tokio::test(flavor = "multi_thread")]
async fn lease_is_exclusive_until_released_or_expired() {
    let (queue, clock) = setup().await;
    let ttl = Duration::minutes(5);

    assert!(queue.try_acquire_lease("pass-a", ttl).await.unwrap());
    assert!(!queue.try_acquire_lease("pass-b", ttl).await.unwrap());
    // Renewal by the holder
    assert!(queue.try_acquire_lease("pass-a", ttl).await.unwrap());

    queue.release_lease("pass-b").await.unwrap();
    assert!(!queue.try_acquire_lease("pass-b", ttl).await.unwrap());
    queue.release_lease("pass-a").await.unwrap();
    assert!(queue.try_acquire_lease("pass-b", ttl).await.unwrap());

    clock.advance(Duration::minutes(6));
    assert!(queue.try_acquire_lease("pass-a", ttl).await.unwrap());
}
