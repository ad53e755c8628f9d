//! Direct submission with queue fallback
//!
//! A producer hands a batch to [`BatchSubmitter`]. The batch is delivered
//! immediately when the backend is reachable; otherwise it is persisted in the
//! [`SyncQueue`] so the retry scheduler can pick it up later. A batch is never
//! dropped: the backend either acknowledged it or a queue entry exists.

use std::sync::Arc;

use crate::delivery::{Deliverer, DeliveryOutcome};
use crate::error::{Error, Result};
use crate::models::{
    BatchRecord, IngestRequest, IngestResponse, OperationId, OperationType,
};
use crate::queue::SyncQueue;
use crate::util::owner_fingerprint;

/// What happened to a submitted batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The backend acknowledged the batch
    Delivered(IngestResponse),
    /// Delivery failed transiently; the batch waits in the queue
    Queued(OperationId),
    /// The backend refused the batch; it is kept as a failed queue entry
    Rejected(OperationId),
}

impl SubmitOutcome {
    pub const fn operation_id(&self) -> Option<&OperationId> {
        match self {
            Self::Delivered(_) => None,
            Self::Queued(id) | Self::Rejected(id) => Some(id),
        }
    }
}

#[derive(Clone)]
pub struct BatchSubmitter {
    queue: SyncQueue,
    deliverer: Arc<dyn Deliverer>,
}

impl BatchSubmitter {
    pub fn new(queue: SyncQueue, deliverer: Arc<dyn Deliverer>) -> Self {
        Self { queue, deliverer }
    }

    /// Serialize typed records into one batch and submit it
    pub async fn submit<R: BatchRecord>(
        &self,
        owner_id: &str,
        records: &[R],
    ) -> Result<SubmitOutcome> {
        let request = IngestRequest::from_records(owner_id, records)?;
        let payload = serde_json::to_vec(&request)?;
        let operation_type = OperationType::for_kind(R::KIND);
        self.submit_payload(
            operation_type,
            owner_id,
            payload,
            &operation_type.default_endpoint(),
        )
        .await
    }

    /// Submit an already serialized batch
    pub async fn submit_payload(
        &self,
        operation_type: OperationType,
        owner_id: &str,
        payload: Vec<u8>,
        endpoint: &str,
    ) -> Result<SubmitOutcome> {
        if owner_id.trim().is_empty() {
            return Err(Error::InvalidInput("owner id must not be empty".into()));
        }

        match self.deliverer.deliver(endpoint, &payload).await {
            DeliveryOutcome::Delivered(response) => {
                tracing::info!(
                    owner = owner_fingerprint(owner_id),
                    operation_type = %operation_type,
                    inserted = response.count_inserted,
                    duplicates_skipped = response.duplicates_skipped,
                    "Delivered batch directly"
                );
                Ok(SubmitOutcome::Delivered(response))
            }
            DeliveryOutcome::Retryable(error) => {
                let operation = self
                    .queue
                    .enqueue(operation_type, owner_id, payload, endpoint)
                    .await?;
                tracing::warn!(
                    operation = %operation.id,
                    "Direct delivery failed; batch queued for retry: {error}"
                );
                Ok(SubmitOutcome::Queued(operation.id))
            }
            DeliveryOutcome::Rejected(error) => {
                let operation = self
                    .queue
                    .enqueue(operation_type, owner_id, payload, endpoint)
                    .await?;
                self.queue
                    .mark_rejected(&operation.id, &error.to_string())
                    .await?;
                tracing::warn!(
                    operation = %operation.id,
                    "Backend refused batch; kept as failed entry: {error}"
                );
                Ok(SubmitOutcome::Rejected(operation.id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::delivery::DeliveryError;
    use crate::models::{OperationStatus, StepRecord};
    use crate::queue::RetryPolicy;

    struct FixedDeliverer {
        outcome: DeliveryOutcome,
        requests: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl FixedDeliverer {
        fn new(outcome: DeliveryOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Deliverer for FixedDeliverer {
        async fn deliver(&self, endpoint: &str, payload: &[u8]) -> DeliveryOutcome {
            self.requests
                .lock()
                .unwrap()
                .push((endpoint.to_string(), payload.to_vec()));
            self.outcome.clone()
        }
    }

    fn steps() -> Vec<StepRecord> {
        vec![StepRecord {
            origin_id: Some("steps-2026-10-01".to_string()),
            start_time: "2026-10-01T00:00:00Z".to_string(),
            end_time: "2026-10-02T00:00:00Z".to_string(),
            count: 8_412,
            source: Some("watch".to_string()),
        }]
    }

    async fn queue() -> SyncQueue {
        SyncQueue::open_in_memory(RetryPolicy::default())
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delivered_batches_are_not_queued() {
        let response = IngestResponse {
            success: true,
            count_received: 1,
            count_inserted: 1,
            duplicates_skipped: 0,
            warnings_count: 0,
            errors_count: 0,
            errors: None,
        };
        let deliverer = FixedDeliverer::new(DeliveryOutcome::Delivered(response.clone()));
        let queue = queue().await;
        let submitter = BatchSubmitter::new(queue.clone(), deliverer.clone());

        let outcome = submitter.submit("owner-1", &steps()).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Delivered(response));
        assert_eq!(queue.stats().await.unwrap().pending_count, 0);

        let requests = deliverer.requests.lock().unwrap();
        assert_eq!(requests[0].0, "/v1/ingest/step");
        let request: IngestRequest = serde_json::from_slice(&requests[0].1).unwrap();
        assert_eq!(request.owner_id, "owner-1");
        assert_eq!(request.records.len(), 1);
        assert_eq!(request.records[0]["count"], 8_412);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_backend_queues_the_batch() {
        let deliverer = FixedDeliverer::new(DeliveryOutcome::Retryable(DeliveryError::Network(
            "connection refused".to_string(),
        )));
        let queue = queue().await;
        let submitter = BatchSubmitter::new(queue.clone(), deliverer.clone());

        let outcome = submitter.submit("owner-1", &steps()).await.unwrap();
        let SubmitOutcome::Queued(id) = outcome else {
            panic!("expected queued outcome");
        };

        let stored = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, OperationStatus::Pending);
        assert_eq!(stored.retry_count, 0);
        assert_eq!(stored.operation_type, OperationType::StepBatch);
        assert_eq!(stored.payload, deliverer.requests.lock().unwrap()[0].1);
        assert_eq!(queue.due_operations().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refused_batch_is_kept_as_failed_entry() {
        let deliverer = FixedDeliverer::new(DeliveryOutcome::Rejected(DeliveryError::Protocol {
            status: 404,
            message: "unknown owner".to_string(),
        }));
        let queue = queue().await;
        let submitter = BatchSubmitter::new(queue.clone(), deliverer);

        let outcome = submitter.submit("ghost", &steps()).await.unwrap();
        let id = outcome.operation_id().copied().unwrap();
        assert!(matches!(outcome, SubmitOutcome::Rejected(_)));

        let stored = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, OperationStatus::Failed);
        assert!(stored.last_error.unwrap().contains("unknown owner"));
        assert_eq!(queue.failed_operations().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_owner_is_refused_before_delivery() {
        let deliverer = FixedDeliverer::new(DeliveryOutcome::Retryable(DeliveryError::Network(
            "unused".to_string(),
        )));
        let submitter = BatchSubmitter::new(queue().await, deliverer.clone());

        let error = submitter.submit("  ", &steps()).await.unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert!(deliverer.requests.lock().unwrap().is_empty());
    }
}
