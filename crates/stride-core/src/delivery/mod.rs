//! Delivery of queued batches to the ingestion API
//!
//! Every attempt resolves to a [`DeliveryOutcome`]. The variant alone decides
//! whether the queue schedules a retry or fails the entry; error text is only
//! carried along for diagnostics.

mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::IngestResponse;

pub use http::HttpDeliverer;

/// Why an attempt did not produce an acknowledged ingest
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Connect failure, timeout, or broken transport
    #[error("network error: {0}")]
    Network(String),
    /// The backend failed or asked us to back off
    #[error("backend error (HTTP {status}): {message}")]
    Backend { status: u16, message: String },
    /// The backend refused the batch itself
    #[error("protocol error (HTTP {status}): {message}")]
    Protocol { status: u16, message: String },
}

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The backend ingested the batch (possibly partially or as duplicates)
    Delivered(IngestResponse),
    /// Transient failure; try again later
    Retryable(DeliveryError),
    /// Permanent failure; retrying the same payload cannot succeed
    Rejected(DeliveryError),
}

/// Transport that sends one serialized batch to one endpoint
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, endpoint: &str, payload: &[u8]) -> DeliveryOutcome;
}
