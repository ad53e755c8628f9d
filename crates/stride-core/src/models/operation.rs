//! Retry queue entry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::RecordKind;

/// A unique identifier for a queue entry, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of batch carried by a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    WorkoutBatch,
    MetricBatch,
    StepBatch,
    SleepBatch,
}

impl OperationType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WorkoutBatch => "workout_batch",
            Self::MetricBatch => "metric_batch",
            Self::StepBatch => "step_batch",
            Self::SleepBatch => "sleep_batch",
        }
    }

    /// Operation type that carries batches of the given record kind
    pub const fn for_kind(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Workout => Self::WorkoutBatch,
            RecordKind::Metric => Self::MetricBatch,
            RecordKind::Step => Self::StepBatch,
            RecordKind::Sleep => Self::SleepBatch,
        }
    }

    pub const fn record_kind(self) -> RecordKind {
        match self {
            Self::WorkoutBatch => RecordKind::Workout,
            Self::MetricBatch => RecordKind::Metric,
            Self::StepBatch => RecordKind::Step,
            Self::SleepBatch => RecordKind::Sleep,
        }
    }

    /// Ingestion route that accepts this batch type
    pub fn default_endpoint(self) -> String {
        format!("/v1/ingest/{}", self.record_kind().as_str())
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workout_batch" => Ok(Self::WorkoutBatch),
            "metric_batch" => Ok(Self::MetricBatch),
            "step_batch" => Ok(Self::StepBatch),
            "sleep_batch" => Ok(Self::SleepBatch),
            other => Err(format!("unknown operation type: {other}")),
        }
    }
}

/// Lifecycle state of a queue entry.
///
/// Transitions only ever leave `Pending`; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Completed,
    Failed,
}

impl OperationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown operation status: {other}")),
        }
    }
}

/// One durable retry-queue entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Unique identifier
    pub id: OperationId,
    /// Batch type
    pub operation_type: OperationType,
    /// Account the batch belongs to
    pub owner_id: String,
    /// Serialized batch body, sent verbatim on every attempt
    pub payload: Vec<u8>,
    /// Ingestion route, relative to the API base URL
    pub endpoint: String,
    pub status: OperationStatus,
    /// Failed delivery attempts so far
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set only while pending
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Set only once completed
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncOperation {
    /// Create a new pending operation that is due immediately
    #[must_use]
    pub fn new(
        operation_type: OperationType,
        owner_id: impl Into<String>,
        payload: Vec<u8>,
        endpoint: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OperationId::new(),
            operation_type,
            owner_id: owner_id.into(),
            payload,
            endpoint: endpoint.into(),
            status: OperationStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now,
            next_retry_at: Some(now),
            completed_at: None,
        }
    }
}
