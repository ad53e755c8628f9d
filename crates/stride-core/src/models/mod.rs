//! Data models shared by the producer and the backend

mod ingest;
mod operation;
mod record;

pub use ingest::{
    IngestReport, IngestRequest, IngestResponse, Severity, ValidationIssue, ValidationResult,
};
pub use operation::{OperationId, OperationStatus, OperationType, SyncOperation};
pub use record::{BatchRecord, MetricRecord, RecordKind, SleepRecord, StepRecord, WorkoutRecord};
