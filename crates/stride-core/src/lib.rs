//! stride-core - Core library for Stride
//!
//! This crate contains the record and queue models shared by the producer and
//! the backend, the durable client-side retry queue, the retry scheduler, and
//! the HTTP delivery client.

pub mod clock;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod models;
pub mod queue;
pub mod scheduler;
pub mod submit;
pub mod util;

pub use error::{Error, Result};
pub use models::{
    IngestReport, IngestRequest, IngestResponse, OperationId, OperationStatus, OperationType,
    RecordKind, SyncOperation,
};
