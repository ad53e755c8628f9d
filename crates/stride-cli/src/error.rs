use std::io;

use stride_core::config::ConfigError;
use stride_core::delivery::DeliveryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] stride_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Owner id cannot be empty")]
    EmptyOwner,
    #[error("Batch must be a JSON array of record objects")]
    InvalidBatch,
    #[error("Batch is empty")]
    EmptyBatch,
    #[error("Backend refused the batch: {0}")]
    Refused(String),
}
