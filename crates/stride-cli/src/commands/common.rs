use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use stride_core::config::{normalize_base_url, ClientConfig};
use stride_core::delivery::HttpDeliverer;
use stride_core::queue::SyncQueue;
use stride_core::{IngestRequest, SyncOperation};

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct OperationItem {
    pub id: String,
    pub operation_type: String,
    pub owner_id: String,
    pub endpoint: String,
    pub status: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub next_retry_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Client config from the environment with the CLI's global flags applied
pub fn resolve_config(
    queue_path: Option<PathBuf>,
    api_url: Option<String>,
) -> Result<ClientConfig, CliError> {
    let mut config = ClientConfig::from_env()?;
    apply_overrides(&mut config, queue_path, api_url)?;
    Ok(config)
}

pub fn apply_overrides(
    config: &mut ClientConfig,
    queue_path: Option<PathBuf>,
    api_url: Option<String>,
) -> Result<(), CliError> {
    if let Some(path) = queue_path {
        config.queue_path = Some(path);
    }
    if let Some(url) = api_url {
        config.api_base_url = normalize_base_url(url)?;
    }
    Ok(())
}

pub fn resolve_queue_path(config: &ClientConfig) -> PathBuf {
    config.queue_path.clone().unwrap_or_else(default_queue_path)
}

fn default_queue_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stride")
        .join("queue.db")
}

pub async fn open_queue(config: &ClientConfig) -> Result<SyncQueue, CliError> {
    let path = resolve_queue_path(config);
    tracing::debug!(path = %path.display(), "Opening retry queue");
    Ok(SyncQueue::open(path, config.retry_policy()).await?)
}

pub fn http_deliverer(config: &ClientConfig) -> Result<Arc<HttpDeliverer>, CliError> {
    Ok(Arc::new(HttpDeliverer::new(config)?))
}

/// Read a batch file, or stdin when no path is given
pub fn read_input(path: Option<&Path>) -> Result<String, CliError> {
    if let Some(path) = path {
        return Ok(std::fs::read_to_string(path)?);
    }
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}

/// Wrap a JSON array of record objects into a request for `owner_id`
pub fn parse_batch(owner_id: &str, raw: &str) -> Result<IngestRequest, CliError> {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        return Err(CliError::EmptyOwner);
    }

    let serde_json::Value::Array(records) = serde_json::from_str(raw)? else {
        return Err(CliError::InvalidBatch);
    };
    if records.is_empty() {
        return Err(CliError::EmptyBatch);
    }
    if !records.iter().all(serde_json::Value::is_object) {
        return Err(CliError::InvalidBatch);
    }

    Ok(IngestRequest {
        owner_id: owner_id.to_string(),
        records,
    })
}

pub fn operation_to_item(operation: &SyncOperation, include_payload: bool) -> OperationItem {
    OperationItem {
        id: operation.id.to_string(),
        operation_type: operation.operation_type.to_string(),
        owner_id: operation.owner_id.clone(),
        endpoint: operation.endpoint.clone(),
        status: operation.status.to_string(),
        retry_count: operation.retry_count,
        last_error: operation.last_error.clone(),
        created_at: format_timestamp(operation.created_at),
        next_retry_at: operation.next_retry_at.map(format_timestamp),
        payload: include_payload.then(|| payload_value(&operation.payload)),
    }
}

/// Stored payloads are JSON; anything else is exported as text
fn payload_value(payload: &[u8]) -> serde_json::Value {
    serde_json::from_slice(payload).unwrap_or_else(|_| {
        serde_json::Value::String(String::from_utf8_lossy(payload).into_owned())
    })
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn format_operation_lines(operations: &[SyncOperation], now: DateTime<Utc>) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            let error = operation.last_error.as_deref().unwrap_or("-");
            format!(
                "{}  {:<14}  retries={}  {:>8}  {}",
                operation.id,
                operation.operation_type,
                operation.retry_count,
                format_relative_time(operation.created_at, now),
                error
            )
        })
        .collect()
}

pub fn format_relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(timestamp).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
