use stride_core::config::ClientConfig;
use stride_core::RecordKind;

use crate::commands::common::http_deliverer;
use crate::error::CliError;

pub async fn run_lookup(
    config: &ClientConfig,
    kind: RecordKind,
    owner_id: &str,
    origin_ids: &[String],
) -> Result<(), CliError> {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        return Err(CliError::EmptyOwner);
    }

    let records = http_deliverer(config)?
        .lookup_existing(kind, owner_id, origin_ids)
        .await;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

pub async fn run_delete(
    config: &ClientConfig,
    kind: RecordKind,
    owner_id: &str,
    origin_ids: &[String],
) -> Result<(), CliError> {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        return Err(CliError::EmptyOwner);
    }

    let deleted = http_deliverer(config)?
        .delete_by_origin_ids(kind, owner_id, origin_ids)
        .await?;
    println!("Deleted {deleted} {kind} records");
    Ok(())
}
