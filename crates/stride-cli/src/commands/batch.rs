use std::path::Path;

use stride_core::config::ClientConfig;
use stride_core::submit::{BatchSubmitter, SubmitOutcome};
use stride_core::{OperationType, RecordKind};

use crate::commands::common::{http_deliverer, open_queue, parse_batch, read_input};
use crate::error::CliError;

pub async fn run_enqueue(
    config: &ClientConfig,
    kind: RecordKind,
    owner_id: &str,
    file: Option<&Path>,
) -> Result<(), CliError> {
    let request = parse_batch(owner_id, &read_input(file)?)?;
    let payload = serde_json::to_vec(&request)?;
    let operation_type = OperationType::for_kind(kind);

    let queue = open_queue(config).await?;
    let operation = queue
        .enqueue(
            operation_type,
            &request.owner_id,
            payload,
            &operation_type.default_endpoint(),
        )
        .await?;

    println!("{}", operation.id);
    Ok(())
}

pub async fn run_submit(
    config: &ClientConfig,
    kind: RecordKind,
    owner_id: &str,
    file: Option<&Path>,
    as_json: bool,
) -> Result<(), CliError> {
    let request = parse_batch(owner_id, &read_input(file)?)?;
    let payload = serde_json::to_vec(&request)?;
    let operation_type = OperationType::for_kind(kind);

    let submitter = BatchSubmitter::new(open_queue(config).await?, http_deliverer(config)?);
    let outcome = submitter
        .submit_payload(
            operation_type,
            &request.owner_id,
            payload,
            &operation_type.default_endpoint(),
        )
        .await?;

    match outcome {
        SubmitOutcome::Delivered(response) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!(
                    "Delivered: {} received, {} inserted, {} duplicates, {} warnings, {} errors",
                    response.count_received,
                    response.count_inserted,
                    response.duplicates_skipped,
                    response.warnings_count,
                    response.errors_count
                );
                for error in response.errors.unwrap_or_default() {
                    println!("  {error}");
                }
            }
        }
        SubmitOutcome::Queued(id) => {
            println!("Backend unreachable; queued as {id}");
        }
        SubmitOutcome::Rejected(id) => {
            return Err(CliError::Refused(format!(
                "kept as failed entry {id}; see `stride failed`"
            )));
        }
    }

    Ok(())
}
