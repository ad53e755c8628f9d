//! Ingestion engine
//!
//! A batch goes through protocol checks, then per-record validation,
//! reconciliation and deduplication. Every decision is made before the store
//! transaction opens; the transaction itself only inserts the accepted records
//! together with their audit rows. Warnings count toward the report only for
//! records that were actually inserted.

mod dedup;
mod locks;
mod validation;

use std::sync::Arc;

use serde_json::{Map, Value};
use stride_core::clock::Clock;
use stride_core::util::owner_fingerprint;
use stride_core::{IngestReport, IngestRequest, RecordKind};
use thiserror::Error;

use crate::store::{AuditEntry, AuditEvent, NewRecord, Store, StoreError};

use locks::OwnerLocks;

pub const DEFAULT_MAX_BATCH_RECORDS: usize = 5_000;

/// Why a whole batch was refused
#[derive(Debug, Error)]
pub enum IngestError {
    /// The batch itself is malformed; nothing was looked at or stored
    #[error("{0}")]
    Protocol(String),
    #[error("unknown owner")]
    UnknownOwner,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct IngestionEngine {
    store: Arc<Store>,
    locks: OwnerLocks,
    clock: Arc<dyn Clock>,
    max_batch_records: usize,
}

impl IngestionEngine {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, max_batch_records: usize) -> Self {
        Self {
            store,
            locks: OwnerLocks::new(),
            clock,
            max_batch_records,
        }
    }

    pub const fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Ingest one batch of `kind` records
    pub async fn ingest(
        &self,
        kind: RecordKind,
        request: &IngestRequest,
    ) -> Result<IngestReport, IngestError> {
        let owner_id = request.owner_id.trim();
        let records = self.check_protocol(owner_id, &request.records)?;
        if !self.store.owner_exists(owner_id).await? {
            return Err(IngestError::UnknownOwner);
        }

        let _owner_guard = self.locks.acquire(owner_id).await;
        let now = self.clock.now();
        let mut report = IngestReport::new(records.len());

        let checked: Vec<_> = records
            .iter()
            .map(|record| validation::validate(kind, record, now))
            .collect();
        let origin_ids: Vec<String> = checked
            .iter()
            .filter_map(|checked| checked.candidate.as_ref()?.origin_id.clone())
            .collect();
        let stored = self
            .store
            .origin_ids_present(owner_id, kind, &origin_ids)
            .await?;

        let mut batch = dedup::BatchDedup::new(stored);
        let mut inserts = Vec::new();
        let mut audit = Vec::new();

        for (index, (record, checked)) in records.iter().zip(checked).enumerate() {
            let validation::Checked { result, candidate } = checked;
            let Some(candidate) = candidate else {
                report.errors_count += 1;
                report
                    .errors
                    .push(format!("record {index}: {}", result.error_summary()));
                continue;
            };

            let duplicate = match candidate.origin_id.as_deref() {
                Some(origin_id) => batch.exact(origin_id),
                None => match batch.fuzzy_in_batch(&candidate) {
                    Some(found) => Some(found),
                    None => {
                        let nearby = self
                            .store
                            .records_near(
                                owner_id,
                                kind,
                                &candidate.scope,
                                candidate.start,
                                chrono::Duration::seconds(dedup::FUZZY_WINDOW_SECS),
                            )
                            .await?;
                        dedup::closest_stored(&candidate, &nearby)
                    }
                },
            };

            if let Some(found) = duplicate {
                report.duplicates_skipped += 1;
                audit.push(AuditEntry {
                    record_index: index,
                    origin_id: candidate.origin_id.clone(),
                    event: AuditEvent::Duplicate,
                    field: None,
                    message: found.describe(),
                    matched_record_id: found.record_id(),
                });
                continue;
            }

            batch.accept(index, &candidate);
            inserts.push(NewRecord {
                record_index: index,
                origin_id: candidate.origin_id,
                scope: candidate.scope,
                start: candidate.start,
                end: candidate.end,
                duration_secs: candidate.duration_secs,
                payload: Value::Object((*record).clone()),
                warnings: result.warnings,
            });
        }

        let summary = self
            .store
            .insert_batch(owner_id, kind, &inserts, &audit)
            .await?;
        report.inserted = summary.inserted;
        report.duplicates_skipped += summary.backstop_duplicates;
        report.warnings_count = summary.warnings;

        tracing::info!(
            owner = owner_fingerprint(owner_id),
            kind = kind.as_str(),
            received = report.received,
            inserted = report.inserted,
            duplicates_skipped = report.duplicates_skipped,
            warnings = report.warnings_count,
            errors = report.errors_count,
            "Ingested batch"
        );
        Ok(report)
    }

    fn check_protocol<'a>(
        &self,
        owner_id: &str,
        records: &'a [Value],
    ) -> Result<Vec<&'a Map<String, Value>>, IngestError> {
        if owner_id.is_empty() {
            return Err(IngestError::Protocol("owner_id must not be empty".into()));
        }
        if records.len() > self.max_batch_records {
            return Err(IngestError::Protocol(format!(
                "batch of {} records exceeds the limit of {}",
                records.len(),
                self.max_batch_records
            )));
        }

        records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let object = record.as_object().ok_or_else(|| {
                    IngestError::Protocol(format!("record {index} is not a JSON object"))
                })?;
                match object.get("owner_id") {
                    None | Some(Value::Null) => Ok(object),
                    Some(Value::String(owner)) if owner.trim() == owner_id => Ok(object),
                    Some(_) => Err(IngestError::Protocol(
                        "batch references more than one owner".into(),
                    )),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests;
