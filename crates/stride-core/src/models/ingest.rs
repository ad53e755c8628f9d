//! Ingestion wire types and per-record validation results

use serde::{Deserialize, Serialize};

use super::BatchRecord;

/// One batch submitted to an ingestion route.
///
/// Every record belongs to `owner_id`. Records may repeat the owner in an
/// `owner_id` field, in which case it must match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub owner_id: String,
    #[serde(default)]
    pub records: Vec<serde_json::Value>,
}

impl IngestRequest {
    /// Build a request from typed records
    pub fn from_records<R: BatchRecord>(
        owner_id: impl Into<String>,
        records: &[R],
    ) -> serde_json::Result<Self> {
        let records = records
            .iter()
            .map(serde_json::to_value)
            .collect::<serde_json::Result<Vec<_>>>()?;
        Ok(Self {
            owner_id: owner_id.into(),
            records,
        })
    }
}

/// Severity of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The record is rejected and not inserted
    Error,
    /// The record is accepted and annotated
    Warning,
}

/// One validation finding for one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub severity: Severity,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Findings for a single record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field: field.into(),
            severity: Severity::Error,
            message: message.into(),
        });
    }

    pub fn warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            field: field.into(),
            severity: Severity::Warning,
            message: message.into(),
        });
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Error messages joined into one line
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Outcome of ingesting one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub received: usize,
    pub inserted: usize,
    pub duplicates_skipped: usize,
    pub warnings_count: usize,
    pub errors_count: usize,
    pub errors: Vec<String>,
}

impl IngestReport {
    pub fn new(received: usize) -> Self {
        Self {
            received,
            ..Self::default()
        }
    }

    /// A batch fails only when every record it carried failed validation
    pub const fn is_success(&self) -> bool {
        self.received == 0 || self.errors_count < self.received
    }
}

/// JSON body returned by the ingestion routes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub count_received: usize,
    pub count_inserted: usize,
    pub duplicates_skipped: usize,
    pub warnings_count: usize,
    pub errors_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl IngestResponse {
    /// Response for a batch rejected before any record was looked at
    pub fn rejected(received: usize, message: impl Into<String>) -> Self {
        Self {
            success: false,
            count_received: received,
            count_inserted: 0,
            duplicates_skipped: 0,
            warnings_count: 0,
            errors_count: received,
            errors: Some(vec![message.into()]),
        }
    }
}

impl From<&IngestReport> for IngestResponse {
    fn from(report: &IngestReport) -> Self {
        Self {
            success: report.is_success(),
            count_received: report.received,
            count_inserted: report.inserted,
            duplicates_skipped: report.duplicates_skipped,
            warnings_count: report.warnings_count,
            errors_count: report.errors_count,
            errors: if report.errors.is_empty() {
                None
            } else {
                Some(report.errors.clone())
            },
        }
    }
}
