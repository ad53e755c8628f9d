//! Per-record field validation and cross-field reconciliation
//!
//! Records arrive as loosely typed JSON objects so a type mismatch in one
//! field becomes a finding on that record instead of a failed batch. Errors
//! reject the record; warnings annotate it and let it through.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use stride_core::models::ValidationResult;
use stride_core::RecordKind;

const DAY_SECS: f64 = 24.0 * 60.0 * 60.0;
const LONG_SLEEP_SECS: f64 = 16.0 * 60.0 * 60.0;
const MAX_CALORIES: f64 = 10_000.0;
const HIGH_CALORIES: f64 = 5_000.0;
const HEART_RATE_RANGE: std::ops::RangeInclusive<f64> = 20.0..=250.0;
const HIGH_STEP_COUNT: i64 = 100_000;
/// Start times further ahead than this are flagged
const FUTURE_SKEW_MINUTES: i64 = 5;

/// Identity and timing of a valid record, as used by deduplication
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub origin_id: Option<String>,
    /// Metric type for metrics, empty for other kinds
    pub scope: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Checked {
    pub result: ValidationResult,
    /// Present only when the record has no errors
    pub candidate: Option<Candidate>,
}

pub fn validate(kind: RecordKind, record: &Map<String, Value>, now: DateTime<Utc>) -> Checked {
    let mut fields = Fields {
        record,
        result: ValidationResult::new(),
    };

    let origin_id = fields.optional_str("origin_id");
    fields.optional_str("source");

    let timing = match kind {
        RecordKind::Workout => workout(&mut fields),
        RecordKind::Metric => metric(&mut fields),
        RecordKind::Step => step(&mut fields),
        RecordKind::Sleep => sleep(&mut fields),
    };

    if let Some((start, ..)) = &timing {
        if *start > now + Duration::minutes(FUTURE_SKEW_MINUTES) {
            let field = if kind == RecordKind::Metric {
                "recorded_at"
            } else {
                "start_time"
            };
            fields
                .result
                .warning(field, "starts more than 5 minutes in the future");
        }
    }

    let Fields { result, .. } = fields;
    let candidate = timing
        .filter(|_| result.is_valid())
        .map(|(start, end, scope)| Candidate {
            origin_id,
            scope,
            start,
            end,
            duration_secs: end.map_or(0.0, |end| seconds_between(start, end)),
        });
    Checked { result, candidate }
}

type Timing = (DateTime<Utc>, Option<DateTime<Utc>>, String);

fn workout(fields: &mut Fields<'_>) -> Option<Timing> {
    fields.required_str("workout_type");
    let interval = fields.interval();

    if let Some((start, end)) = interval {
        let computed = seconds_between(start, end);
        if computed > DAY_SECS {
            fields
                .result
                .error("end_time", "workout lasts longer than 24 hours");
        }
        if let Some(declared) = fields.non_negative_number("duration_seconds") {
            fields.reconcile("duration_seconds", declared, computed);
        }
    } else {
        fields.non_negative_number("duration_seconds");
    }

    if let Some(calories) = fields.non_negative_number("calories") {
        if calories > MAX_CALORIES {
            fields.result.error("calories", "exceeds 10000 kcal");
        } else if calories > HIGH_CALORIES {
            fields.result.warning("calories", "unusually high (above 5000 kcal)");
        }
    }
    fields.non_negative_number("distance_meters");
    for field in ["avg_heart_rate", "max_heart_rate"] {
        if let Some(bpm) = fields.optional_number(field) {
            fields.heart_rate(field, bpm);
        }
    }

    interval.map(|(start, end)| (start, Some(end), String::new()))
}

fn metric(fields: &mut Fields<'_>) -> Option<Timing> {
    let metric_type = fields.required_str("metric_type");
    let recorded_at = fields.required_time("recorded_at");
    fields.optional_str("unit");

    let value = fields.required_number("value");
    if let (Some(value), Some(metric_type)) = (value, metric_type.as_deref()) {
        if is_heart_rate_metric(metric_type) {
            fields.heart_rate("value", value);
        }
    }

    let scope = metric_type?.to_ascii_lowercase();
    recorded_at.map(|start| (start, None, scope))
}

fn step(fields: &mut Fields<'_>) -> Option<Timing> {
    let interval = fields.interval();

    match fields.record.get("count") {
        None | Some(Value::Null) => fields.result.error("count", "missing required field"),
        Some(value) => match value.as_i64() {
            Some(count) if count < 0 => fields.result.error("count", "must not be negative"),
            Some(count) if count > HIGH_STEP_COUNT => fields
                .result
                .warning("count", "unusually high (above 100000 steps)"),
            Some(_) => {}
            None => fields.result.error("count", "expected an integer"),
        },
    }

    interval.map(|(start, end)| (start, Some(end), String::new()))
}

fn sleep(fields: &mut Fields<'_>) -> Option<Timing> {
    let interval = fields.interval();
    fields.optional_str("stage");
    let declared_minutes = fields.non_negative_number("duration_minutes");

    if let Some((start, end)) = interval {
        let computed = seconds_between(start, end);
        if computed > DAY_SECS {
            fields
                .result
                .error("end_time", "sleep lasts longer than 24 hours");
        } else if computed > LONG_SLEEP_SECS {
            fields
                .result
                .warning("end_time", "unusually long sleep (above 16 hours)");
        }
        if let Some(minutes) = declared_minutes {
            fields.reconcile("duration_minutes", minutes * 60.0, computed);
        }
    }

    interval.map(|(start, end)| (start, Some(end), String::new()))
}

fn is_heart_rate_metric(metric_type: &str) -> bool {
    let metric_type = metric_type.to_ascii_lowercase();
    metric_type.contains("heart_rate") || metric_type == "pulse" || metric_type == "bpm"
}

#[allow(clippy::cast_precision_loss)]
fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1_000.0
}

struct Fields<'a> {
    record: &'a Map<String, Value>,
    result: ValidationResult,
}

impl Fields<'_> {
    fn required_str(&mut self, name: &str) -> Option<String> {
        match self.record.get(name) {
            None | Some(Value::Null) => {
                self.result.error(name, "missing required field");
                None
            }
            Some(Value::String(value)) if !value.trim().is_empty() => {
                Some(value.trim().to_string())
            }
            Some(_) => {
                self.result.error(name, "expected a non-empty string");
                None
            }
        }
    }

    fn optional_str(&mut self, name: &str) -> Option<String> {
        match self.record.get(name) {
            None | Some(Value::Null) => None,
            Some(Value::String(value)) if !value.trim().is_empty() => {
                Some(value.trim().to_string())
            }
            Some(_) => {
                self.result.error(name, "expected a non-empty string");
                None
            }
        }
    }

    fn required_time(&mut self, name: &str) -> Option<DateTime<Utc>> {
        let raw = self.required_str(name)?;
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(parsed) => Some(parsed.with_timezone(&Utc)),
            Err(_) => {
                self.result.error(name, "expected an RFC 3339 timestamp");
                None
            }
        }
    }

    /// `start_time`/`end_time` pair; the end must come after the start
    fn interval(&mut self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.required_time("start_time");
        let end = self.required_time("end_time");
        let (start, end) = (start?, end?);
        if end <= start {
            self.result.error("end_time", "must be after start_time");
            return None;
        }
        Some((start, end))
    }

    fn optional_number(&mut self, name: &str) -> Option<f64> {
        match self.record.get(name) {
            None | Some(Value::Null) => None,
            Some(value) => match value.as_f64() {
                Some(number) if number.is_finite() => Some(number),
                _ => {
                    self.result.error(name, "expected a finite number");
                    None
                }
            },
        }
    }

    fn required_number(&mut self, name: &str) -> Option<f64> {
        if matches!(self.record.get(name), None | Some(Value::Null)) {
            self.result.error(name, "missing required field");
            return None;
        }
        self.optional_number(name)
    }

    fn non_negative_number(&mut self, name: &str) -> Option<f64> {
        let number = self.optional_number(name)?;
        if number < 0.0 {
            self.result.error(name, "must not be negative");
            return None;
        }
        Some(number)
    }

    fn heart_rate(&mut self, name: &str, bpm: f64) {
        if !HEART_RATE_RANGE.contains(&bpm) {
            self.result
                .warning(name, format!("{bpm} bpm is outside 20-250 bpm"));
        }
    }

    /// Flag a declared duration more than 10% away from the computed one
    fn reconcile(&mut self, name: &str, declared_secs: f64, computed_secs: f64) {
        if (declared_secs - computed_secs).abs() > computed_secs / 10.0 {
            self.result.warning(
                name,
                format!(
                    "declared {declared_secs:.0}s differs from computed {computed_secs:.0}s by more than 10%"
                ),
            );
        }
    }
}
