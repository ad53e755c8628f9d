//! Producer-side record models
//!
//! These are the shapes an origin producer serializes into
//! [`IngestRequest::records`](super::IngestRequest). The backend reads the
//! same fields back out of loosely typed JSON so that it can report field-level
//! type errors instead of failing the whole batch on one bad record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Family of records carried by a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Workout,
    Metric,
    Step,
    Sleep,
}

impl RecordKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Workout => "workout",
            Self::Metric => "metric",
            Self::Step => "step",
            Self::Sleep => "sleep",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "workout" | "workouts" => Ok(Self::Workout),
            "metric" | "metrics" => Ok(Self::Metric),
            "step" | "steps" => Ok(Self::Step),
            "sleep" => Ok(Self::Sleep),
            other => Err(format!("unknown record kind: {other}")),
        }
    }
}

/// A typed record that can be sent in a batch
pub trait BatchRecord: Serialize {
    const KIND: RecordKind;
}

/// A completed workout session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    pub workout_type: String,
    /// RFC 3339
    pub start_time: String,
    /// RFC 3339
    pub end_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_heart_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_heart_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl BatchRecord for WorkoutRecord {
    const KIND: RecordKind = RecordKind::Workout;
}

/// A point-in-time measurement (heart rate, weight, HRV, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    pub metric_type: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// RFC 3339
    pub recorded_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl BatchRecord for MetricRecord {
    const KIND: RecordKind = RecordKind::Metric;
}

/// Step count over an interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    /// RFC 3339
    pub start_time: String,
    /// RFC 3339
    pub end_time: String,
    pub count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl BatchRecord for StepRecord {
    const KIND: RecordKind = RecordKind::Step;
}

/// A sleep session or sleep stage interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    /// RFC 3339
    pub start_time: String,
    /// RFC 3339
    pub end_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl BatchRecord for SleepRecord {
    const KIND: RecordKind = RecordKind::Sleep;
}
