//! Duplicate detection
//!
//! Records carrying an origin id are matched exactly on
//! `(owner, kind, origin_id)`. Records without one are matched fuzzily: same
//! owner, kind and scope, a start time within [`FUZZY_WINDOW_SECS`], and a
//! duration within [`duration_tolerance_secs`] of the matched record. Records
//! accepted earlier in the same batch take part in both checks.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::validation::Candidate;
use crate::store::NearbyRecord;

pub const FUZZY_WINDOW_SECS: i64 = 120;
const MIN_DURATION_TOLERANCE_SECS: f64 = 10.0;

/// Allowed duration difference against a record lasting `matched_secs`
pub fn duration_tolerance_secs(matched_secs: f64) -> f64 {
    (matched_secs / 10.0).max(MIN_DURATION_TOLERANCE_SECS)
}

pub fn is_fuzzy_match(
    candidate_start: DateTime<Utc>,
    candidate_secs: f64,
    existing_start: DateTime<Utc>,
    existing_secs: f64,
) -> bool {
    let offset_ms = (candidate_start - existing_start).num_milliseconds().abs();
    offset_ms <= FUZZY_WINDOW_SECS * 1_000
        && (candidate_secs - existing_secs).abs() <= duration_tolerance_secs(existing_secs)
}

/// What a duplicate was matched against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    /// A record already in the store
    Stored { record_id: String, exact: bool },
    /// A record accepted earlier in the same batch
    InBatch { record_index: usize, exact: bool },
}

impl Match {
    pub fn record_id(&self) -> Option<String> {
        match self {
            Self::Stored { record_id, .. } => Some(record_id.clone()),
            Self::InBatch { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Stored {
                record_id,
                exact: true,
            } => format!("origin id already stored as record {record_id}"),
            Self::Stored {
                record_id,
                exact: false,
            } => format!("matches stored record {record_id} by start time and duration"),
            Self::InBatch {
                record_index,
                exact: true,
            } => format!("origin id repeats record {record_index} of this batch"),
            Self::InBatch {
                record_index,
                exact: false,
            } => format!("matches record {record_index} of this batch by start time and duration"),
        }
    }
}

#[derive(Debug)]
struct Accepted {
    record_index: usize,
    scope: String,
    start: DateTime<Utc>,
    duration_secs: f64,
}

/// Dedup state for one batch
#[derive(Debug, Default)]
pub struct BatchDedup {
    stored_origins: HashMap<String, String>,
    batch_origins: HashMap<String, usize>,
    accepted: Vec<Accepted>,
}

impl BatchDedup {
    /// `stored` holds `(origin_id, record_id)` pairs already in the store
    pub fn new(stored: Vec<(String, String)>) -> Self {
        Self {
            stored_origins: stored.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn exact(&self, origin_id: &str) -> Option<Match> {
        if let Some(record_id) = self.stored_origins.get(origin_id) {
            return Some(Match::Stored {
                record_id: record_id.clone(),
                exact: true,
            });
        }
        self.batch_origins
            .get(origin_id)
            .map(|&record_index| Match::InBatch {
                record_index,
                exact: true,
            })
    }

    pub fn fuzzy_in_batch(&self, candidate: &Candidate) -> Option<Match> {
        self.accepted
            .iter()
            .filter(|accepted| accepted.scope == candidate.scope)
            .find(|accepted| {
                is_fuzzy_match(
                    candidate.start,
                    candidate.duration_secs,
                    accepted.start,
                    accepted.duration_secs,
                )
            })
            .map(|accepted| Match::InBatch {
                record_index: accepted.record_index,
                exact: false,
            })
    }

    pub fn accept(&mut self, record_index: usize, candidate: &Candidate) {
        if let Some(origin_id) = &candidate.origin_id {
            self.batch_origins.insert(origin_id.clone(), record_index);
        }
        self.accepted.push(Accepted {
            record_index,
            scope: candidate.scope.clone(),
            start: candidate.start,
            duration_secs: candidate.duration_secs,
        });
    }
}

/// The stored record closest in start time that fuzzily matches `candidate`
pub fn closest_stored(candidate: &Candidate, nearby: &[NearbyRecord]) -> Option<Match> {
    nearby
        .iter()
        .filter(|existing| {
            is_fuzzy_match(
                candidate.start,
                candidate.duration_secs,
                existing.start,
                existing.duration_secs,
            )
        })
        .min_by_key(|existing| (candidate.start - existing.start).num_milliseconds().abs())
        .map(|existing| Match::Stored {
            record_id: existing.id.clone(),
            exact: false,
        })
}
