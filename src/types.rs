//! Core types for the import pipeline
//!
//! This module defines the data that flows through each stage: raw records
//! borrowed from the parser, normalized data points, the persisted canonical
//! day record, and the events and summary reported to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Canonical metric names that receive special handling
pub mod metric {
    pub const STEP_COUNT: &str = "step-count";
    pub const HEART_RATE: &str = "heart-rate";
    pub const HEART_RATE_VARIABILITY: &str = "heart-rate-variability";
    pub const SLEEP_ANALYSIS: &str = "sleep-analysis";
}

/// Sleep stage classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SleepStage {
    Deep,
    Rem,
    Core,
    Awake,
    InBed,
    Asleep,
    Unknown,
}

/// One leaf sample record as it appears in the archive.
///
/// Borrows from the parser's attribute map and lives only while that element
/// is being normalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRecord<'a> {
    pub record_type: &'a str,
    pub value: Option<&'a str>,
    pub start: &'a str,
    pub end: Option<&'a str>,
    pub unit: Option<&'a str>,
    pub source: Option<&'a str>,
}

/// Numeric sample (step counts, energy, heart rate, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantitySample {
    /// Start timestamp exactly as written in the archive; the dedup key
    pub date: String,
    pub qty: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Interval end, kept for heart-rate samples only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

/// One sleep interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepSample {
    pub date: String,
    pub stage: SleepStage,
    pub duration_hours: f64,
}

/// Per-day sleep summary produced by aggregation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepSummary {
    pub date: String,
    /// deep + rem + core; awake, in-bed and unstaged time are informational
    pub total_sleep: f64,
    pub deep: f64,
    pub rem: f64,
    pub core: f64,
    pub awake: f64,
    pub in_bed: f64,
    pub asleep: f64,
}

/// Canonical per-sample data point.
///
/// Variant order matters for deserialization: the most specific shape is
/// tried first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataPoint {
    SleepSummary(SleepSummary),
    Sleep(SleepSample),
    Quantity(QuantitySample),
}

impl DataPoint {
    /// Timestamp used to deduplicate points within one metric
    pub fn date(&self) -> &str {
        match self {
            DataPoint::SleepSummary(s) => &s.date,
            DataPoint::Sleep(s) => &s.date,
            DataPoint::Quantity(q) => &q.date,
        }
    }

    pub fn qty(&self) -> Option<f64> {
        match self {
            DataPoint::Quantity(q) => Some(q.qty),
            _ => None,
        }
    }
}

/// Output of the record normalizer
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub metric: String,
    /// Calendar day (YYYY-MM-DD) of the start timestamp
    pub date_key: String,
    pub point: DataPoint,
    /// A negative sleep duration was clamped to zero
    pub duration_clamped: bool,
}

/// Canonical day record, the persisted unit of the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    pub date: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, Vec<DataPoint>>,
}

impl DayRecord {
    pub fn empty(date: &str) -> Self {
        Self {
            date: date.to_string(),
            metrics: BTreeMap::new(),
        }
    }

    /// Total number of points across all metrics
    pub fn point_count(&self) -> usize {
        self.metrics.values().map(Vec::len).sum()
    }
}

/// Externally observable pipeline events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ImportEvent {
    Progress { processed: u64 },
    Complete { days: usize, records: u64 },
}

/// Final report of one import job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    pub job_id: Uuid,
    /// Dates drained and durably merged
    pub days: usize,
    /// Leaf records scanned, including rejected ones
    pub records: u64,
    /// New points appended (or summaries replaced) in the store
    pub points_stored: usize,
    pub skipped_records: u64,
    pub malformed_fragments: u64,
    pub clamped_durations: u64,
    /// Aggregated sums that overflowed and were clamped to `f64::MAX`
    #[serde(default)]
    pub clamped_totals: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
