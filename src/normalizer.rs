//! Record normalization
//!
//! Maps one scanned element onto a canonical `(metric, date key, data point)`
//! triple. Normalization is a pure function of the element's attributes:
//! - Type identifiers are resolved through the static metric table
//! - The date key is the calendar day written in the start timestamp, in the
//!   timestamp's own offset
//! - Numeric values must be finite; sleep intervals become stage durations

use chrono::{DateTime, FixedOffset, NaiveDate};
use log::warn;

use crate::error::SkipReason;
use crate::parser::Element;
use crate::tables;
use crate::types::{metric, DataPoint, NormalizedRecord, QuantitySample, RawRecord, SleepSample};

/// Tag name of leaf sample records
pub const RECORD_ELEMENT: &str = "Record";

/// Timestamp layout used by health exports, e.g. `2024-01-15 08:30:00 -0500`
const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Normalizer for leaf sample records
pub struct RecordNormalizer;

impl RecordNormalizer {
    /// Normalize an element, or `None` if it is not a usable record
    pub fn normalize(element: &Element) -> Option<NormalizedRecord> {
        Self::classify(element).ok()
    }

    /// Like [`normalize`](Self::normalize), but reports why an element was skipped
    pub fn classify(element: &Element) -> Result<NormalizedRecord, SkipReason> {
        let raw = raw_record(element)?;
        Self::normalize_raw(&raw)
    }

    pub fn normalize_raw(raw: &RawRecord<'_>) -> Result<NormalizedRecord, SkipReason> {
        let metric = tables::metric_name(raw.record_type);
        let date_key = date_key(raw.start).ok_or(SkipReason::InvalidStart)?;
        let mut duration_clamped = false;

        let point = match metric.as_str() {
            metric::SLEEP_ANALYSIS => {
                let hours = duration_hours(raw.start, raw.end);
                let duration_hours = if hours < 0.0 {
                    warn!(
                        "Sleep interval starting {} ends before it starts; clamping {:.3}h to 0",
                        raw.start, hours
                    );
                    duration_clamped = true;
                    0.0
                } else {
                    hours
                };
                DataPoint::Sleep(SleepSample {
                    date: raw.start.to_string(),
                    stage: tables::sleep_stage(raw.value),
                    duration_hours,
                })
            }
            metric::HEART_RATE => DataPoint::Quantity(QuantitySample {
                date: raw.start.to_string(),
                qty: parse_quantity(raw.value)?,
                unit: raw.unit.map(str::to_string),
                source: raw.source.map(str::to_string),
                end: raw.end.map(str::to_string),
            }),
            _ => DataPoint::Quantity(QuantitySample {
                date: raw.start.to_string(),
                qty: parse_quantity(raw.value)?,
                unit: raw.unit.map(str::to_string),
                source: raw.source.map(str::to_string),
                end: None,
            }),
        };

        Ok(NormalizedRecord {
            metric,
            date_key,
            point,
            duration_clamped,
        })
    }
}

/// Whether an element is a leaf sample record
pub fn is_leaf_record(element: &Element) -> bool {
    element.name.eq_ignore_ascii_case(RECORD_ELEMENT)
}

/// Borrow the record fields out of an element's attribute map
pub fn raw_record(element: &Element) -> Result<RawRecord<'_>, SkipReason> {
    if !is_leaf_record(element) {
        return Err(SkipReason::NotARecord);
    }
    Ok(RawRecord {
        record_type: element.attr("type").ok_or(SkipReason::MissingType)?,
        value: element.attr("value"),
        start: element.attr("startdate").ok_or(SkipReason::MissingStart)?,
        end: element.attr("enddate"),
        unit: element.attr("unit"),
        source: element.attr("sourcename"),
    })
}

/// Calendar day (`YYYY-MM-DD`) of a timestamp, taken from the string itself
pub fn date_key(timestamp: &str) -> Option<String> {
    let day = timestamp.get(..10)?;
    match timestamp.as_bytes().get(10) {
        None | Some(b' ') | Some(b'T') => {}
        Some(_) => return None,
    }
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
    Some(day.to_string())
}

/// Parse an export or RFC 3339 timestamp, keeping its offset
pub fn parse_timestamp(timestamp: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(timestamp, EXPORT_TIMESTAMP_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(timestamp))
        .ok()
}

/// Interval length in hours; 0 when the end is absent or either bound is
/// unreadable. May be negative.
pub fn duration_hours(start: &str, end: Option<&str>) -> f64 {
    let (Some(start), Some(end)) = (parse_timestamp(start), end.and_then(parse_timestamp)) else {
        return 0.0;
    };
    (end - start).num_milliseconds() as f64 / 3_600_000.0
}

fn parse_quantity(value: Option<&str>) -> Result<f64, SkipReason> {
    let qty = value
        .ok_or(SkipReason::NonNumericValue)?
        .trim()
        .parse::<f64>()
        .map_err(|_| SkipReason::NonNumericValue)?;
    if !qty.is_finite() {
        return Err(SkipReason::NonFiniteValue);
    }
    Ok(qty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SleepStage;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn record(attrs: &[(&str, &str)]) -> Element {
        Element {
            name: "Record".to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            self_closing: true,
        }
    }

    #[test]
    fn test_step_count_record() {
        let element = record(&[
            ("type", "HKQuantityTypeIdentifierStepCount"),
            ("sourcename", "Phone"),
            ("unit", "count"),
            ("startdate", "2024-01-15 08:30:00 -0500"),
            ("enddate", "2024-01-15 08:40:00 -0500"),
            ("value", "412"),
        ]);

        let normalized = RecordNormalizer::normalize(&element).unwrap();
        assert_eq!(normalized.metric, "step-count");
        assert_eq!(normalized.date_key, "2024-01-15");
        assert_eq!(
            normalized.point,
            DataPoint::Quantity(QuantitySample {
                date: "2024-01-15 08:30:00 -0500".to_string(),
                qty: 412.0,
                unit: Some("count".to_string()),
                source: Some("Phone".to_string()),
                end: None,
            })
        );
    }

    #[test]
    fn test_heart_rate_keeps_interval_end() {
        let element = record(&[
            ("type", "HKQuantityTypeIdentifierHeartRate"),
            ("unit", "count/min"),
            ("startdate", "2024-01-15 23:59:00 +0900"),
            ("enddate", "2024-01-16 00:01:00 +0900"),
            ("value", "58"),
        ]);

        let normalized = RecordNormalizer::normalize(&element).unwrap();
        assert_eq!(normalized.date_key, "2024-01-15");
        match normalized.point {
            DataPoint::Quantity(q) => {
                assert_eq!(q.qty, 58.0);
                assert_eq!(q.end.as_deref(), Some("2024-01-16 00:01:00 +0900"));
            }
            other => panic!("expected quantity, got {:?}", other),
        }
    }

    #[test]
    fn test_date_key_uses_written_offset() {
        assert_eq!(date_key("2024-01-15 23:30:00 -0800").as_deref(), Some("2024-01-15"));
        assert_eq!(date_key("2024-01-16T01:00:00+14:00").as_deref(), Some("2024-01-16"));
        assert_eq!(date_key("2024-01-15").as_deref(), Some("2024-01-15"));
        assert_eq!(date_key("2024-13-15 00:00:00 +0000"), None);
        assert_eq!(date_key("20240115"), None);
        assert_eq!(date_key("2024-01-155"), None);
    }

    #[test]
    fn test_sleep_record_duration_and_stage() {
        let element = record(&[
            ("type", "HKCategoryTypeIdentifierSleepAnalysis"),
            ("startdate", "2024-01-15 01:00:00 -0500"),
            ("enddate", "2024-01-15 04:30:00 -0500"),
            ("value", "HKCategoryValueSleepAnalysisAsleepDeep"),
        ]);

        let normalized = RecordNormalizer::normalize(&element).unwrap();
        assert_eq!(normalized.metric, "sleep-analysis");
        assert_eq!(
            normalized.point,
            DataPoint::Sleep(SleepSample {
                date: "2024-01-15 01:00:00 -0500".to_string(),
                stage: SleepStage::Deep,
                duration_hours: 3.5,
            })
        );
    }

    #[test]
    fn test_sleep_without_end_or_value() {
        let element = record(&[
            ("type", "HKCategoryTypeIdentifierSleepAnalysis"),
            ("startdate", "2024-01-15 01:00:00 -0500"),
        ]);

        match RecordNormalizer::normalize(&element).unwrap().point {
            DataPoint::Sleep(s) => {
                assert_eq!(s.stage, SleepStage::Unknown);
                assert_eq!(s.duration_hours, 0.0);
            }
            other => panic!("expected sleep sample, got {:?}", other),
        }
    }

    #[test]
    fn test_reversed_sleep_interval_is_clamped() {
        let element = record(&[
            ("type", "HKCategoryTypeIdentifierSleepAnalysis"),
            ("startdate", "2024-01-15 04:00:00 -0500"),
            ("enddate", "2024-01-15 03:00:00 -0500"),
            ("value", "HKCategoryValueSleepAnalysisAsleepCore"),
        ]);

        assert_eq!(
            duration_hours("2024-01-15 04:00:00 -0500", Some("2024-01-15 03:00:00 -0500")),
            -1.0
        );
        let normalized = RecordNormalizer::normalize(&element).unwrap();
        assert!(normalized.duration_clamped);
        match normalized.point {
            DataPoint::Sleep(s) => assert_eq!(s.duration_hours, 0.0),
            other => panic!("expected sleep sample, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_non_numeric_and_non_finite_values() {
        for (value, reason) in [
            ("abc", SkipReason::NonNumericValue),
            ("", SkipReason::NonNumericValue),
            ("NaN", SkipReason::NonFiniteValue),
            ("inf", SkipReason::NonFiniteValue),
            ("1e999", SkipReason::NonFiniteValue),
        ] {
            let element = record(&[
                ("type", "HKQuantityTypeIdentifierHeartRate"),
                ("startdate", "2024-01-15 08:00:00 -0500"),
                ("value", value),
            ]);
            assert_eq!(RecordNormalizer::classify(&element), Err(reason), "value {:?}", value);
        }
    }

    #[test]
    fn test_rejects_incomplete_elements() {
        let missing_type = record(&[("startdate", "2024-01-15 08:00:00 -0500"), ("value", "1")]);
        let missing_start = record(&[("type", "HKQuantityTypeIdentifierStepCount"), ("value", "1")]);
        let bad_start = record(&[
            ("type", "HKQuantityTypeIdentifierStepCount"),
            ("startdate", "yesterday"),
            ("value", "1"),
        ]);
        let mut workout = record(&[("type", "x"), ("startdate", "2024-01-15 08:00:00 -0500")]);
        workout.name = "Workout".to_string();

        assert_eq!(RecordNormalizer::classify(&missing_type), Err(SkipReason::MissingType));
        assert_eq!(RecordNormalizer::classify(&missing_start), Err(SkipReason::MissingStart));
        assert_eq!(RecordNormalizer::classify(&bad_start), Err(SkipReason::InvalidStart));
        assert_eq!(RecordNormalizer::classify(&workout), Err(SkipReason::NotARecord));
    }

    #[test]
    fn test_unknown_type_is_kept_folded() {
        let element = record(&[
            ("type", "HKQuantityTypeIdentifierDietaryWater"),
            ("startdate", "2024-01-15 12:00:00 +0000"),
            ("value", "250"),
            ("unit", "mL"),
        ]);

        let normalized = RecordNormalizer::normalize(&element).unwrap();
        assert_eq!(normalized.metric, "hkquantitytypeidentifierdietarywater");
    }
}
