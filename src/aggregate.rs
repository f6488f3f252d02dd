//! Metric aggregation
//!
//! Collapses one day's raw points into a single canonical value for metrics
//! that are summarized per day. Every other metric passes through unchanged.
//!
//! Summed values are kept finite: a total that overflows is clamped to
//! `f64::MAX` and reported, since JSON has no representation for infinity.

use log::warn;

use crate::types::{metric, DataPoint, QuantitySample, SleepStage, SleepSummary};

/// Points produced for one metric, plus how many totals had to be clamped
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregated {
    pub points: Vec<DataPoint>,
    pub clamped_totals: u64,
}

impl Aggregated {
    fn unchanged(points: Vec<DataPoint>) -> Self {
        Self {
            points,
            clamped_totals: 0,
        }
    }
}

/// Whether a metric is collapsed to one point per import batch
pub fn is_aggregated(metric_name: &str) -> bool {
    matches!(metric_name, metric::STEP_COUNT | metric::SLEEP_ANALYSIS)
}

/// Apply the aggregator registered for `metric_name`
pub fn aggregate_metric(metric_name: &str, points: Vec<DataPoint>) -> Aggregated {
    match metric_name {
        metric::STEP_COUNT => aggregate_step_count(points),
        metric::SLEEP_ANALYSIS => aggregate_sleep_analysis(points),
        _ => Aggregated::unchanged(points),
    }
}

/// Clamp an overflowed sum into the finite range
fn finite_total(total: f64, field: &str, date: &str, clamped: &mut u64) -> f64 {
    if total.is_finite() {
        return total;
    }
    warn!("{} total for {} overflowed; clamping to f64::MAX", field, date);
    *clamped += 1;
    f64::MAX
}

/// Sum all step counts of a day into one point dated like the first one
pub fn aggregate_step_count(points: Vec<DataPoint>) -> Aggregated {
    let Some(first) = points.first() else {
        return Aggregated::unchanged(points);
    };

    let date = first.date().to_string();
    let unit = match first {
        DataPoint::Quantity(q) => q.unit.clone(),
        _ => None,
    };
    let mut clamped_totals = 0;
    let total: f64 = points.iter().filter_map(DataPoint::qty).sum();
    let qty = finite_total(total, metric::STEP_COUNT, &date, &mut clamped_totals);

    Aggregated {
        points: vec![DataPoint::Quantity(QuantitySample {
            date,
            qty,
            unit,
            source: None,
            end: None,
        })],
        clamped_totals,
    }
}

/// Fold a day's sleep intervals into one stage summary
pub fn aggregate_sleep_analysis(points: Vec<DataPoint>) -> Aggregated {
    let Some(first) = points.first() else {
        return Aggregated::unchanged(points);
    };

    let mut summary = SleepSummary {
        date: first.date().to_string(),
        ..Default::default()
    };

    for point in &points {
        match point {
            DataPoint::Sleep(sample) => {
                let hours = sample.duration_hours.max(0.0);
                match sample.stage {
                    SleepStage::Deep => summary.deep += hours,
                    SleepStage::Rem => summary.rem += hours,
                    SleepStage::Core => summary.core += hours,
                    SleepStage::Awake => summary.awake += hours,
                    SleepStage::InBed => summary.in_bed += hours,
                    SleepStage::Asleep => summary.asleep += hours,
                    SleepStage::Unknown => {}
                }
            }
            // A summary that was re-fed through aggregation keeps its stages
            DataPoint::SleepSummary(prior) => {
                summary.deep += prior.deep;
                summary.rem += prior.rem;
                summary.core += prior.core;
                summary.awake += prior.awake;
                summary.in_bed += prior.in_bed;
                summary.asleep += prior.asleep;
            }
            DataPoint::Quantity(_) => {}
        }
    }

    let mut clamped_totals = 0;
    let date = summary.date.clone();
    for (field, value) in [
        ("deep", &mut summary.deep),
        ("rem", &mut summary.rem),
        ("core", &mut summary.core),
        ("awake", &mut summary.awake),
        ("inBed", &mut summary.in_bed),
        ("asleep", &mut summary.asleep),
    ] {
        *value = finite_total(*value, field, &date, &mut clamped_totals);
    }
    let total = summary.deep + summary.rem + summary.core;
    summary.total_sleep = finite_total(total, "totalSleep", &date, &mut clamped_totals);

    Aggregated {
        points: vec![DataPoint::SleepSummary(summary)],
        clamped_totals,
    }
}
