//! Day-bucket accumulator
//!
//! Groups normalized points by date, then by metric, in arrival order. Buckets
//! are created lazily and handed out exactly once by [`DayBuckets::drain`],
//! which removes each date as it is yielded.

use std::collections::BTreeMap;

use crate::types::{DataPoint, NormalizedRecord};

/// Points for one date, keyed by metric name
pub type MetricBuckets = BTreeMap<String, Vec<DataPoint>>;

/// In-flight buckets of one import job
#[derive(Debug, Default)]
pub struct DayBuckets {
    days: BTreeMap<String, MetricBuckets>,
    points: usize,
}

impl DayBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point. Duplicates are kept until aggregation.
    pub fn ingest(&mut self, metric: &str, date_key: &str, point: DataPoint) {
        self.days
            .entry(date_key.to_string())
            .or_default()
            .entry(metric.to_string())
            .or_default()
            .push(point);
        self.points += 1;
    }

    pub fn ingest_record(&mut self, record: NormalizedRecord) {
        self.ingest(&record.metric, &record.date_key, record.point);
    }

    /// Number of dates currently held
    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Number of points currently held
    pub fn point_count(&self) -> usize {
        self.points
    }

    /// Yield `(date, metrics)` in date order, removing each date from the
    /// accumulator as it is yielded.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { buckets: self }
    }
}

/// Draining iterator returned by [`DayBuckets::drain`]
pub struct Drain<'a> {
    buckets: &'a mut DayBuckets,
}

impl Iterator for Drain<'_> {
    type Item = (String, MetricBuckets);

    fn next(&mut self) -> Option<Self::Item> {
        let (date, metrics) = self.buckets.days.pop_first()?;
        self.buckets.points -= metrics.values().map(Vec::len).sum::<usize>();
        Some((date, metrics))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.buckets.days.len();
        (len, Some(len))
    }
}
