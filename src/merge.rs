//! Persistence merge
//!
//! Folds one date's batch into the stored day record. Points are deduplicated
//! by exact timestamp per metric, so re-importing the same archive leaves the
//! store unchanged. Aggregated metrics hold a single summary, which a batch
//! replaces rather than extends.

use std::collections::HashSet;

use log::debug;

use crate::accumulator::MetricBuckets;
use crate::aggregate::is_aggregated;
use crate::error::ImportError;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::store::DayStore;
use crate::types::DayRecord;

/// Result of merging one batch into a day record
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub record: DayRecord,
    /// Points appended, or summaries replaced
    pub points_added: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.points_added > 0
    }
}

/// Merge `batch` into `existing`, skipping points whose timestamp is already
/// stored for the same metric.
pub fn merge_day(mut existing: DayRecord, batch: MetricBuckets) -> MergeOutcome {
    let mut points_added = 0;

    for (metric, points) in batch {
        let stored = existing.metrics.entry(metric.clone()).or_default();
        let mut seen: HashSet<String> = stored.iter().map(|p| p.date().to_string()).collect();

        let fresh: Vec<_> = points
            .into_iter()
            .filter(|p| seen.insert(p.date().to_string()))
            .collect();

        if fresh.is_empty() {
            if stored.is_empty() {
                existing.metrics.remove(&metric);
            }
            continue;
        }

        points_added += fresh.len();
        if is_aggregated(&metric) {
            *stored = fresh;
        } else {
            stored.extend(fresh);
        }
    }

    MergeOutcome {
        record: existing,
        points_added,
    }
}

/// Read-modify-write of day records against a store
pub struct DayMerger<'a, S: DayStore + ?Sized> {
    store: &'a S,
    retry: RetryConfig,
}

impl<'a, S: DayStore + ?Sized> DayMerger<'a, S> {
    pub fn new(store: &'a S, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Merge one date's batch and persist it. Returns the number of points
    /// added; nothing is written when the batch brings nothing new.
    pub fn merge(&self, date: &str, batch: MetricBuckets) -> Result<usize, ImportError> {
        let existing = retry_with_backoff(
            &self.retry,
            &format!("load {}", date),
            ImportError::is_transient,
            || self.store.load(date),
        )?
        .unwrap_or_else(|| DayRecord::empty(date));

        let outcome = merge_day(existing, batch);
        if !outcome.changed() {
            debug!("No new points for {}", date);
            return Ok(0);
        }

        retry_with_backoff(
            &self.retry,
            &format!("save {}", date),
            ImportError::is_transient,
            || self.store.save(&outcome.record),
        )?;
        debug!("Merged {} new point(s) into {}", outcome.points_added, date);
        Ok(outcome.points_added)
    }
}
