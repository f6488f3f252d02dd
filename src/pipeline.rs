//! Pipeline orchestration
//!
//! This module provides the public API for Synheart Ingest.
//! One import job makes a single streaming pass over the archive, then drains
//! the accumulated days into the store one date at a time.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::accumulator::{DayBuckets, MetricBuckets};
use crate::aggregate::aggregate_metric;
use crate::config::{ImportConfig, DEFAULT_PROGRESS_INTERVAL};
use crate::error::ImportError;
use crate::merge::DayMerger;
use crate::normalizer::{is_leaf_record, RecordNormalizer};
use crate::parser::{ElementReader, ParseEvent};
use crate::retry::RetryConfig;
use crate::source::{open_archive, UploadedArchive};
use crate::store::{DayStore, FileDayStore};
use crate::types::{ImportEvent, ImportSummary};

/// Receiver for progress and completion events
pub trait ProgressSink {
    fn emit(&mut self, event: &ImportEvent);
}

impl<F: FnMut(&ImportEvent)> ProgressSink for F {
    fn emit(&mut self, event: &ImportEvent) {
        self(event)
    }
}

/// Sink that discards every event
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&mut self, _event: &ImportEvent) {}
}

/// Shared flag a caller can set to stop a running import.
///
/// The job only stops at safe points: between progress ticks while scanning
/// (nothing has been written yet) and between two dates while draining.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters of one job
#[derive(Debug, Default)]
struct JobStats {
    records: u64,
    skipped: u64,
    malformed: u64,
    clamped: u64,
    clamped_totals: u64,
}

/// Import an archive file into a directory-backed day store.
///
/// # Example
/// ```ignore
/// let summary = import_archive(Path::new("export.xml"), Path::new("days"))?;
/// println!("{} days, {} records", summary.days, summary.records);
/// ```
pub fn import_archive(path: &Path, store_dir: &Path) -> Result<ImportSummary, ImportError> {
    let importer = ArchiveImporter::new(FileDayStore::new(store_dir));
    importer.import_path(path, &mut NoProgress)
}

/// Streaming archive importer bound to one day store.
///
/// Every call to an `import_*` method is an independent job: buckets and
/// counters live on that call's stack and are never shared between jobs.
pub struct ArchiveImporter<S: DayStore> {
    store: S,
    progress_interval: u64,
    retry: RetryConfig,
    cancel: CancelHandle,
}

impl ArchiveImporter<FileDayStore> {
    /// Build an importer for the file store named in `config`
    pub fn from_config(config: &ImportConfig) -> Self {
        ArchiveImporter::new(FileDayStore::new(&config.store_dir))
            .with_progress_interval(config.progress_interval)
            .with_retry(config.retry.clone())
    }
}

impl<S: DayStore> ArchiveImporter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            retry: RetryConfig::default(),
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Import the archive at `path` (`-` for stdin)
    pub fn import_path(
        &self,
        path: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<ImportSummary, ImportError> {
        let reader = open_archive(path)?;
        self.import_reader_named(reader, path.to_path_buf(), sink)
    }

    /// Import an uploaded temporary copy, deleting it once the stream closes
    pub fn import_upload(
        &self,
        upload: UploadedArchive,
        sink: &mut dyn ProgressSink,
    ) -> Result<ImportSummary, ImportError> {
        let job = Job::start();
        let mut stats = JobStats::default();

        let buckets = {
            let reader = upload.open()?;
            let events = ElementReader::new(reader).with_source_path(upload.path());
            self.scan(events, &mut stats, sink)
        };
        drop(upload);

        self.drain(job, buckets?, stats, sink)
    }

    /// Import from any buffered byte stream
    pub fn import_reader<R: BufRead>(
        &self,
        reader: R,
        sink: &mut dyn ProgressSink,
    ) -> Result<ImportSummary, ImportError> {
        self.import_reader_named(reader, PathBuf::from("<stream>"), sink)
    }

    fn import_reader_named<R: BufRead>(
        &self,
        reader: R,
        path: PathBuf,
        sink: &mut dyn ProgressSink,
    ) -> Result<ImportSummary, ImportError> {
        let job = Job::start();
        let mut stats = JobStats::default();
        let events = ElementReader::new(reader).with_source_path(path);
        let buckets = self.scan(events, &mut stats, sink)?;
        self.drain(job, buckets, stats, sink)
    }

    /// Parse, normalize and bucket every record of the stream
    fn scan<R: BufRead>(
        &self,
        mut events: ElementReader<R>,
        stats: &mut JobStats,
        sink: &mut dyn ProgressSink,
    ) -> Result<DayBuckets, ImportError> {
        let mut buckets = DayBuckets::new();

        for event in events.by_ref() {
            let element = match event? {
                ParseEvent::Element(element) => element,
                ParseEvent::Malformed(fragment) => {
                    stats.malformed += 1;
                    warn!(
                        "Skipped malformed fragment at byte {}: {}",
                        fragment.offset, fragment.reason
                    );
                    continue;
                }
            };

            if !is_leaf_record(&element) {
                continue;
            }
            stats.records += 1;

            match RecordNormalizer::classify(&element) {
                Ok(record) => {
                    if record.duration_clamped {
                        stats.clamped += 1;
                    }
                    buckets.ingest_record(record);
                }
                Err(reason) => {
                    stats.skipped += 1;
                    debug!(
                        "Skipped record {} ({}): {}",
                        stats.records,
                        element.attr("type").unwrap_or("<untyped>"),
                        reason
                    );
                }
            }

            if stats.records % self.progress_interval == 0 {
                sink.emit(&ImportEvent::Progress {
                    processed: stats.records,
                });
                if self.cancel.is_cancelled() {
                    info!("Import cancelled while scanning after {} records", stats.records);
                    return Err(ImportError::Cancelled { days_written: 0 });
                }
            }
        }

        debug!(
            "Scan finished after {} bytes: {} records, {} dates, {} points in flight",
            events.offset(),
            stats.records,
            buckets.len(),
            buckets.point_count()
        );
        Ok(buckets)
    }

    /// Aggregate and merge every bucketed date, then report completion
    fn drain(
        &self,
        job: Job,
        mut buckets: DayBuckets,
        mut stats: JobStats,
        sink: &mut dyn ProgressSink,
    ) -> Result<ImportSummary, ImportError> {
        let merger = DayMerger::new(&self.store, self.retry.clone());
        let mut days = 0;
        let mut points_stored = 0;
        let mut failed_dates = Vec::new();
        let mut last_error = None;

        for (date, metrics) in buckets.drain() {
            if self.cancel.is_cancelled() {
                info!("Import cancelled after merging {} day(s)", days);
                return Err(ImportError::Cancelled { days_written: days });
            }

            let batch: MetricBuckets = metrics
                .into_iter()
                .map(|(metric, points)| {
                    let aggregated = aggregate_metric(&metric, points);
                    stats.clamped_totals += aggregated.clamped_totals;
                    (metric, aggregated.points)
                })
                .collect();

            match merger.merge(&date, batch) {
                Ok(added) => {
                    days += 1;
                    points_stored += added;
                }
                Err(e) => {
                    error!("Failed to merge day {}: {}", date, e);
                    failed_dates.push(date);
                    last_error = Some(e.to_string());
                }
            }
        }

        if let Some(last_error) = last_error {
            return Err(ImportError::Store {
                dates: failed_dates,
                last_error,
            });
        }

        sink.emit(&ImportEvent::Complete {
            days,
            records: stats.records,
        });

        let summary = ImportSummary {
            job_id: job.id,
            days,
            records: stats.records,
            points_stored,
            skipped_records: stats.skipped,
            malformed_fragments: stats.malformed,
            clamped_durations: stats.clamped,
            clamped_totals: stats.clamped_totals,
            started_at: job.started_at,
            finished_at: Utc::now(),
        };
        info!(
            "Import {} complete: {} days, {} records ({} skipped, {} malformed fragments), {} new points",
            summary.job_id,
            summary.days,
            summary.records,
            summary.skipped_records,
            summary.malformed_fragments,
            summary.points_stored
        );
        Ok(summary)
    }
}

struct Job {
    id: Uuid,
    started_at: chrono::DateTime<Utc>,
}

impl Job {
    fn start() -> Self {
        let job = Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
        };
        info!("Starting import {}", job.id);
        job
    }
}
