//! Synheart Ingest - Streaming importer for health data archives
//!
//! Ingest turns a large health export into one canonical record per calendar
//! day through a single streaming pass: element scanning → record
//! normalization → day bucketing → metric aggregation → deduplicating merge
//! into the day store.
//!
//! ## Modules
//!
//! - **Parsing**: incremental, error-tolerant element scanner over any byte stream
//! - **Normalization**: attribute records to typed data points with day keys
//! - **Persistence**: per-day JSON store with timestamp deduplication

pub mod accumulator;
pub mod aggregate;
pub mod config;
pub mod error;
pub mod merge;
pub mod normalizer;
pub mod parser;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod store;
pub mod tables;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::ImportConfig;
pub use error::{ImportError, SkipReason};
pub use pipeline::{import_archive, ArchiveImporter, CancelHandle, NoProgress, ProgressSink};
pub use store::{DayStore, FileDayStore, MemoryDayStore};
pub use types::{DataPoint, DayRecord, ImportEvent, ImportSummary};

/// Library version reported by the CLI and FFI
pub const INGEST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name shown in diagnostics
pub const PRODUCER_NAME: &str = "synheart-ingest";
