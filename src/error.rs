//! Error types for Synheart Ingest
//!
//! Fatal errors abort an import job and are returned to the caller. Per-record
//! problems are never fatal: they are reported as a [`SkipReason`] and counted.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort an import job
#[derive(Debug, Error)]
pub enum ImportError {
    /// The input archive could not be opened or read (bad input file)
    #[error("Failed to read archive {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// One or more dates could not be written to the day store
    #[error("Failed to persist {} day record(s) ({}): {last_error}", dates.len(), dates.join(", "))]
    Store {
        dates: Vec<String>,
        last_error: String,
    },

    /// Day store I/O failure for a single date
    #[error("Day store I/O error for {date}: {source}")]
    StoreIo {
        date: String,
        #[source]
        source: io::Error,
    },

    /// A stored day record could not be decoded
    #[error("Corrupt day record for {date}: {source}")]
    Json {
        date: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration in {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// The caller aborted the job between two dates
    #[error("Import cancelled after {days_written} day(s) were merged")]
    Cancelled { days_written: usize },
}

impl ImportError {
    /// Short machine-readable code, used by the CLI and FFI error reports
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::Source { .. } => "SOURCE_ERROR",
            ImportError::Store { .. } | ImportError::StoreIo { .. } => "STORE_ERROR",
            ImportError::Json { .. } => "CORRUPT_RECORD",
            ImportError::Config { .. } => "CONFIG_ERROR",
            ImportError::Cancelled { .. } => "CANCELLED",
        }
    }

    /// Whether retrying the failed store operation could succeed.
    ///
    /// Decode failures and rejected date keys fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            ImportError::StoreIo { source, .. } => source.kind() != io::ErrorKind::InvalidInput,
            _ => false,
        }
    }
}

/// Why a scanned element did not produce a data point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("element is not a sample record")]
    NotARecord,
    #[error("record has no type attribute")]
    MissingType,
    #[error("record has no start date")]
    MissingStart,
    #[error("start date is not a calendar timestamp")]
    InvalidStart,
    #[error("value is not numeric")]
    NonNumericValue,
    #[error("value is not finite")]
    NonFiniteValue,
}
