//! Per-day canonical store
//!
//! One record per date, read and written independently. The file store keeps
//! each record in `<root>/<YYYY-MM-DD>.json` and replaces it with
//! write-then-rename, so readers never observe a partially written record.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;

use crate::error::ImportError;
use crate::normalizer::date_key;
use crate::types::DayRecord;

const RECORD_EXTENSION: &str = "json";

/// Storage for canonical day records
pub trait DayStore {
    /// Load the record for `date`, if one exists
    fn load(&self, date: &str) -> Result<Option<DayRecord>, ImportError>;

    /// Replace the record for `record.date`
    fn save(&self, record: &DayRecord) -> Result<(), ImportError>;

    /// Dates that currently have a record, ascending
    fn dates(&self) -> Result<Vec<String>, ImportError>;
}

/// Day store backed by one JSON file per date
#[derive(Debug, Clone)]
pub struct FileDayStore {
    root: PathBuf,
}

impl FileDayStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the record file for `date`
    pub fn path_for(&self, date: &str) -> Result<PathBuf, ImportError> {
        if date_key(date).as_deref() != Some(date) {
            return Err(ImportError::StoreIo {
                date: date.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a YYYY-MM-DD date"),
            });
        }
        Ok(self.root.join(format!("{}.{}", date, RECORD_EXTENSION)))
    }

    fn write_atomically(&self, path: &Path, record: &DayRecord) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let temp_path = path.with_extension("json.tmp");

        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, record)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        Ok(())
    }
}

impl DayStore for FileDayStore {
    fn load(&self, date: &str) -> Result<Option<DayRecord>, ImportError> {
        let path = self.path_for(date)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ImportError::StoreIo {
                    date: date.to_string(),
                    source,
                })
            }
        };

        let record = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            ImportError::Json {
                date: date.to_string(),
                source,
            }
        })?;
        Ok(Some(record))
    }

    fn save(&self, record: &DayRecord) -> Result<(), ImportError> {
        let path = self.path_for(&record.date)?;
        self.write_atomically(&path, record)
            .map_err(|source| ImportError::StoreIo {
                date: record.date.clone(),
                source,
            })?;
        debug!("Wrote day record {}", path.display());
        Ok(())
    }

    fn dates(&self) -> Result<Vec<String>, ImportError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ImportError::StoreIo {
                    date: String::new(),
                    source,
                })
            }
        };

        let mut dates: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension()? != RECORD_EXTENSION {
                    return None;
                }
                let stem = path.file_stem()?.to_str()?;
                date_key(stem).filter(|key| key == stem)
            })
            .collect();
        dates.sort();
        Ok(dates)
    }
}

/// In-memory day store, for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryDayStore {
    records: Mutex<BTreeMap<String, DayRecord>>,
}

impl MemoryDayStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, DayRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DayStore for MemoryDayStore {
    fn load(&self, date: &str) -> Result<Option<DayRecord>, ImportError> {
        Ok(self.records().get(date).cloned())
    }

    fn save(&self, record: &DayRecord) -> Result<(), ImportError> {
        self.records().insert(record.date.clone(), record.clone());
        Ok(())
    }

    fn dates(&self) -> Result<Vec<String>, ImportError> {
        Ok(self.records().keys().cloned().collect())
    }
}
