//! Archive stream source
//!
//! Opens an export archive as a buffered byte stream. The archive is never
//! read into memory as a whole; the parser pulls from the buffer as it goes.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::ImportError;

/// Read buffer size for archive streams
pub const STREAM_BUFFER_BYTES: usize = 256 * 1024;

/// Open `path` for streaming. `-` selects standard input.
pub fn open_archive(path: &Path) -> Result<Box<dyn BufRead>, ImportError> {
    if path.as_os_str() == "-" {
        debug!("Streaming archive from stdin");
        return Ok(Box::new(BufReader::with_capacity(
            STREAM_BUFFER_BYTES,
            io::stdin(),
        )));
    }

    let file = File::open(path).map_err(|source| ImportError::Source {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Streaming archive from {}", path.display());
    Ok(Box::new(BufReader::with_capacity(STREAM_BUFFER_BYTES, file)))
}

/// Temporary copy of an uploaded archive.
///
/// The file is removed when the guard is dropped, on success and failure
/// paths alike. Removal errors are logged and otherwise ignored.
#[derive(Debug)]
pub struct UploadedArchive {
    path: PathBuf,
}

impl UploadedArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self) -> Result<Box<dyn BufRead>, ImportError> {
        open_archive(&self.path)
    }
}

impl Drop for UploadedArchive {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed uploaded archive {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Could not remove uploaded archive {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
