//! FFI bindings for Synheart Ingest
//!
//! This module provides C-compatible functions for calling the importer from
//! host applications. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using `ingest_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;
use std::ptr;

use crate::pipeline::{ArchiveImporter, NoProgress, ProgressSink};
use crate::source::UploadedArchive;
use crate::store::{DayStore, FileDayStore};
use crate::types::ImportEvent;

/// Callback receiving each progress/completion event as a JSON object,
/// e.g. `{"event":"progress","processed":10000}`. The string is only valid
/// for the duration of the call.
pub type IngestProgressCallback = extern "C" fn(event_json: *const c_char);

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Forwards events to a C callback
struct CallbackSink(IngestProgressCallback);

impl ProgressSink for CallbackSink {
    fn emit(&mut self, event: &ImportEvent) {
        let Ok(json) = serde_json::to_string(event) else {
            return;
        };
        if let Ok(cstr) = CString::new(json) {
            (self.0)(cstr.as_ptr());
        }
    }
}

// ============================================================================
// Import API
// ============================================================================

/// Import a health archive into a directory of per-day records.
///
/// On success returns the import summary as JSON. When `delete_source` is
/// non-zero the archive is treated as an uploaded temporary copy and removed
/// after reading, whether or not the import succeeds.
///
/// # Safety
/// - `path` and `store_dir` must be valid null-terminated C strings.
/// - `progress_cb` may be NULL.
/// - Returns a newly allocated string that must be freed with `ingest_free_string`.
/// - Returns NULL on error; call `ingest_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ingest_import_archive(
    path: *const c_char,
    store_dir: *const c_char,
    delete_source: i32,
    progress_cb: Option<IngestProgressCallback>,
) -> *mut c_char {
    clear_last_error();

    let path_str = match cstr_to_string(path) {
        Some(s) => s,
        None => {
            set_last_error("Invalid archive path pointer");
            return ptr::null_mut();
        }
    };

    let store_str = match cstr_to_string(store_dir) {
        Some(s) => s,
        None => {
            set_last_error("Invalid store directory pointer");
            return ptr::null_mut();
        }
    };

    let importer = ArchiveImporter::new(FileDayStore::new(store_str));
    let mut callback_sink;
    let mut no_progress = NoProgress;
    let sink: &mut dyn ProgressSink = match progress_cb {
        Some(cb) => {
            callback_sink = CallbackSink(cb);
            &mut callback_sink
        }
        None => &mut no_progress,
    };

    let path = PathBuf::from(path_str);
    let result = if delete_source != 0 {
        importer.import_upload(UploadedArchive::new(path), sink)
    } else {
        importer.import_path(&path, sink)
    };

    match result.map(|summary| serde_json::to_string(&summary)) {
        Ok(Ok(json)) => string_to_cstr(&json),
        Ok(Err(e)) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
        Err(e) => {
            set_last_error(&format!("{}: {}", e.code(), e));
            ptr::null_mut()
        }
    }
}

/// Read the stored record for one date as JSON.
///
/// Returns the JSON text `null` when no record exists for the date.
///
/// # Safety
/// - `store_dir` and `date` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `ingest_free_string`.
/// - Returns NULL on error; call `ingest_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ingest_read_day(
    store_dir: *const c_char,
    date: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let store_str = match cstr_to_string(store_dir) {
        Some(s) => s,
        None => {
            set_last_error("Invalid store directory pointer");
            return ptr::null_mut();
        }
    };

    let date_str = match cstr_to_string(date) {
        Some(s) => s,
        None => {
            set_last_error("Invalid date pointer");
            return ptr::null_mut();
        }
    };

    let store = FileDayStore::new(store_str);
    match store.load(&date_str) {
        Ok(record) => match serde_json::to_string(&record) {
            Ok(json) => string_to_cstr(&json),
            Err(e) => {
                set_last_error(&e.to_string());
                ptr::null_mut()
            }
        },
        Err(e) => {
            set_last_error(&format!("{}: {}", e.code(), e));
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by ingest functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an ingest function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn ingest_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next ingest function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn ingest_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn ingest_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const SAMPLE_EXPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<HealthData locale="en_US">
 <Record type="HKQuantityTypeIdentifierStepCount" sourceName="Phone" unit="count" startDate="2024-01-15 08:00:00 -0500" endDate="2024-01-15 08:10:00 -0500" value="120"/>
 <Record type="HKQuantityTypeIdentifierStepCount" sourceName="Phone" unit="count" startDate="2024-01-15 09:00:00 -0500" endDate="2024-01-15 09:10:00 -0500" value="80"/>
</HealthData>
"#;

    static EVENTS: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn count_events(event_json: *const c_char) {
        let json = unsafe { CStr::from_ptr(event_json) }.to_str().unwrap();
        assert!(json.contains("\"event\""));
        EVENTS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_ffi_import_and_read_day() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("export.xml");
        fs::write(&archive, SAMPLE_EXPORT).unwrap();

        let path = CString::new(archive.to_str().unwrap()).unwrap();
        let store = CString::new(dir.path().join("days").to_str().unwrap()).unwrap();
        let date = CString::new("2024-01-15").unwrap();

        unsafe {
            let summary = ingest_import_archive(path.as_ptr(), store.as_ptr(), 1, Some(count_events));
            assert!(!summary.is_null());
            let summary_str = CStr::from_ptr(summary).to_str().unwrap();
            let value: serde_json::Value = serde_json::from_str(summary_str).unwrap();
            assert_eq!(value["days"], 1);
            assert_eq!(value["records"], 2);
            ingest_free_string(summary);

            let day = ingest_read_day(store.as_ptr(), date.as_ptr());
            assert!(!day.is_null());
            let day_str = CStr::from_ptr(day).to_str().unwrap();
            assert!(day_str.contains("step-count"));
            assert!(day_str.contains("200"));
            ingest_free_string(day);
        }

        assert!(EVENTS.load(Ordering::SeqCst) >= 1);
        assert!(!archive.exists());
    }

    #[test]
    fn test_ffi_read_missing_day_is_null_json() {
        let dir = TempDir::new().unwrap();
        let store = CString::new(dir.path().to_str().unwrap()).unwrap();
        let date = CString::new("2024-02-01").unwrap();

        unsafe {
            let day = ingest_read_day(store.as_ptr(), date.as_ptr());
            assert_eq!(CStr::from_ptr(day).to_str().unwrap(), "null");
            ingest_free_string(day);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        let dir = TempDir::new().unwrap();
        let path = CString::new(dir.path().join("missing.xml").to_str().unwrap()).unwrap();
        let store = CString::new(dir.path().to_str().unwrap()).unwrap();

        unsafe {
            let result = ingest_import_archive(path.as_ptr(), store.as_ptr(), 0, None);
            assert!(result.is_null());

            let error = ingest_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.starts_with("SOURCE_ERROR"));

            let result = ingest_import_archive(ptr::null(), store.as_ptr(), 0, None);
            assert!(result.is_null());
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = ingest_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, crate::INGEST_VERSION);
        }
    }
}
