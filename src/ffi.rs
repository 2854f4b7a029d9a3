//! FFI bindings for Reserve Flux
//!
//! This module provides C-compatible functions for calling the engine from other languages.
//! All functions use C strings (null-terminated) and return allocated memory that
//! must be freed by the caller using `reserve_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::RunConfig;
use crate::pipeline::{compute_series_json, ReserveProcessor};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
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

// ============================================================================
// Stateless API
// ============================================================================

/// Run the engine over a JSON run document and return the result as JSON.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `reserve_free_string`.
/// - Returns NULL on error; call `reserve_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn reserve_compute_json(json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    match compute_series_json(json_str) {
        Ok(result) => string_to_cstr(&result),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Default engine parameters as JSON.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `reserve_free_string`.
/// - Returns NULL on error; call `reserve_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn reserve_default_params_json() -> *mut c_char {
    clear_last_error();

    match serde_json::to_string(&crate::default_params()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateful Processor API
// ============================================================================

/// Opaque handle to a ReserveProcessor
pub struct ReserveProcessorHandle {
    processor: ReserveProcessor,
}

/// Create a processor. `config_json` may be NULL for defaults, or a JSON
/// `RunConfig` (`params`, `baselines`, `behaviorBaseline`, `threeKernel`).
///
/// # Safety
/// - `config_json` must be NULL or a valid null-terminated C string.
/// - Returns a pointer to a newly allocated processor, to be freed with `reserve_processor_free`.
/// - Returns NULL on error; call `reserve_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn reserve_processor_new(config_json: *const c_char) -> *mut ReserveProcessorHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        RunConfig::default()
    } else {
        let json_str = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        };
        match serde_json::from_str::<RunConfig>(&json_str) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    let handle = Box::new(ReserveProcessorHandle {
        processor: ReserveProcessor::with_config(config),
    });
    Box::into_raw(handle)
}

/// Free a processor.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `reserve_processor_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn reserve_processor_free(processor: *mut ReserveProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

/// Process a JSON run document with a processor, returning the encoded report.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `reserve_processor_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `reserve_free_string`.
/// - Returns NULL on error; call `reserve_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn reserve_processor_process(
    processor: *mut ReserveProcessorHandle,
    json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }

    let handle = &*processor;

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    match handle.processor.process_json(&json_str) {
        Ok(result) => string_to_cstr(&result),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by this library.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a `reserve_*` function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn reserve_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next `reserve_*` call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn reserve_last_error() -> *const c_char {
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
pub unsafe extern "C" fn reserve_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run_json() -> CString {
        CString::new(
            r#"{
                "epochMinutes": 5,
                "initialBB": 55,
                "epochs": [
                    {"t": "2025-01-01T00:00:00Z", "sleep": "core", "hr": 54, "hrv": 62},
                    {"t": "2025-01-01T00:05:00Z", "sleep": "core", "hr": 53, "hrv": 64},
                    {"t": "2025-01-01T00:10:00Z", "hr": 60, "steps": 0}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_ffi_compute_json() {
        let json = sample_run_json();

        unsafe {
            let result = reserve_compute_json(json.as_ptr());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            let v: serde_json::Value = serde_json::from_str(result_str).unwrap();
            assert_eq!(v["series"].as_array().map(|s| s.len()), Some(3));
            assert_eq!(v["series"][0]["bb"], 55.0);

            reserve_free_string(result);
        }
    }

    #[test]
    fn test_ffi_default_params() {
        unsafe {
            let result = reserve_default_params_json();
            assert!(!result.is_null());
            let result_str = CStr::from_ptr(result).to_str().unwrap();
            assert!(result_str.contains("\"epochMinutes\":5.0"));
            reserve_free_string(result);
        }
    }

    #[test]
    fn test_ffi_processor_lifecycle() {
        unsafe {
            let config = CString::new(r#"{"params": {"initialBB": 30}}"#).unwrap();
            let processor = reserve_processor_new(config.as_ptr());
            assert!(!processor.is_null());

            let json = CString::new(r#"{"epochs": [{"t": 0, "hr": 60}]}"#).unwrap();
            let result = reserve_processor_process(processor, json.as_ptr());
            assert!(!result.is_null());
            let v: serde_json::Value = serde_json::from_str(CStr::from_ptr(result).to_str().unwrap()).unwrap();
            assert_eq!(v["series"][0]["bb"], 30.0);
            assert!(v["producer"]["instanceId"].is_string());
            reserve_free_string(result);

            reserve_processor_free(processor);

            let defaults = reserve_processor_new(ptr::null());
            assert!(!defaults.is_null());
            reserve_processor_free(defaults);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid_json = CString::new("not json").unwrap();
            let result = reserve_compute_json(invalid_json.as_ptr());
            assert!(result.is_null());

            let error = reserve_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());

            let result = reserve_processor_process(ptr::null_mut(), invalid_json.as_ptr());
            assert!(result.is_null());
            let error_str = CStr::from_ptr(reserve_last_error()).to_str().unwrap();
            assert_eq!(error_str, "Null processor pointer");
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = reserve_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, crate::RESERVE_VERSION);
        }
    }
}
