//! FFI bindings for OnTrack
//!
//! This module provides C-compatible functions for calling the engine from
//! watch and phone hosts. All functions use C strings (null-terminated) and
//! return allocated memory that must be freed by the caller using
//! `ontrack_free_string`.
//!
//! Incomplete settings are not errors here: queries return a JSON envelope
//! with `"status": "incomplete"` and the reason. NULL is only returned for
//! bad arguments, and `ontrack_last_error` then explains why.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use serde::Serialize;

use crate::calendar::{instant_from_millis, parse_timezone};
use crate::engine::MetricEngine;
use crate::error::ComputeError;
use crate::settings::Settings;
use crate::types::{MetricType, ViewKind, ViewResponse};

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

/// Serialize a response, or record the error and return NULL
fn json_to_cstr<T: Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&ComputeError::from(e).to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Engine API
// ============================================================================

/// Opaque handle to a MetricEngine
pub struct OnTrackEngineHandle {
    engine: MetricEngine,
}

/// Create an engine for one metric (0 energy, 1 steps, 2 distance, 3 floors).
///
/// # Safety
/// - Returns a pointer to a newly allocated engine with default settings.
/// - Must be freed with `ontrack_engine_free`.
/// - Returns NULL for an unknown metric index.
#[no_mangle]
pub unsafe extern "C" fn ontrack_engine_new(metric_index: i32) -> *mut OnTrackEngineHandle {
    clear_last_error();

    let metric = match usize::try_from(metric_index)
        .ok()
        .and_then(MetricType::from_index)
    {
        Some(metric) => metric,
        None => {
            set_last_error(&ComputeError::UnsupportedMetric(metric_index.to_string()).to_string());
            return ptr::null_mut();
        }
    };

    let handle = Box::new(OnTrackEngineHandle {
        engine: MetricEngine::new(metric),
    });
    Box::into_raw(handle)
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `ontrack_engine_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn ontrack_engine_free(engine: *mut OnTrackEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Apply a settings snapshot given as JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `ontrack_engine_new`.
/// - `settings_json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `ontrack_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ontrack_engine_apply_settings(
    engine: *const OnTrackEngineHandle,
    settings_json: *const c_char,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }

    let handle = &*engine;

    let json_str = match cstr_to_string(settings_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid settings string pointer");
            return -1;
        }
    };

    match Settings::from_json(&json_str) {
        Ok(settings) => {
            handle.engine.apply_settings(settings);
            0
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Check whether a settings store modified at `store_timestamp_ms` is newer
/// than the engine's settings.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `ontrack_engine_new`.
/// - Returns 1 if stale, 0 if current, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn ontrack_engine_is_stale(
    engine: *const OnTrackEngineHandle,
    store_timestamp_ms: i64,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }

    i32::from((*engine).engine.is_stale(store_timestamp_ms))
}

/// Render one view for a reading taken at `timestamp_ms` in `timezone`.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `ontrack_engine_new`.
/// - `view_kind` ("card", "complication", "tile" or "detail") and `timezone`
///   (IANA name) must be valid null-terminated C strings.
/// - Returns a newly allocated JSON string that must be freed with `ontrack_free_string`.
/// - Returns NULL on error; call `ontrack_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ontrack_engine_render(
    engine: *const OnTrackEngineHandle,
    view_kind: *const c_char,
    achieved: f64,
    timestamp_ms: i64,
    timezone: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }

    let handle = &*engine;

    let kind_str = match cstr_to_string(view_kind) {
        Some(s) => s,
        None => {
            set_last_error("Invalid view kind string pointer");
            return ptr::null_mut();
        }
    };

    let tz_str = match cstr_to_string(timezone) {
        Some(s) => s,
        None => {
            set_last_error("Invalid timezone string pointer");
            return ptr::null_mut();
        }
    };

    let prepared = kind_str.parse::<ViewKind>().and_then(|kind| {
        let tz = parse_timezone(&tz_str)?;
        Ok((kind, instant_from_millis(timestamp_ms, tz)?))
    });

    match prepared {
        Ok((kind, instant)) => {
            let engine = &handle.engine;
            let response =
                ViewResponse::from_result(engine.metric(), engine.render(kind, achieved, &instant));
            json_to_cstr(&response)
        }
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Projected track at `timestamp_ms` in `timezone`.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `ontrack_engine_new`.
/// - `timezone` must be a valid null-terminated C string.
/// - Returns a newly allocated JSON string that must be freed with `ontrack_free_string`.
/// - Returns NULL on error; call `ontrack_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn ontrack_engine_projected_track(
    engine: *const OnTrackEngineHandle,
    timestamp_ms: i64,
    timezone: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }

    let handle = &*engine;

    let tz_str = match cstr_to_string(timezone) {
        Some(s) => s,
        None => {
            set_last_error("Invalid timezone string pointer");
            return ptr::null_mut();
        }
    };

    let instant = match parse_timezone(&tz_str).and_then(|tz| instant_from_millis(timestamp_ms, tz)) {
        Ok(instant) => instant,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let engine = &handle.engine;
    json_to_cstr(&ViewResponse::from_result(
        engine.metric(),
        engine.projected_track(&instant),
    ))
}

/// Format a native-unit value in the user's display unit.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `ontrack_engine_new`.
/// - Returns a newly allocated string that must be freed with `ontrack_free_string`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn ontrack_engine_format_number(
    engine: *const OnTrackEngineHandle,
    value: f64,
    use_thousands_separator: bool,
    force_sign: bool,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }

    let text = (*engine)
        .engine
        .format_number(value, use_thousands_separator, force_sign);
    string_to_cstr(&text)
}

/// Format a native-unit value with separators and unit abbreviation.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `ontrack_engine_new`.
/// - Returns a newly allocated string that must be freed with `ontrack_free_string`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn ontrack_engine_format_number_with_unit(
    engine: *const OnTrackEngineHandle,
    value: f64,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }

    string_to_cstr(&(*engine).engine.format_number_with_unit(value))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by OnTrack functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an OnTrack function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn ontrack_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next OnTrack function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn ontrack_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the OnTrack library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn ontrack_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
