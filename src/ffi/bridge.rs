//! C FFI wrappers for the bridge operations.
//!
//! Every function:
//! - runs inside `catch_unwind`, so panics never cross the boundary
//! - returns a [`BridgeStatus`] (0 on success) and records failure detail in
//!   the last-error slot
//! - takes variable-length input as length-prefixed buffers
//!   (`[length u32 LE][capacity u32 LE][payload]`) and writes variable-length
//!   output into a caller-owned buffer of the same shape, bounded by its
//!   declared capacity
//!
//! The exported functions drive one process-wide [`Bridge`] whose backend is
//! the native library found by discovery. The `*_impl` functions take the
//! bridge explicitly.

use crate::bridge::Bridge;
use crate::buffer;
use crate::error::{BridgeError, BridgeResult};
use crate::ffi::error::BridgeStatus;
use crate::handles::{Handle, NULL_HANDLE};
use std::ffi::{CString, c_char};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::LazyLock;

static BRIDGE: LazyLock<Bridge> = LazyLock::new(Bridge::from_env);

static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// The process-wide bridge behind the exported functions.
pub fn global() -> &'static Bridge {
    &BRIDGE
}

/// Run `f` with panic containment. A panic is recorded as a native failure.
pub(crate) fn guard<F>(bridge: &Bridge, f: F) -> BridgeStatus
where
    F: FnOnce() -> BridgeStatus,
{
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        let err = BridgeError::native("panic inside bridge call");
        bridge.record_error(&err);
        BridgeStatus::from(&err)
    })
}

/// Record an error detected at the boundary and convert it.
pub(crate) fn reject(bridge: &Bridge, err: BridgeError) -> BridgeStatus {
    bridge.record_error(&err);
    BridgeStatus::from(&err)
}

/// Status for a result whose error the bridge has already recorded.
fn status<T>(result: &BridgeResult<T>) -> BridgeStatus {
    match result {
        Ok(_) => BridgeStatus::Ok,
        Err(e) => BridgeStatus::from(e),
    }
}

/// # Safety
/// `ptr` must be null or a readable length-prefixed buffer.
unsafe fn read_string(ptr: *const u8, what: &str) -> BridgeResult<String> {
    let bytes = unsafe { buffer::read_raw(ptr) }
        .map_err(|e| match e {
            BridgeError::InvalidArgument(_) => BridgeError::invalid(format!("null {what} buffer")),
            other => other,
        })?;
    String::from_utf8(bytes).map_err(|_| BridgeError::invalid(format!("{what} is not valid UTF-8")))
}

pub(crate) unsafe fn load_library_impl(bridge: &Bridge, path: *const u8) -> BridgeStatus {
    let path = if path.is_null() {
        None
    } else {
        match unsafe { read_string(path, "library path") } {
            Ok(p) if p.trim().is_empty() => None,
            Ok(p) => Some(PathBuf::from(p)),
            Err(e) => return reject(bridge, e),
        }
    };
    status(&bridge.load_library(path.as_deref()))
}

pub(crate) unsafe fn engine_from_config_impl(
    bridge: &Bridge,
    config_json: *const u8,
    out_handle: *mut Handle,
) -> BridgeStatus {
    if out_handle.is_null() {
        return reject(bridge, BridgeError::invalid("null output handle pointer"));
    }
    unsafe { *out_handle = NULL_HANDLE };
    let json = match unsafe { read_string(config_json, "config JSON") } {
        Ok(json) => json,
        Err(e) => return reject(bridge, e),
    };
    let result = bridge.setup_json(&json);
    if let Ok(handle) = result {
        unsafe { *out_handle = handle };
    }
    status(&result)
}

pub(crate) unsafe fn engine_from_env_impl(
    bridge: &Bridge,
    out_handle: *mut Handle,
) -> BridgeStatus {
    if out_handle.is_null() {
        return reject(bridge, BridgeError::invalid("null output handle pointer"));
    }
    unsafe { *out_handle = NULL_HANDLE };
    let result = bridge.setup_from_env();
    if let Ok(handle) = result {
        unsafe { *out_handle = handle };
    }
    status(&result)
}

pub(crate) unsafe fn session_get_impl(
    bridge: &Bridge,
    engine: Handle,
    partition: *const u8,
    out_handle: *mut Handle,
) -> BridgeStatus {
    if out_handle.is_null() {
        return reject(bridge, BridgeError::invalid("null output handle pointer"));
    }
    unsafe { *out_handle = NULL_HANDLE };
    let partition = match unsafe { read_string(partition, "partition id") } {
        Ok(p) => p,
        Err(e) => return reject(bridge, e),
    };
    let result = bridge.get_session(engine, &partition);
    if let Ok(handle) = result {
        unsafe { *out_handle = handle };
    }
    status(&result)
}

pub(crate) unsafe fn encrypt_impl(
    bridge: &Bridge,
    session: Handle,
    plaintext: *const u8,
    out_buffer: *mut u8,
) -> BridgeStatus {
    if out_buffer.is_null() {
        return reject(bridge, BridgeError::invalid("null output buffer pointer"));
    }
    let plaintext = match unsafe { buffer::read_raw(plaintext) } {
        Ok(bytes) => bytes,
        Err(e) => return reject(bridge, e),
    };
    let record = match bridge.encrypt(session, &plaintext) {
        Ok(record) => record,
        Err(e) => return BridgeStatus::from(&e),
    };
    match unsafe { buffer::write_raw(out_buffer, &record) } {
        Ok(()) => BridgeStatus::Ok,
        Err(e) => reject(bridge, e),
    }
}

pub(crate) unsafe fn decrypt_impl(
    bridge: &Bridge,
    session: Handle,
    ciphertext: *const u8,
    out_buffer: *mut u8,
) -> BridgeStatus {
    if out_buffer.is_null() {
        return reject(bridge, BridgeError::invalid("null output buffer pointer"));
    }
    let ciphertext = match unsafe { buffer::read_raw(ciphertext) } {
        Ok(bytes) => bytes,
        Err(e) => return reject(bridge, e),
    };
    let plaintext = match bridge.decrypt(session, &ciphertext) {
        Ok(plaintext) => plaintext,
        Err(e) => return BridgeStatus::from(&e),
    };
    match unsafe { buffer::write_raw(out_buffer, &plaintext) } {
        Ok(()) => BridgeStatus::Ok,
        Err(e) => reject(bridge, e),
    }
}

pub(crate) fn last_error_impl(bridge: &Bridge) -> *mut c_char {
    match bridge.last_error() {
        // Interior NULs would truncate the message on the C side anyway
        Some(message) => CString::new(message.replace('\0', " "))
            .map(CString::into_raw)
            .unwrap_or(std::ptr::null_mut()),
        None => std::ptr::null_mut(),
    }
}

/// Load the native engine library.
///
/// # Parameters
/// - `path`: length-prefixed buffer holding a library file or directory, or
///   null to rerun default discovery
///
/// A no-op success when a library is already loaded. A successful load
/// replaces a cached discovery failure.
///
/// # Safety
/// `path` must be null or point to a valid length-prefixed buffer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn asherah_bridge_load_library(path: *const u8) -> BridgeStatus {
    let bridge = global();
    guard(bridge, || unsafe { load_library_impl(bridge, path) })
}

/// Copy of the most recent error message, or null if the last call succeeded.
///
/// The string is owned by the caller and must be released with
/// `asherah_bridge_free_error_string`. The slot is shared by all threads:
/// read it immediately after observing a failure.
#[unsafe(no_mangle)]
pub extern "C" fn asherah_bridge_last_error() -> *mut c_char {
    catch_unwind(|| last_error_impl(global())).unwrap_or(std::ptr::null_mut())
}

/// Release a string returned by `asherah_bridge_last_error`.
///
/// # Safety
/// `message` must be null or a pointer returned by
/// `asherah_bridge_last_error` that has not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn asherah_bridge_free_error_string(message: *mut c_char) {
    if message.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: produced by CString::into_raw in asherah_bridge_last_error
        drop(unsafe { CString::from_raw(message) });
    }));
}

/// Create the engine from a JSON configuration record.
///
/// # Parameters
/// - `config_json`: length-prefixed buffer with the UTF-8 JSON record
/// - `out_handle`: receives the engine handle (0 on failure)
///
/// # Returns
/// - `Ok` on success
/// - `AlreadyConfigured` if an engine is live; call `asherah_bridge_engine_free` first
/// - `InvalidArgument` for a missing required field or malformed JSON
/// - `LoadFailure` if the native library could not be loaded
///
/// # Safety
/// `config_json` must point to a valid length-prefixed buffer; `out_handle`
/// must be writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn asherah_bridge_engine_from_config(
    config_json: *const u8,
    out_handle: *mut Handle,
) -> BridgeStatus {
    let bridge = global();
    guard(bridge, || unsafe {
        engine_from_config_impl(bridge, config_json, out_handle)
    })
}

/// Create the engine from environment variables.
///
/// # Safety
/// `out_handle` must be writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn asherah_bridge_engine_from_env(out_handle: *mut Handle) -> BridgeStatus {
    let bridge = global();
    guard(bridge, || unsafe { engine_from_env_impl(bridge, out_handle) })
}

/// Shut down the engine: free every cached session, then the engine itself.
///
/// Returns `InvalidHandle` unless `engine` is the configured engine.
#[unsafe(no_mangle)]
pub extern "C" fn asherah_bridge_engine_free(engine: Handle) -> BridgeStatus {
    let bridge = global();
    guard(bridge, || status(&bridge.free_engine(engine)))
}

/// Whether an engine is currently configured.
#[unsafe(no_mangle)]
pub extern "C" fn asherah_bridge_is_configured() -> bool {
    catch_unwind(|| global().is_configured()).unwrap_or(false)
}

/// Get a session for a partition.
///
/// With session caching enabled (the default) the handle is shared and stays
/// owned by the bridge until shutdown; freeing it is a no-op. With caching
/// disabled the caller must free it with `asherah_bridge_session_free`.
///
/// # Safety
/// `partition` must point to a valid length-prefixed buffer; `out_handle`
/// must be writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn asherah_bridge_session_get(
    engine: Handle,
    partition: *const u8,
    out_handle: *mut Handle,
) -> BridgeStatus {
    let bridge = global();
    guard(bridge, || unsafe {
        session_get_impl(bridge, engine, partition, out_handle)
    })
}

/// Release a session handle.
#[unsafe(no_mangle)]
pub extern "C" fn asherah_bridge_session_free(session: Handle) -> BridgeStatus {
    let bridge = global();
    guard(bridge, || status(&bridge.free_session(session)))
}

/// Encrypt a payload into a caller-owned output buffer.
///
/// # Parameters
/// - `session`: session handle
/// - `plaintext`: length-prefixed input buffer (a zero-length payload is valid)
/// - `out_buffer`: length-prefixed output buffer; its header capacity bounds
///   what is written and `length` is set to the record size. Size it with
///   `asherah_bridge_estimate_output_size`.
///
/// # Returns
/// - `Ok` with the record in `out_buffer`
/// - `InvalidArgument` if the record does not fit; `out_buffer` is untouched
/// - `InvalidHandle` for an unknown or released session
///
/// # Safety
/// `plaintext` must point to a valid length-prefixed buffer; `out_buffer`
/// must point to a writable header followed by `capacity` writable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn asherah_bridge_encrypt(
    session: Handle,
    plaintext: *const u8,
    out_buffer: *mut u8,
) -> BridgeStatus {
    let bridge = global();
    guard(bridge, || unsafe {
        encrypt_impl(bridge, session, plaintext, out_buffer)
    })
}

/// Decrypt a record produced by `asherah_bridge_encrypt` for the same partition.
///
/// A plaintext is never longer than its record, so an output buffer with the
/// ciphertext's length as capacity always fits.
///
/// # Safety
/// As for `asherah_bridge_encrypt`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn asherah_bridge_decrypt(
    session: Handle,
    ciphertext: *const u8,
    out_buffer: *mut u8,
) -> BridgeStatus {
    let bridge = global();
    guard(bridge, || unsafe {
        decrypt_impl(bridge, session, ciphertext, out_buffer)
    })
}

/// Crate version as a static NUL-terminated string. Do not free.
#[unsafe(no_mangle)]
pub extern "C" fn asherah_bridge_version() -> *const c_char {
    VERSION.as_ptr().cast()
}
