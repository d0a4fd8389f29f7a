//! C ABI tests through the exported `asherah_bridge_*` functions.
//!
//! These drive the process-wide bridge, whose backend comes from native
//! library discovery. No test here configures an engine, so every check holds
//! whether or not a native library is installed.

#![cfg(feature = "ffi")]

use asherah_bridge::buffer::{self, Buffer};
use asherah_bridge::ffi::*;
use asherah_bridge::{Handle, NULL_HANDLE};
use std::ffi::CStr;

fn input(bytes: &[u8]) -> Buffer {
    Buffer::encode(bytes).unwrap()
}

#[test]
fn test_malformed_config_is_invalid_argument() {
    let config = input(b"{not json");
    let mut engine: Handle = 42;
    let status =
        unsafe { asherah_bridge_engine_from_config(config.as_wire().as_ptr(), &mut engine) };
    assert_eq!(status, BridgeStatus::InvalidArgument);
    assert_eq!(engine, NULL_HANDLE);
}

#[test]
fn test_missing_required_field_is_invalid_argument() {
    let config = input(br#"{"ServiceName":"svc","Metastore":"memory","KMS":"static"}"#);
    let mut engine = NULL_HANDLE;
    let status =
        unsafe { asherah_bridge_engine_from_config(config.as_wire().as_ptr(), &mut engine) };
    assert_eq!(status, BridgeStatus::InvalidArgument);
}

#[test]
fn test_null_pointers_rejected() {
    let mut engine = NULL_HANDLE;
    assert_eq!(
        unsafe { asherah_bridge_engine_from_config(std::ptr::null(), &mut engine) },
        BridgeStatus::InvalidArgument
    );
    assert_eq!(
        unsafe { asherah_bridge_engine_from_env(std::ptr::null_mut()) },
        BridgeStatus::InvalidArgument
    );
    let partition = input(b"p");
    let partition_ptr = partition.as_wire().as_ptr();
    assert_eq!(
        unsafe { asherah_bridge_session_get(NULL_HANDLE, partition_ptr, std::ptr::null_mut()) },
        BridgeStatus::InvalidArgument
    );
}

#[test]
fn test_session_before_setup() {
    let partition = input(b"test-partition-1");
    let mut session: Handle = 7;
    let status = unsafe {
        asherah_bridge_session_get(NULL_HANDLE, partition.as_wire().as_ptr(), &mut session)
    };
    assert_eq!(status, BridgeStatus::NotConfigured);
    assert_eq!(session, NULL_HANDLE);
    assert!(!asherah_bridge_is_configured());
}

#[test]
fn test_unknown_handles() {
    assert_eq!(asherah_bridge_session_free(u64::MAX), BridgeStatus::InvalidHandle);
    assert_eq!(asherah_bridge_engine_free(u64::MAX), BridgeStatus::InvalidHandle);

    let plaintext = input(b"secret");
    let out = asherah_bridge_buffer_alloc(asherah_bridge_estimate_output_size(6, 1));
    let status = unsafe { asherah_bridge_encrypt(u64::MAX, plaintext.as_wire().as_ptr(), out) };
    assert_eq!(status, BridgeStatus::InvalidHandle);

    let status = unsafe { asherah_bridge_decrypt(u64::MAX, plaintext.as_wire().as_ptr(), out) };
    assert_eq!(status, BridgeStatus::InvalidHandle);

    // Output is left empty on failure
    assert!(unsafe { buffer::read_raw(out) }.unwrap().is_empty());
    unsafe { asherah_bridge_buffer_free(out) };
}

#[test]
fn test_null_output_buffer_rejected() {
    let plaintext = input(b"secret");
    let status = unsafe {
        asherah_bridge_encrypt(u64::MAX, plaintext.as_wire().as_ptr(), std::ptr::null_mut())
    };
    assert_eq!(status, BridgeStatus::InvalidArgument);
}

#[test]
fn test_last_error_is_caller_owned() {
    let mut engine = NULL_HANDLE;
    let status = unsafe { asherah_bridge_engine_from_config(std::ptr::null(), &mut engine) };
    assert_eq!(status, BridgeStatus::InvalidArgument);

    // The slot is shared with concurrently running tests; only check shape
    let message = asherah_bridge_last_error();
    if !message.is_null() {
        assert!(!unsafe { CStr::from_ptr(message) }.to_bytes().is_empty());
        unsafe { asherah_bridge_free_error_string(message) };
    }
    unsafe { asherah_bridge_free_error_string(std::ptr::null_mut()) };
}

#[test]
fn test_buffer_alloc_and_free() {
    let ptr = asherah_bridge_buffer_alloc(256);
    assert!(!ptr.is_null());
    let header = unsafe { std::slice::from_raw_parts(ptr, buffer::HEADER_SIZE) };
    assert_eq!(&header[0..4], &0u32.to_le_bytes());
    assert_eq!(&header[4..8], &256u32.to_le_bytes());
    unsafe {
        asherah_bridge_buffer_free(ptr);
        // Second free is ignored
        asherah_bridge_buffer_free(ptr);
    }
}

#[test]
fn test_buffer_from_bytes() {
    let data = b"Hello, World!";
    let ptr = unsafe { asherah_bridge_buffer_from_bytes(data.as_ptr(), data.len()) };
    assert!(!ptr.is_null());
    assert_eq!(unsafe { buffer::read_raw(ptr) }.unwrap(), data);
    unsafe { asherah_bridge_buffer_free(ptr) };

    assert!(unsafe { asherah_bridge_buffer_from_bytes(std::ptr::null(), 3) }.is_null());
}

#[test]
fn test_foreign_pointer_free_is_noop() {
    let mut foreign = input(b"not ours").as_wire().to_vec();
    unsafe { asherah_bridge_buffer_free(foreign.as_mut_ptr()) };
    assert_eq!(buffer::decode_wire(&foreign).unwrap(), b"not ours");
}

#[test]
fn test_estimate_matches_library() {
    assert_eq!(
        asherah_bridge_estimate_output_size(13, 16),
        asherah_bridge::estimate_output_size(13, 16)
    );
    assert!(asherah_bridge_estimate_output_size(0, 0) >= buffer::SAFETY_FLOOR);
    assert!(asherah_bridge_estimate_output_size(1 << 20, 16) > 1 << 20);
}

#[test]
fn test_version() {
    let version = unsafe { CStr::from_ptr(asherah_bridge_version()) };
    assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
}
