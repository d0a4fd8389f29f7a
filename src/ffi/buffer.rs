//! C FFI wrappers for length-prefixed buffers.
//!
//! Buffers returned by the bridge (encrypt/decrypt output and the allocation
//! helpers here) are owned by the caller and released with
//! `asherah_bridge_buffer_free`. Freeing null, a foreign pointer, or an
//! already-freed buffer is a no-op.

use crate::bridge::Bridge;
use crate::buffer::{self, Buffer};
use crate::ffi::bridge::{global, guard, reject};
use crate::ffi::error::BridgeStatus;
use std::panic::catch_unwind;
use std::slice;

pub(crate) fn buffer_alloc_impl(bridge: &Bridge, capacity: usize) -> *mut u8 {
    match Buffer::allocate_output(capacity) {
        Ok(buffer) => buffer.into_raw(),
        Err(e) => {
            reject(bridge, e);
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// `data` must be null (only when `len` is 0) or readable for `len` bytes.
pub(crate) unsafe fn buffer_from_bytes_impl(
    bridge: &Bridge,
    data: *const u8,
    len: usize,
) -> *mut u8 {
    let bytes: &[u8] = if len == 0 {
        &[]
    } else if data.is_null() {
        reject(bridge, crate::error::BridgeError::invalid("null data pointer"));
        return std::ptr::null_mut();
    } else {
        // SAFETY: caller guarantees data is readable for len bytes
        unsafe { slice::from_raw_parts(data, len) }
    };
    match Buffer::encode(bytes) {
        Ok(buffer) => buffer.into_raw(),
        Err(e) => {
            reject(bridge, e);
            std::ptr::null_mut()
        }
    }
}

/// Allocate an empty output buffer (`length = 0`) with room for `capacity`
/// payload bytes.
///
/// # Returns
/// Pointer to the buffer header, or null if `capacity` exceeds the u32 range.
#[unsafe(no_mangle)]
pub extern "C" fn asherah_bridge_buffer_alloc(capacity: usize) -> *mut u8 {
    let bridge = global();
    let mut out = std::ptr::null_mut();
    guard(bridge, || {
        out = buffer_alloc_impl(bridge, capacity);
        BridgeStatus::Ok
    });
    out
}

/// Copy `len` bytes into a new input buffer (`length == capacity == len`).
///
/// # Safety
/// `data` must be readable for `len` bytes; it may be null only when `len` is 0.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn asherah_bridge_buffer_from_bytes(data: *const u8, len: usize) -> *mut u8 {
    let bridge = global();
    let mut out = std::ptr::null_mut();
    guard(bridge, || {
        out = unsafe { buffer_from_bytes_impl(bridge, data, len) };
        BridgeStatus::Ok
    });
    out
}

/// Release a buffer returned by the bridge.
///
/// # Safety
/// `buffer` must not be used after this call and must not be freed
/// concurrently from another thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn asherah_bridge_buffer_free(buffer: *mut u8) {
    let _ = catch_unwind(|| {
        // Registry lookup rejects null, foreign and already-freed pointers
        unsafe { buffer::free_raw(buffer) }
    });
}

/// Conservative encrypt output capacity for a plaintext and partition id.
///
/// Pure and non-decreasing in `plaintext_len`; includes a fixed safety floor.
#[unsafe(no_mangle)]
pub extern "C" fn asherah_bridge_estimate_output_size(
    plaintext_len: usize,
    partition_len: usize,
) -> usize {
    buffer::estimate_output_size(plaintext_len, partition_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_then_free() {
        let bridge = Bridge::builtin();
        let ptr = buffer_alloc_impl(&bridge, 64);
        assert!(!ptr.is_null());
        let buffer = unsafe { Buffer::from_raw(ptr) }.unwrap();
        assert_eq!(buffer.length(), 0);
        assert_eq!(buffer.capacity(), 64);
    }

    #[test]
    fn test_from_bytes_copies_payload() {
        let bridge = Bridge::builtin();
        let ptr = unsafe { buffer_from_bytes_impl(&bridge, b"abc".as_ptr(), 3) };
        assert_eq!(unsafe { buffer::read_raw(ptr) }.unwrap(), b"abc");
        unsafe { asherah_bridge_buffer_free(ptr) };
    }

    #[test]
    fn test_from_bytes_empty_with_null() {
        let bridge = Bridge::builtin();
        let ptr = unsafe { buffer_from_bytes_impl(&bridge, std::ptr::null(), 0) };
        assert!(!ptr.is_null());
        assert!(unsafe { buffer::read_raw(ptr) }.unwrap().is_empty());
        unsafe { asherah_bridge_buffer_free(ptr) };
    }

    #[test]
    fn test_from_bytes_null_with_length_rejected() {
        let bridge = Bridge::builtin();
        let ptr = unsafe { buffer_from_bytes_impl(&bridge, std::ptr::null(), 4) };
        assert!(ptr.is_null());
        assert!(bridge.last_error().unwrap().contains("null data pointer"));
    }

    #[test]
    fn test_double_free_is_noop() {
        let ptr = Buffer::encode(b"x").unwrap().into_raw();
        unsafe {
            asherah_bridge_buffer_free(ptr);
            asherah_bridge_buffer_free(ptr);
            asherah_bridge_buffer_free(std::ptr::null_mut());
        }
    }
}
