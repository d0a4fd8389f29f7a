//! Length-prefixed buffers for variable-length data crossing the C boundary.
//!
//! Wire format: `[length: u32 LE][capacity: u32 LE][payload: capacity bytes]`.
//! Only the first `length` payload bytes are meaningful. Input buffers have
//! `capacity == length`; output buffers are allocated with a capacity the
//! callee may fill, and the callee records how much it wrote in `length`.
//!
//! # Ownership across the boundary
//!
//! Buffers handed to foreign callers are registered in a live-allocation
//! registry (same approach as handle validity tracking). Freeing consults the
//! registry first, so null, foreign, and already-freed pointers are ignored
//! instead of corrupting the allocator.

use crate::error::{BridgeError, BridgeResult};
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex, PoisonError};

/// Header size: two little-endian u32 values, no padding.
pub const HEADER_SIZE: usize = 8;

/// Fixed slack added to every output estimate so cipher expansion and record
/// framing never outgrow the allocation.
pub const SAFETY_FLOOR: usize = 1024;

/// Wrapped data-row key, created timestamp and parent key metadata.
const KEY_OVERHEAD: usize = 256;
/// Field names, quoting and braces of the encrypted record.
const JSON_OVERHEAD: usize = 128;
/// Partition id is embedded in the parent key id alongside fixed prefixes.
const PARTITION_KEY_OVERHEAD: usize = 64;
/// Estimates are rounded up to this granularity.
const ESTIMATE_ALIGNMENT: usize = 256;

/// Addresses of buffers currently owned by foreign callers, mapped to the
/// full allocation size needed to reconstruct them.
static LIVE_BUFFERS: LazyLock<Mutex<HashMap<usize, usize>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// An owned length-prefixed buffer (header and payload region in one block).
#[derive(Clone, PartialEq, Eq)]
pub struct Buffer {
    raw: Box<[u8]>,
}

impl Buffer {
    /// Encode `bytes` as an input buffer (`length == capacity == bytes.len()`).
    pub fn encode(bytes: &[u8]) -> BridgeResult<Self> {
        let mut buffer = Self::allocate_output(bytes.len())?;
        buffer.write(bytes)?;
        Ok(buffer)
    }

    /// Allocate an output buffer with `length = 0` and a zeroed payload region.
    pub fn allocate_output(capacity: usize) -> BridgeResult<Self> {
        let capacity_u32 = u32::try_from(capacity).map_err(|_| {
            BridgeError::invalid(format!("buffer capacity {capacity} exceeds u32 range"))
        })?;
        let mut raw = vec![0u8; HEADER_SIZE + capacity].into_boxed_slice();
        raw[4..8].copy_from_slice(&capacity_u32.to_le_bytes());
        Ok(Self { raw })
    }

    /// Declared payload length.
    pub fn length(&self) -> u32 {
        read_u32(&self.raw[0..4])
    }

    /// Declared payload capacity.
    pub fn capacity(&self) -> u32 {
        read_u32(&self.raw[4..8])
    }

    /// Copy `bytes` into the payload region and set `length`.
    pub fn write(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        let capacity = self.capacity() as usize;
        if bytes.len() > capacity {
            return Err(BridgeError::invalid(format!(
                "output of {} bytes exceeds buffer capacity {capacity}",
                bytes.len()
            )));
        }
        self.raw[HEADER_SIZE..HEADER_SIZE + bytes.len()].copy_from_slice(bytes);
        // Fits: bytes.len() <= capacity <= u32::MAX
        self.raw[0..4].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        Ok(())
    }

    /// The meaningful payload bytes.
    pub fn payload(&self) -> BridgeResult<&[u8]> {
        decode_wire(&self.raw)
    }

    /// Decode into an owned byte vector.
    pub fn decode(&self) -> BridgeResult<Vec<u8>> {
        self.payload().map(<[u8]>::to_vec)
    }

    /// Full wire representation (header + payload region).
    pub fn as_wire(&self) -> &[u8] {
        &self.raw
    }

    /// Parse and copy a wire-format region, validating its header.
    pub fn from_wire(wire: &[u8]) -> BridgeResult<Self> {
        let payload = decode_wire(wire)?;
        Self::encode(payload)
    }

    /// Hand ownership to a foreign caller. The pointer addresses the header
    /// and must be released with [`free_raw`].
    pub fn into_raw(self) -> *mut u8 {
        let len = self.raw.len();
        let ptr = Box::into_raw(self.raw) as *mut u8;
        LIVE_BUFFERS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ptr as usize, len);
        ptr
    }

    /// Reclaim a buffer previously produced by [`Buffer::into_raw`].
    ///
    /// Returns `None` for null, unknown, or already-reclaimed pointers.
    ///
    /// # Safety
    /// If `Some` is returned the pointer is consumed and must not be used again.
    pub unsafe fn from_raw(ptr: *mut u8) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        let len = LIVE_BUFFERS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(ptr as usize))?;
        // SAFETY: the address was registered by into_raw with this exact length
        let raw = unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)) };
        Some(Self { raw })
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("length", &self.length())
            .field("capacity", &self.capacity())
            .finish()
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Validate a wire-format region and borrow its meaningful payload.
pub fn decode_wire(wire: &[u8]) -> BridgeResult<&[u8]> {
    if wire.len() < HEADER_SIZE {
        return Err(BridgeError::invalid(format!(
            "buffer of {} bytes is shorter than the {HEADER_SIZE}-byte header",
            wire.len()
        )));
    }
    let length = read_u32(&wire[0..4]) as usize;
    let capacity = read_u32(&wire[4..8]) as usize;
    if length > capacity {
        return Err(BridgeError::CorruptBuffer {
            length: length as u64,
            capacity: capacity as u64,
        });
    }
    let available = wire.len() - HEADER_SIZE;
    if length > available {
        return Err(BridgeError::CorruptBuffer {
            length: length as u64,
            capacity: available as u64,
        });
    }
    Ok(&wire[HEADER_SIZE..HEADER_SIZE + length])
}

/// Copy the payload out of a foreign wire-format buffer.
///
/// # Safety
/// `ptr` must be null or point to a readable header followed by at least
/// `capacity` payload bytes, valid for the duration of the call.
pub unsafe fn read_raw(ptr: *const u8) -> BridgeResult<Vec<u8>> {
    if ptr.is_null() {
        return Err(BridgeError::invalid("null buffer pointer"));
    }
    // SAFETY: caller guarantees the header is readable
    let header = unsafe { std::slice::from_raw_parts(ptr, HEADER_SIZE) };
    let length = read_u32(&header[0..4]) as usize;
    let capacity = read_u32(&header[4..8]) as usize;
    if length > capacity {
        return Err(BridgeError::CorruptBuffer {
            length: length as u64,
            capacity: capacity as u64,
        });
    }
    if length == 0 {
        return Ok(Vec::new());
    }
    // SAFETY: length <= capacity, and the caller guarantees capacity bytes follow
    let payload = unsafe { std::slice::from_raw_parts(ptr.add(HEADER_SIZE), length) };
    Ok(payload.to_vec())
}

/// Write `bytes` into a caller-owned output buffer and set its `length`.
///
/// Fails `InvalidArgument` without touching the buffer when `bytes` does not
/// fit the declared capacity.
///
/// # Safety
/// `ptr` must be null or point to a writable header followed by at least
/// `capacity` writable payload bytes, not aliased for the duration of the call.
pub unsafe fn write_raw(ptr: *mut u8, bytes: &[u8]) -> BridgeResult<()> {
    if ptr.is_null() {
        return Err(BridgeError::invalid("null output buffer pointer"));
    }
    // SAFETY: caller guarantees the header is readable
    let header = unsafe { std::slice::from_raw_parts(ptr.cast_const(), HEADER_SIZE) };
    let length = read_u32(&header[0..4]) as usize;
    let capacity = read_u32(&header[4..8]) as usize;
    if length > capacity {
        return Err(BridgeError::CorruptBuffer {
            length: length as u64,
            capacity: capacity as u64,
        });
    }
    if bytes.len() > capacity {
        return Err(BridgeError::invalid(format!(
            "output of {} bytes exceeds buffer capacity {capacity}",
            bytes.len()
        )));
    }
    // SAFETY: bytes.len() <= capacity, and the caller guarantees capacity
    // writable bytes follow the header
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(HEADER_SIZE), bytes.len());
        std::ptr::copy_nonoverlapping((bytes.len() as u32).to_le_bytes().as_ptr(), ptr, 4);
    }
    Ok(())
}

/// Release a buffer handed out by the bridge. Returns whether anything was
/// freed; null, foreign, and already-freed pointers are a no-op.
///
/// # Safety
/// `ptr` must be null or a pointer that is not concurrently used elsewhere.
pub unsafe fn free_raw(ptr: *mut u8) -> bool {
    // SAFETY: from_raw validates against the registry before reconstructing
    unsafe { Buffer::from_raw(ptr) }.is_some()
}

/// Number of bridge-allocated buffers currently owned by foreign callers.
pub fn live_buffer_count() -> usize {
    LIVE_BUFFERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .len()
}

/// Estimate the output capacity needed to encrypt `plaintext_len` bytes for a
/// partition id of `partition_len` bytes.
///
/// Pure, deterministic and non-decreasing in `plaintext_len`.
pub fn estimate_output_size(plaintext_len: usize, partition_len: usize) -> usize {
    let base64_len = (plaintext_len.saturating_mul(4) / 3).saturating_add(4);
    let total = base64_len
        .saturating_add(KEY_OVERHEAD)
        .saturating_add(JSON_OVERHEAD)
        .saturating_add(partition_len)
        .saturating_add(PARTITION_KEY_OVERHEAD)
        .saturating_add(HEADER_SIZE)
        .saturating_add(SAFETY_FLOOR);
    total.div_ceil(ESTIMATE_ALIGNMENT).saturating_mul(ESTIMATE_ALIGNMENT)
}
