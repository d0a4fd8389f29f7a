//! C-compatible status codes for the FFI boundary.
//!
//! Callers should only rely on `Ok` versus non-zero; the message from
//! `asherah_bridge_last_error` carries the detail.

use crate::error::BridgeError;

/// Status returned by every fallible `asherah_bridge_*` function.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    /// Operation succeeded
    Ok = 0,
    /// Null pointer, empty partition id, malformed buffer or config
    InvalidArgument = 1,
    /// No engine configured
    NotConfigured = 2,
    /// An engine is already configured
    AlreadyConfigured = 3,
    /// Unknown, stale or already-freed handle
    InvalidHandle = 4,
    /// The native engine reported a failure
    NativeFailure = 5,
    /// The native library could not be loaded
    LoadFailure = 6,
    /// Buffer header length exceeds its capacity
    CorruptBuffer = 7,
}

impl From<&BridgeError> for BridgeStatus {
    fn from(e: &BridgeError) -> Self {
        match e {
            BridgeError::InvalidArgument(_) => BridgeStatus::InvalidArgument,
            BridgeError::NotConfigured => BridgeStatus::NotConfigured,
            BridgeError::AlreadyConfigured => BridgeStatus::AlreadyConfigured,
            BridgeError::InvalidHandle(_) => BridgeStatus::InvalidHandle,
            BridgeError::NativeFailure(_) => BridgeStatus::NativeFailure,
            BridgeError::LoadFailure(_) => BridgeStatus::LoadFailure,
            BridgeError::CorruptBuffer { .. } => BridgeStatus::CorruptBuffer,
        }
    }
}

impl From<BridgeError> for BridgeStatus {
    fn from(e: BridgeError) -> Self {
        BridgeStatus::from(&e)
    }
}
