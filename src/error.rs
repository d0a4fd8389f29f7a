//! Error taxonomy and the last-error side channel.
//!
//! The C boundary can only return a status code, so every fallible bridge call
//! also records a human-readable message in an [`ErrorChannel`]. Internally the
//! crate propagates [`BridgeError`] with `?`; conversion to status + message
//! happens only in the `ffi` layer.

use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Errors surfaced by the bridge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Empty partition id, null pointer, malformed buffer or config.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted before a successful setup.
    #[error("engine not configured; call setup first")]
    NotConfigured,

    /// Setup called while an engine is already live.
    #[error("setup already completed; call shutdown first")]
    AlreadyConfigured,

    /// Unknown, stale or already-freed handle.
    #[error("invalid handle: {0}")]
    InvalidHandle(u64),

    /// Failure reported by the native engine (KMS, metastore, authentication).
    #[error("native engine failure: {0}")]
    NativeFailure(String),

    /// No candidate native library could be loaded.
    #[error("load failure: {0}")]
    LoadFailure(String),

    /// Buffer header claims more payload than its capacity or region holds.
    #[error("corrupt buffer: length {length} exceeds capacity {capacity}")]
    CorruptBuffer {
        /// Declared payload length
        length: u64,
        /// Declared (or available) capacity
        capacity: u64,
    },
}

impl BridgeError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        BridgeError::InvalidArgument(msg.into())
    }

    pub(crate) fn native(msg: impl Into<String>) -> Self {
        BridgeError::NativeFailure(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Single most-recent-error slot shared by every thread using a bridge.
///
/// Messages are not correlated per call or per thread: a caller must read the
/// message immediately after observing a failure, and a concurrent failure on
/// another thread may overwrite it first.
#[derive(Debug, Default)]
pub struct ErrorChannel {
    slot: Mutex<Option<String>>,
}

impl ErrorChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot with the message for `err`.
    pub fn record(&self, err: &BridgeError) {
        self.record_message(err.to_string());
    }

    pub fn record_message(&self, message: impl Into<String>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    /// Clear the slot after a successful call.
    pub fn clear(&self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Copy of the most recent message, if any.
    pub fn last(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the outcome of a fallible call and hand it back unchanged.
    pub fn track<T>(&self, result: BridgeResult<T>) -> BridgeResult<T> {
        match &result {
            Ok(_) => self.clear(),
            Err(e) => self.record(e),
        }
        result
    }
}
