//! The native engine seam.
//!
//! Everything cryptographic lives behind these traits: the bridge only creates,
//! registers, drives and frees the objects they produce. Disposal is `Drop`;
//! the bridge controls ordering (sessions before their engine).
//!
//! Two backends ship with the crate:
//! - [`dylib::DylibBackend`]: a native library found by the loader, driven
//!   through its exported `asherah_*` symbols
//! - [`builtin::BuiltinBackend`]: an in-process engine limited to the
//!   `memory` metastore and `static` KMS

pub mod aead;
pub mod builtin;
pub mod dylib;

use crate::config::EngineConfig;
use crate::error::BridgeResult;

pub use builtin::BuiltinBackend;
pub use dylib::DylibBackend;

/// Constructs engines from validated configuration.
pub trait EngineBackend: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Build a long-lived engine. Both the JSON and the environment setup paths
    /// funnel into this call.
    fn new_engine(&self, config: &EngineConfig) -> BridgeResult<Box<dyn NativeEngine>>;
}

/// A configured encryption service (key hierarchy, metastore, KMS client).
pub trait NativeEngine: Send + Sync {
    /// Construct a session for `partition`. May be slow (key-hierarchy
    /// derivation), so callers must not hold locks across it.
    fn new_session(&self, partition: &str) -> BridgeResult<Box<dyn NativeSession>>;
}

/// A per-partition cryptographic context.
pub trait NativeSession: Send + Sync {
    /// Encrypt `plaintext` into an opaque record.
    fn encrypt(&self, plaintext: &[u8]) -> BridgeResult<Vec<u8>>;

    /// Decrypt an opaque record produced by [`NativeSession::encrypt`].
    fn decrypt(&self, record: &[u8]) -> BridgeResult<Vec<u8>>;
}
