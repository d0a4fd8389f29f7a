//! C FFI layer for asherah-bridge
//!
//! Exposes the bridge as `asherah_bridge_*` functions with `#[repr(C)]`
//! status codes, opaque `u64` handles and length-prefixed buffers. All
//! functions are panic-safe.

pub mod bridge;
pub mod buffer;
pub mod error;

pub use error::BridgeStatus;

// Re-export FFI functions for C clients
pub use bridge::{
    asherah_bridge_decrypt, asherah_bridge_encrypt, asherah_bridge_engine_free,
    asherah_bridge_engine_from_config, asherah_bridge_engine_from_env,
    asherah_bridge_free_error_string, asherah_bridge_is_configured, asherah_bridge_last_error,
    asherah_bridge_load_library, asherah_bridge_session_free, asherah_bridge_session_get,
    asherah_bridge_version, global,
};
pub use buffer::{
    asherah_bridge_buffer_alloc, asherah_bridge_buffer_free, asherah_bridge_buffer_from_bytes,
    asherah_bridge_estimate_output_size,
};
