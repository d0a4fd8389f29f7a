//! # asherah-bridge
//!
//! A C-ABI bridge between managed-runtime clients and a native
//! application-encryption engine.
//!
//! The bridge owns everything that is hard at the language boundary: opaque
//! handles instead of pointers, a length-prefixed buffer protocol, a
//! per-partition session cache, one-time native library discovery, and a
//! last-error side channel. Cryptography stays behind the [`engine`] traits.
//!
//! ## Features
//!
//! | Feature | Description | Default |
//! |:--------|:------------|:-------:|
//! | `ffi` | `asherah_bridge_*` exports and C header generation | Yes |
//!
//! ## Quick Start
//!
//! ```rust
//! use asherah_bridge::{Bridge, EngineConfig};
//!
//! let bridge = Bridge::builtin();
//! let config = EngineConfig::new("svc", "prod", "memory", "static")
//!     .with_static_master_key_hex("41".repeat(32));
//! bridge.setup(&config).unwrap();
//!
//! let session = bridge.acquire_session("tenant-1").unwrap();
//! let record = bridge.encrypt(session, b"Hello, World!").unwrap();
//! assert_eq!(bridge.decrypt(session, &record).unwrap(), b"Hello, World!");
//!
//! bridge.shutdown().unwrap();
//! ```
//!
//! ## Buffer Format
//!
//! `[length: u32 LE][capacity: u32 LE][payload: capacity bytes]`, of which the
//! first `length` payload bytes are meaningful.

pub mod bridge;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod handles;
pub mod loader;
pub mod metrics;
pub mod session_cache;

pub use bridge::Bridge;
pub use buffer::{Buffer, estimate_output_size};
pub use config::EngineConfig;
pub use engine::{BuiltinBackend, DylibBackend, EngineBackend, NativeEngine, NativeSession};
pub use error::{BridgeError, BridgeResult, ErrorChannel};
pub use handles::{Handle, HandleTable, NULL_HANDLE};
pub use loader::{LoaderEnv, NativeLoader};
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use session_cache::{CacheOutcome, SessionCache};

// C FFI layer (feature-gated)
#[cfg(feature = "ffi")]
pub mod ffi;
#[cfg(feature = "ffi")]
pub use ffi::BridgeStatus;
