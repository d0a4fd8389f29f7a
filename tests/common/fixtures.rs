//! Test fixtures and constants for asherah-bridge tests.

#![allow(dead_code)]

use asherah_bridge::{Bridge, EngineConfig, Handle};

// ============================================================================
// Configuration
// ============================================================================

pub const SERVICE: &str = "svc";
pub const PRODUCT: &str = "prod";

/// 64 hex chars of "41": a 32-byte master key of 0x41 bytes
pub fn master_key_hex() -> String {
    "41".repeat(32)
}

/// JSON config record for the memory metastore and static KMS
pub fn config_json() -> String {
    format!(
        concat!(
            r#"{{"ServiceName":"{service}","ProductID":"{product}","#,
            r#""Metastore":"memory","KMS":"static","StaticMasterKeyHex":"{key}"}}"#
        ),
        service = SERVICE,
        product = PRODUCT,
        key = master_key_hex()
    )
}

pub fn test_config() -> EngineConfig {
    EngineConfig::new(SERVICE, PRODUCT, "memory", "static")
        .with_static_master_key_hex(master_key_hex())
}

// ============================================================================
// Payloads
// ============================================================================

pub const PARTITION_1: &str = "test-partition-1";
pub const PARTITION_2: &str = "test-partition-2";

pub const EMPTY_DATA: &[u8] = b"";
pub const HELLO: &[u8] = b"Hello, World!";

/// Unicode data - validates UTF-8 payloads pass through untouched
pub const UNICODE_DATA: &[u8] = "Hello 世界 🚀 Rust".as_bytes();

/// Deterministic non-repeating bytes (simple LCG, not crypto-secure)
pub fn generate_data(size: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..size)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 56) as u8
        })
        .collect()
}

// ============================================================================
// Bridges
// ============================================================================

/// Built-in bridge with the standard test engine configured
pub fn configured_bridge() -> (Bridge, Handle) {
    let bridge = Bridge::builtin();
    let engine = bridge.setup(&test_config()).expect("setup should succeed");
    (bridge, engine)
}

/// Built-in bridge with session caching disabled
pub fn uncached_bridge() -> (Bridge, Handle) {
    let bridge = Bridge::builtin();
    let engine = bridge
        .setup(&test_config().with_session_caching(false))
        .expect("setup should succeed");
    (bridge, engine)
}
