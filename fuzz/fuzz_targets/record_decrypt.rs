#![no_main]

use asherah_bridge::{Bridge, EngineConfig};
use libfuzzer_sys::fuzz_target;
use std::sync::LazyLock;

static BRIDGE: LazyLock<Bridge> = LazyLock::new(|| {
    let bridge = Bridge::builtin();
    let config = EngineConfig::new("fuzz", "fuzz", "memory", "static")
        .with_static_master_key_hex("41".repeat(32));
    bridge.setup(&config).expect("built-in engine setup");
    bridge
});

fuzz_target!(|record: &[u8]| {
    // Arbitrary bytes are never a valid record for an untouched partition;
    // decrypt must fail cleanly rather than panic
    let result = BRIDGE.decrypt_for_partition("fuzz-partition", record);
    assert!(result.is_err());
});
