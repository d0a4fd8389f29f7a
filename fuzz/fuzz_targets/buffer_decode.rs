#![no_main]

use arbitrary::Arbitrary;
use asherah_bridge::buffer::{self, Buffer, HEADER_SIZE};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct BufferCase {
    /// Claimed meaningful length
    length: u32,
    /// Claimed capacity
    capacity: u32,
    /// Bytes actually present after the header
    payload: Vec<u8>,
}

fuzz_target!(|case: BufferCase| {
    // Headers lie: length past capacity, capacity past the real allocation,
    // and headers truncated below 8 bytes
    let mut wire = Vec::with_capacity(HEADER_SIZE + case.payload.len());
    wire.extend_from_slice(&case.length.to_le_bytes());
    wire.extend_from_slice(&case.capacity.to_le_bytes());
    wire.extend_from_slice(&case.payload);

    if let Ok(payload) = buffer::decode_wire(&wire) {
        assert_eq!(payload.len(), case.length as usize);
        assert!(case.length <= case.capacity);
        let copy = Buffer::from_wire(&wire).expect("validated wire must re-encode");
        assert_eq!(copy.decode().expect("re-encoded buffer must decode"), payload);
    }

    let cut = case.payload.len() % (HEADER_SIZE + 1);
    let _ = buffer::decode_wire(&wire[..cut.min(wire.len())]);
});
