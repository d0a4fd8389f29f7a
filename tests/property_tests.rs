//! Property-Based Tests with proptest
//!
//! Deterministic property tests with automatic shrinking, complementing the
//! `buffer_decode` fuzz target.
//!
//! **Test Organization**:
//! - `buffer_properties`: codec invariants (roundtrip, header, estimate monotonicity)
//! - `handle_properties`: handle uniqueness across add/remove sequences
//! - `bridge_properties`: encrypt/decrypt roundtrip through the built-in engine

mod common;

use proptest::prelude::*;

use asherah_bridge::buffer::{self, Buffer, HEADER_SIZE, SAFETY_FLOOR};

mod buffer_properties {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property: decode(encode(b)) == b, including the empty payload
        #[test]
        fn prop_roundtrip_preserves_data(data in prop::collection::vec(any::<u8>(), 0..4_096)) {
            let encoded = Buffer::encode(&data).unwrap();
            prop_assert_eq!(encoded.length() as usize, data.len());
            prop_assert_eq!(encoded.capacity() as usize, data.len());
            prop_assert_eq!(encoded.as_wire().len(), HEADER_SIZE + data.len());
            prop_assert_eq!(encoded.decode().unwrap(), data);
        }

        /// Property: writing into a larger output buffer keeps the capacity
        /// and exposes exactly the written bytes
        #[test]
        fn prop_output_buffer_write(
            data in prop::collection::vec(any::<u8>(), 0..1_024),
            slack in 0usize..512,
        ) {
            let mut out = Buffer::allocate_output(data.len() + slack).unwrap();
            out.write(&data).unwrap();
            prop_assert_eq!(out.capacity() as usize, data.len() + slack);
            prop_assert_eq!(out.payload().unwrap(), data.as_slice());
        }

        /// Property: any header with length > capacity is rejected
        #[test]
        fn prop_length_over_capacity_rejected(capacity in 0u32..1_000, excess in 1u32..1_000) {
            let mut wire = Vec::new();
            wire.extend_from_slice(&(capacity + excess).to_le_bytes());
            wire.extend_from_slice(&capacity.to_le_bytes());
            wire.resize(HEADER_SIZE + capacity as usize, 0);
            let is_corrupt = matches!(
                buffer::decode_wire(&wire),
                Err(asherah_bridge::BridgeError::CorruptBuffer { .. })
            );
            prop_assert!(is_corrupt);
        }

        /// Property: arbitrary bytes never panic the decoder
        #[test]
        fn prop_decode_arbitrary_never_panics(wire in prop::collection::vec(any::<u8>(), 0..64)) {
            let _ = buffer::decode_wire(&wire);
        }

        /// Property: estimate is deterministic, has the floor, and is
        /// non-decreasing in plaintext length
        #[test]
        fn prop_estimate_monotonic(
            len in 0usize..10_000_000,
            delta in 0usize..100_000,
            partition_len in 0usize..1_024,
        ) {
            let a = buffer::estimate_output_size(len, partition_len);
            let b = buffer::estimate_output_size(len + delta, partition_len);
            prop_assert!(a >= SAFETY_FLOOR);
            prop_assert!(b >= a);
            prop_assert_eq!(a, buffer::estimate_output_size(len, partition_len));
        }
    }
}

mod handle_properties {
    use super::*;
    use asherah_bridge::{HandleTable, NULL_HANDLE};
    use std::collections::HashSet;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: across any add/remove sequence, live handles are
        /// distinct and no handle value is ever issued twice
        #[test]
        fn prop_handles_never_reused(ops in prop::collection::vec(any::<bool>(), 1..200)) {
            let table = HandleTable::new("prop");
            let mut live = Vec::new();
            let mut issued = HashSet::new();

            for add in ops {
                if add || live.is_empty() {
                    let handle = table.add(());
                    prop_assert_ne!(handle, NULL_HANDLE);
                    prop_assert!(issued.insert(handle), "handle {} issued twice", handle);
                    live.push(handle);
                } else {
                    let handle = live.remove(0);
                    prop_assert!(table.remove(handle).is_some());
                    prop_assert!(table.remove(handle).is_none());
                }
            }
            prop_assert_eq!(table.len(), live.len());
        }
    }
}

mod bridge_properties {
    use super::*;
    use common::fixtures::configured_bridge;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Property: encrypt → decrypt returns the original bytes for any
        /// payload and partition
        #[test]
        fn prop_encrypt_decrypt_roundtrip(
            data in prop::collection::vec(any::<u8>(), 0..2_048),
            partition in "[a-zA-Z0-9_-]{1,40}",
        ) {
            let (bridge, _) = configured_bridge();
            let record = bridge.encrypt_for_partition(&partition, &data).unwrap();
            prop_assert!(record.len() <= buffer::estimate_output_size(data.len(), partition.len()));
            prop_assert_eq!(bridge.decrypt_for_partition(&partition, &record).unwrap(), data);
        }
    }
}
