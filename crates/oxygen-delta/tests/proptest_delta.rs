//! Property tests for the delta codec
//!
//! `decode(old, encode(old, new)) == new` must hold for every relative
//! length: shrinking, equal, growing with `old` embedded, and growing
//! without it.

use oxygen_delta::{DeltaError, decode, encode};
use proptest::prelude::*;

fn bytes(max: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..max)
}

proptest! {
    /// Property: any pair of buffers round-trips
    #[test]
    fn arbitrary_pairs_roundtrip(old in bytes(256), new in bytes(256)) {
        let delta = encode(&old, &new);
        prop_assert_eq!(decode(&old, &delta).unwrap(), new);
    }

    /// Property: equal-length buffers round-trip
    #[test]
    fn equal_length_pairs_roundtrip(
        pairs in prop::collection::vec(any::<(u8, u8)>(), 0..512),
    ) {
        let (old, new): (Vec<u8>, Vec<u8>) = pairs.into_iter().unzip();
        let delta = encode(&old, &new);
        prop_assert_eq!(decode(&old, &delta).unwrap(), new);
    }

    /// Property: a buffer that grew around the old one round-trips
    #[test]
    fn embedded_old_roundtrips(
        prefix in bytes(64),
        old in prop::collection::vec(any::<u8>(), 1..128),
        suffix in bytes(64),
    ) {
        let mut new = prefix.clone();
        new.extend_from_slice(&old);
        new.extend_from_slice(&suffix);

        let delta = encode(&old, &new);
        prop_assert_eq!(decode(&old, &delta).unwrap(), new);
    }

    /// Property: a buffer with a single edit compresses below its size
    #[test]
    fn single_edit_compresses(
        len in 16usize..2048,
        fill in any::<u8>(),
        index in any::<prop::sample::Index>(),
        value in any::<u8>(),
    ) {
        let old = vec![fill; len];
        let mut new = old.clone();
        new[index.index(len)] = value;

        let delta = encode(&old, &new);
        prop_assert!(delta.len() < len);
        prop_assert_eq!(decode(&old, &delta).unwrap(), new);
    }

    /// Property: arbitrary payloads don't crash the decoder
    #[test]
    fn arbitrary_payloads_dont_crash(old in bytes(64), payload in bytes(256)) {
        let _result = decode(&old, &payload);
    }
}

#[test]
fn mismatched_snapshot_is_rejected_not_corrupted() {
    let old = vec![3u8; 32];
    let mut new = old.clone();
    new[5] = 4;
    let delta = encode(&old, &new);

    let stale = vec![3u8; 31];
    assert!(matches!(
        decode(&stale, &delta),
        Err(DeltaError::DeltaLength { expected: 31, actual: 32 })
    ));
}
