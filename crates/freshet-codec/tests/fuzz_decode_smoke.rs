use std::panic;

use bytes::Bytes;
use freshet_codec::batch::{BatchLimits, MicrobatchBuilder};
use freshet_codec::wire::{unpack_microbatch, unpack_relay_frame};
use freshet_core::{AckRef, BatchKind, QuerySet};

fn xorshift64(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut s = seed.max(1);
    let mut out = vec![0_u8; len];
    for b in &mut out {
        *b = (xorshift64(&mut s) & 0xFF) as u8;
    }
    out
}

fn sample_packed_batch() -> Vec<u8> {
    let mut builder = MicrobatchBuilder::new(
        BatchKind::CombinerRows,
        QuerySet::singleton(11),
        None,
        Vec::new(),
        BatchLimits::default(),
    )
    .expect("builder should construct");
    builder.add_ack(AckRef { slot: 1, tag: 0xABCD });
    builder.add_row(b"some-row-bytes", 0x1234).expect("row fits");
    builder.add_row(b"other-row", 0x5678).expect("row fits");
    builder.pack().expect("batch should pack").to_vec()
}

#[test]
fn fuzz_like_random_inputs_do_not_panic_decoders() {
    for i in 0..2000_u64 {
        let len = ((i as usize) * 73) % 2048;
        let data = random_bytes(0xBAD5EED ^ i, len);

        let batch = panic::catch_unwind(|| unpack_microbatch(Bytes::from(data.clone())));
        assert!(batch.is_ok(), "unpack_microbatch panicked at case {i}");

        let relay = panic::catch_unwind(|| unpack_relay_frame(Bytes::from(data)));
        assert!(relay.is_ok(), "unpack_relay_frame panicked at case {i}");
    }
}

#[test]
fn fuzz_like_mutations_of_valid_batches_do_not_panic() {
    let mut packed = sample_packed_batch();

    for i in 0..512_usize {
        let idx = i % packed.len();
        packed[idx] ^= (i as u8).wrapping_mul(31).wrapping_add(1);
        let data = packed.clone();

        let batch = panic::catch_unwind(|| unpack_microbatch(Bytes::from(data)));
        assert!(
            batch.is_ok(),
            "unpack_microbatch panicked for mutated batch at case {i}",
        );
    }
}
