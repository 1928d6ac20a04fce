use ironvct_transport::{chunkify, Reassembler};
use proptest::prelude::*;

fn reassemble_all(payload: &[u8], max_chunk_len: usize) -> Vec<u8> {
    let chunks = chunkify(payload, max_chunk_len).unwrap();
    let mut reassembler = Reassembler::new(usize::MAX);

    let mut complete = None;
    for chunk in &chunks {
        if let Some(message) = reassembler.process(chunk.header, chunk.data).unwrap() {
            assert!(complete.is_none(), "message completed twice");
            complete = Some(message);
        }
    }

    complete.expect("message completes")
}

proptest! {
    #[test]
    fn reassembly_inverts_fragmentation(
        payload in proptest::collection::vec(any::<u8>(), 0..5000),
        max_chunk_len in 1usize..2048,
    ) {
        prop_assert_eq!(reassemble_all(&payload, max_chunk_len), payload);
    }

    #[test]
    fn no_chunk_exceeds_the_negotiated_size(
        payload in proptest::collection::vec(any::<u8>(), 1..5000),
        max_chunk_len in 1usize..2048,
    ) {
        for chunk in chunkify(&payload, max_chunk_len).unwrap() {
            prop_assert!(chunk.data.len() <= max_chunk_len);
            prop_assert_eq!(chunk.header.total_length as usize, payload.len());
        }
    }
}

#[test]
fn message_sizes_around_the_chunk_boundary() {
    for size in [0, 1, 1599, 1600, 1601, 3200, 10_000] {
        let payload = vec![0xA5; size];
        assert_eq!(reassemble_all(&payload, 1600), payload, "size {size}");
    }
}
