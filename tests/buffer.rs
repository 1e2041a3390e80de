//! Integration-level round-trip coverage for `FifoBuffer`, complementing
//! the proptest already beside the implementation.

use pushkit::buffer::FifoBuffer;

#[test]
fn interleaved_add_last_and_remove_first_preserves_fifo_order() {
    let mut buf: FifoBuffer<u32> = FifoBuffer::new(16);
    let mut expected = Vec::new();
    let mut next = 0u32;

    for round in 0..8 {
        for _ in 0..(round + 1) {
            buf.add_last(next);
            expected.push(next);
            next += 1;
        }
        if round % 2 == 1 {
            for _ in 0..round {
                assert_eq!(buf.remove_first(), Some(expected.remove(0)));
            }
        }
    }

    while let Some(expected_front) = expected.first().copied() {
        assert_eq!(buf.remove_first(), Some(expected_front));
        expected.remove(0);
    }
    assert!(buf.is_empty());
}

#[test]
fn remove_until_first_inclusive_drops_everything_when_nothing_matches() {
    let mut buf = FifoBuffer::new(8);
    for i in 0..5 {
        buf.add_last(i);
    }
    let found = buf.remove_until_first_inclusive_or_null(|_| false);
    assert_eq!(found, None);
    assert!(buf.is_empty());
}
