//! Integration tests for channel transfer semantics.

use gantry_core::buffer::Buffer;
use gantry_core::channel::{Channel, TransferError, FORWARD_INFINITE};
use gantry_core::flags::{ChanFlags, IfFlags};
use gantry_core::endpoint::{Endpoint, IoResult, PipeEndpoint};
use gantry_core::interface::StreamInterface;
use gantry_core::sched::Tick;

fn chan(size: usize) -> Channel {
    Channel::new(Buffer::with_capacity(size))
}

#[test]
fn fifo_no_loss_no_duplication() {
    // Every byte written by the producer is observed by the consumer,
    // exactly once and in order, across many partial transfers.
    let mut ch = chan(32);
    ch.forward(FORWARD_INFINITE);

    let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    let mut written = 0;
    let mut observed = Vec::new();

    while observed.len() < payload.len() {
        // Producer: push whatever fits.
        if written < payload.len() {
            let room = ch.max_input().min(payload.len() - written);
            if room > 0 {
                let n = ch.put_block(&payload[written..written + room]).unwrap();
                written += n;
            }
        }

        // Consumer: drain a few bytes at a time to force wraps.
        let take = ch.output_len().min(7);
        if take > 0 {
            let mut dst = vec![0u8; take];
            assert_eq!(ch.get_block(&mut dst, 0), Ok(take));
            ch.skip_output(take);
            observed.extend_from_slice(&dst);
        }
    }

    assert_eq!(observed, payload);
    assert_eq!(ch.total(), 1000);
}

#[test]
fn region_invariant_holds_under_random_walk() {
    // o + i <= size after any sequence of put/forward/skip.
    let mut ch = chan(16);
    let mut seed = 0x9E37_79B9u32;

    for _ in 0..500 {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        match seed % 3 {
            0 => {
                let n = (seed >> 8) as usize % 8;
                let _ = ch.put_block(&vec![0xA5; n]);
            }
            1 => {
                let n = (seed >> 8) % 8;
                ch.forward(n);
            }
            _ => {
                let n = (seed >> 8) as usize % (ch.output_len() + 1);
                ch.skip_output(n);
            }
        }
        assert!(ch.input_len() + ch.output_len() <= ch.buffer().size());
    }
}

#[test]
fn backpressure_recovers_after_drain() {
    // A block the size of the whole buffer fails while half the space is
    // held by pending output, then succeeds for the freed half.
    let size = 32;
    let mut ch = chan(size);

    ch.put_block(&vec![1u8; size / 2]).unwrap();
    ch.forward((size / 2) as u32);
    assert_eq!(ch.output_len(), size / 2);

    let full = vec![2u8; size];
    assert_eq!(ch.put_block(&full), Err(TransferError::Full));

    // The producing interface records the stall.
    let mut si = StreamInterface::new();
    let mut ep = PipeEndpoint::new();
    ep.feed(&full);
    si.attach_accepted(Box::new(ep));
    si.recv_step(&mut ch, Tick::ZERO);
    assert!(si.flags.contains(IfFlags::WAIT_ROOM));

    // Consumer drains; a half-sized retry now fits.
    ch.skip_output(size / 2);
    assert_eq!(ch.put_block(&full[..size / 2]), Ok(size / 2));
}

#[test]
fn infinite_credit_streams_through() {
    // With unlimited credit the input region never accumulates.
    let mut ch = chan(256);
    ch.forward(FORWARD_INFINITE);

    let chunk = [0x5Au8; 100];
    let mut drained = 0u64;
    for _ in 0..100 {
        ch.put_block(&chunk).unwrap();
        assert_eq!(ch.input_len(), 0, "credit consumes input as it arrives");
        let pending = ch.output_len();
        ch.skip_output(pending);
        drained += pending as u64;
    }

    assert_eq!(ch.total(), 10_000);
    assert_eq!(drained, 10_000);
}

#[test]
fn shut_sides_reject_transfers() {
    let mut ch = chan(16);
    ch.put_block(b"tail").unwrap();
    ch.apply_shutr();
    assert_eq!(ch.put_block(b"x"), Err(TransferError::Closed));

    ch.forward(4);
    ch.apply_shutw();
    let mut dst = [0u8; 4];
    assert_eq!(ch.get_block(&mut dst, 0), Ok(4), "already-promoted bytes stay readable");
    assert_eq!(ch.get_block(&mut dst, 4), Err(TransferError::Closed));
}

#[test]
fn wrap_around_put_reads_back_contiguously() {
    // Fill near the end, drain the front, then push a block that wraps.
    let size = 64;
    let mut ch = chan(size);

    ch.put_block(&vec![0xEE; size - 10]).unwrap();
    ch.forward((size - 10) as u32);
    ch.skip_output(size - 20);
    assert_eq!(ch.output_len(), 10);

    let block: Vec<u8> = (0u8..30).collect();
    assert_eq!(ch.put_block(&block), Ok(30));
    ch.forward(30);

    // Reader sees the 30 bytes via two bounded reads.
    let mut first = [0u8; 20];
    assert_eq!(ch.get_block(&mut first, 10), Ok(20));
    let mut second = [0u8; 10];
    assert_eq!(ch.get_block(&mut second, 30), Ok(10));

    let mut joined = first.to_vec();
    joined.extend_from_slice(&second);
    assert_eq!(joined, block);
}

#[test]
fn read_null_is_observable_by_consumer_endpoint() {
    struct CountingSink {
        got: Vec<u8>,
    }
    impl Endpoint for CountingSink {
        fn recv(&mut self, _chn: &mut Channel) -> IoResult {
            IoResult::WouldBlock
        }
        fn send(&mut self, chn: &mut Channel) -> IoResult {
            let n = chn.output_len();
            if n == 0 {
                return IoResult::Starved;
            }
            let (a, b) = chn.buffer().output_slices();
            self.got.extend_from_slice(a);
            self.got.extend_from_slice(b);
            chn.skip_output(n);
            IoResult::Moved(n)
        }
    }

    let mut si = StreamInterface::new();
    let mut ep = PipeEndpoint::new();
    ep.feed(b"final");
    ep.feed_eof();
    si.attach_accepted(Box::new(ep));

    let mut ch = chan(32);
    ch.forward(FORWARD_INFINITE);
    si.recv_step(&mut ch, Tick::ZERO);

    assert!(ch.flags.contains(ChanFlags::READ_NULL));
    assert_eq!(ch.output_len(), 5);
}
