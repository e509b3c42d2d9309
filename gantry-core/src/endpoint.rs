//! Data endpoints attachable to a stream interface.
//!
//! An endpoint bridges one side of a stream to the outside world: a
//! connected socket, an in-memory pipe, or (via its own contract in
//! [`crate::applet`]) a protocol applet. Endpoints never block; every call
//! is a single bounded step that reports why it stopped.

use crate::channel::{Channel, TransferError};
use bytes::{Bytes, BytesMut};

/// Why an endpoint step stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoResult {
    /// Progress: this many bytes moved.
    Moved(usize),
    /// The external side has nothing to give / cannot take more right now.
    WouldBlock,
    /// The channel buffer lacks room for incoming bytes (recv only).
    Full,
    /// The channel holds nothing to send (send only).
    Starved,
    /// The external side reported a clean end of stream (recv only).
    Eof,
    /// The external side reported an unrecoverable error.
    Error,
}

/// Connection progress of an outgoing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Established,
    Pending,
    Failed,
}

/// One side's data source/sink.
pub trait Endpoint {
    /// Display name for logs.
    fn name(&self) -> &'static str {
        "endpoint"
    }

    /// Drive a pending outgoing connection one step.
    fn poll_connect(&mut self) -> ConnectState {
        ConnectState::Established
    }

    /// Pull bytes from the source into the produced channel's input region.
    fn recv(&mut self, chn: &mut Channel) -> IoResult;

    /// Push bytes from the consumed channel's output region into the sink.
    fn send(&mut self, chn: &mut Channel) -> IoResult;

    /// The read half will not be used again.
    fn shutr(&mut self) {}

    /// The write half will not be used again; flushes are over.
    fn shutw(&mut self) {}
}

/// In-memory byte pipe endpoint.
///
/// The test and demo workhorse: bytes queued with [`PipeEndpoint::feed`]
/// appear as network input; bytes the stream writes accumulate in
/// [`PipeEndpoint::take_sent`]. An optional sink capacity simulates a slow
/// reader on the far side.
#[derive(Debug, Default)]
pub struct PipeEndpoint {
    rx: BytesMut,
    tx: BytesMut,
    rx_eof: bool,
    /// `Some(n)`: the far side accepts at most `n` unread bytes.
    sink_capacity: Option<usize>,
    shut_r: bool,
    shut_w: bool,
}

impl PipeEndpoint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit how many bytes the far side will hold before exerting
    /// backpressure.
    #[must_use]
    pub fn with_sink_capacity(mut self, cap: usize) -> Self {
        self.sink_capacity = Some(cap);
        self
    }

    /// Queue bytes as if they arrived from the wire.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.rx.extend_from_slice(bytes);
    }

    /// Signal a clean end of stream after the queued bytes.
    pub fn feed_eof(&mut self) {
        self.rx_eof = true;
    }

    /// Drain everything the stream wrote to the wire.
    pub fn take_sent(&mut self) -> Bytes {
        self.tx.split().freeze()
    }

    #[must_use]
    pub fn sent_len(&self) -> usize {
        self.tx.len()
    }

    #[must_use]
    pub const fn is_shut_w(&self) -> bool {
        self.shut_w
    }
}

impl Endpoint for PipeEndpoint {
    fn name(&self) -> &'static str {
        "pipe"
    }

    fn recv(&mut self, chn: &mut Channel) -> IoResult {
        if self.shut_r {
            return IoResult::Eof;
        }
        if self.rx.is_empty() {
            return if self.rx_eof {
                IoResult::Eof
            } else {
                IoResult::WouldBlock
            };
        }

        let room = chn.max_input();
        if room == 0 {
            return IoResult::Full;
        }

        let take = room.min(self.rx.len());
        match chn.put_block(&self.rx[..take]) {
            Ok(n) => {
                let _ = self.rx.split_to(n);
                IoResult::Moved(n)
            }
            Err(TransferError::Full) => IoResult::Full,
            Err(_) => IoResult::Error,
        }
    }

    fn send(&mut self, chn: &mut Channel) -> IoResult {
        if self.shut_w {
            return IoResult::Error;
        }
        let avail = chn.output_len();
        if avail == 0 {
            return IoResult::Starved;
        }

        let room = match self.sink_capacity {
            Some(cap) => cap.saturating_sub(self.tx.len()),
            None => avail,
        };
        if room == 0 {
            return IoResult::WouldBlock;
        }

        let n = avail.min(room);
        let (a, b) = chn.buffer().output_slices();
        let first = n.min(a.len());
        self.tx.extend_from_slice(&a[..first]);
        self.tx.extend_from_slice(&b[..n - first]);
        chn.skip_output(n);
        IoResult::Moved(n)
    }

    fn shutr(&mut self) {
        self.shut_r = true;
    }

    fn shutw(&mut self) {
        self.shut_w = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;

    fn chan(size: usize) -> Channel {
        Channel::new(Buffer::with_capacity(size))
    }

    #[test]
    fn pipe_moves_bytes_both_ways() {
        let mut ep = PipeEndpoint::new();
        let mut ch = chan(64);

        ep.feed(b"request");
        assert_eq!(ep.recv(&mut ch), IoResult::Moved(7));
        assert_eq!(ep.recv(&mut ch), IoResult::WouldBlock);
        assert_eq!(ch.input_len(), 7);

        ch.forward(7);
        assert_eq!(ep.send(&mut ch), IoResult::Moved(7));
        assert_eq!(ep.take_sent(), &b"request"[..]);
        assert_eq!(ep.send(&mut ch), IoResult::Starved);
    }

    #[test]
    fn eof_reported_after_queued_bytes() {
        let mut ep = PipeEndpoint::new();
        let mut ch = chan(64);

        ep.feed(b"x");
        ep.feed_eof();
        assert_eq!(ep.recv(&mut ch), IoResult::Moved(1));
        assert_eq!(ep.recv(&mut ch), IoResult::Eof);
    }

    #[test]
    fn sink_capacity_exerts_backpressure() {
        let mut ep = PipeEndpoint::new().with_sink_capacity(4);
        let mut ch = chan(64);
        ch.put_block(b"abcdefgh").unwrap();
        ch.forward(8);

        assert_eq!(ep.send(&mut ch), IoResult::Moved(4));
        assert_eq!(ep.send(&mut ch), IoResult::WouldBlock);

        ep.take_sent();
        assert_eq!(ep.send(&mut ch), IoResult::Moved(4));
    }

    #[test]
    fn full_channel_blocks_recv() {
        let mut ep = PipeEndpoint::new();
        let mut ch = chan(4);
        ep.feed(b"abcdef");

        assert_eq!(ep.recv(&mut ch), IoResult::Moved(4));
        assert_eq!(ep.recv(&mut ch), IoResult::Full);

        ch.forward(4);
        ch.skip_output(4);
        assert_eq!(ep.recv(&mut ch), IoResult::Moved(2));
    }
}
