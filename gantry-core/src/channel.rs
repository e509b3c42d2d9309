//! Unidirectional byte pipe between two stream interfaces.
//!
//! A channel owns one [`Buffer`], a flag word, the forwarding credit
//! counter, the analyser gate and the per-direction timeouts. The producer
//! interface writes into the input region; the consumer interface drains
//! the output region. Bytes only move from input to output when analysis
//! releases them, either through explicit [`Channel::forward`] credit or
//! the blanket `MAY_FORWARD` flag.
//!
//! Operation results follow the crate-wide step discipline:
//! `Ok(n)` for progress, `Ok(0)` for "nothing yet, retry on peer progress",
//! `Err` for conditions the caller must act on.

use crate::buffer::Buffer;
use crate::flags::ChanFlags;
use crate::sched::Tick;
use std::time::Duration;
use thiserror::Error;

/// Forwarding credit sentinel: the consumer may drain without limit.
pub const FORWARD_INFINITE: u32 = u32::MAX;

/// Saturation cap applied when accumulating finite forwarding credit.
pub const FORWARD_MAX: u32 = crate::config::FORWARD_MAX;

/// Errors surfaced by channel transfer operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// The buffer is momentarily too full; retry after consumer progress.
    #[error("buffer full")]
    Full,

    /// The relevant side of the channel has been shut.
    #[error("channel side closed")]
    Closed,

    /// The block can never fit in this channel's buffer.
    #[error("block larger than channel capacity")]
    Oversize,
}

/// Result alias for transfer operations.
pub type TransferResult = std::result::Result<usize, TransferError>;

/// Bitmask naming the inspection stages still gating this channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalyserMask(pub u32);

impl AnalyserMask {
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, bit: u32) -> bool {
        (self.0 & bit) != 0
    }

    pub fn remove(&mut self, bit: u32) {
        self.0 &= !bit;
    }
}

/// One direction of a stream: buffer, flags, credit, timers.
#[derive(Debug)]
pub struct Channel {
    buf: Buffer,
    pub flags: ChanFlags,
    /// Inspection stages that must run before bytes may be forwarded.
    pub analysers: AnalyserMask,
    /// Pending bytes the consumer is authorised to drain.
    to_forward: u32,
    /// Running count of bytes that entered this channel.
    total: u64,
    /// Cap on the input region while early bytes are rewritten in place.
    rd_limit: Option<usize>,

    /// Read / write / connect timeouts.
    pub rto: Option<Duration>,
    pub wto: Option<Duration>,
    pub cto: Option<Duration>,

    /// Read / write / analyser expiration ticks.
    pub rex: Option<Tick>,
    pub wex: Option<Tick>,
    pub analyse_exp: Option<Tick>,
}

impl Channel {
    /// Create a channel over an already-allocated buffer.
    #[must_use]
    pub fn new(buf: Buffer) -> Self {
        Self {
            buf,
            flags: ChanFlags::empty(),
            analysers: AnalyserMask::default(),
            to_forward: 0,
            total: 0,
            rd_limit: None,
            rto: None,
            wto: None,
            cto: None,
            rex: None,
            wex: None,
            analyse_exp: None,
        }
    }

    /// Create a channel with no buffer yet; writes park until one is
    /// attached from the pool.
    #[must_use]
    pub fn bufferless() -> Self {
        Self::new(Buffer::sentinel())
    }

    // =========================
    // Buffer management
    // =========================

    #[must_use]
    pub const fn has_buffer(&self) -> bool {
        self.buf.size() != 0
    }

    /// Attach a pool buffer, returning the previous one.
    pub fn attach_buffer(&mut self, buf: Buffer) -> Buffer {
        std::mem::replace(&mut self.buf, buf)
    }

    /// Detach the buffer, leaving the sentinel behind.
    ///
    /// Only legal when the channel holds no bytes.
    pub fn release_buffer(&mut self) -> Buffer {
        debug_assert!(self.buf.is_empty());
        std::mem::replace(&mut self.buf, Buffer::sentinel())
    }

    #[must_use]
    pub const fn buffer(&self) -> &Buffer {
        &self.buf
    }

    #[inline]
    #[must_use]
    pub const fn input_len(&self) -> usize {
        self.buf.input_len()
    }

    #[inline]
    #[must_use]
    pub const fn output_len(&self) -> usize {
        self.buf.output_len()
    }

    #[inline]
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    #[inline]
    #[must_use]
    pub const fn to_forward(&self) -> u32 {
        self.to_forward
    }

    /// Cap the input region (set while headers are rewritten in place).
    pub fn set_read_limit(&mut self, limit: Option<usize>) {
        self.rd_limit = limit;
    }

    /// Effective input capacity right now.
    #[must_use]
    pub fn max_input(&self) -> usize {
        self.buf.max_input(self.rd_limit)
    }

    /// True once the read side will accept no further byte.
    #[must_use]
    pub fn input_closed(&self) -> bool {
        self.flags.contains(ChanFlags::SHUTR)
    }

    /// True once the write side will release no further byte.
    #[must_use]
    pub fn output_closed(&self) -> bool {
        self.flags.contains(ChanFlags::SHUTW)
    }

    // =========================
    // Forwarding credit
    // =========================

    /// Schedule up to `n` more bytes for transmission without waking the
    /// owning task.
    ///
    /// Bytes already present in the input region are promoted immediately;
    /// any remainder is credited to the consumer for future input. Passing
    /// [`FORWARD_INFINITE`] removes the limit permanently. Returns the
    /// credit actually scheduled.
    pub fn forward(&mut self, n: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        if self.to_forward == FORWARD_INFINITE {
            return n;
        }
        if n == FORWARD_INFINITE {
            self.buf.advance(self.buf.input_len());
            self.to_forward = FORWARD_INFINITE;
            return FORWARD_INFINITE;
        }

        let in_buf = self.buf.input_len() as u32;
        if n <= in_buf {
            self.buf.advance(n as usize);
            return n;
        }

        self.buf.advance(in_buf as usize);
        let remainder = n - in_buf;
        self.to_forward = match self.to_forward.checked_add(remainder) {
            Some(v) if v <= FORWARD_MAX => v,
            _ => FORWARD_MAX,
        };
        n
    }

    /// Promote released input to the output region.
    ///
    /// Runs after the analyser gate: with `MAY_FORWARD` everything moves,
    /// otherwise up to the pending credit. No effect while `HIJACK` is set.
    pub fn promote(&mut self) {
        if self.flags.contains(ChanFlags::HIJACK) {
            return;
        }
        if self.flags.contains(ChanFlags::MAY_FORWARD)
            || self.to_forward == FORWARD_INFINITE
        {
            self.buf.advance(self.buf.input_len());
            return;
        }
        let n = self.buf.input_len().min(self.to_forward as usize);
        if n > 0 {
            self.buf.advance(n);
            self.to_forward -= n as u32;
        }
    }

    // =========================
    // Producer side
    // =========================

    /// Append one byte to the input region.
    ///
    /// Auto-consumes forwarding credit and flags the read activity.
    pub fn put_byte(&mut self, c: u8) -> TransferResult {
        self.put_block(&[c])
    }

    /// Append a block to the input region in at most two copies.
    ///
    /// - `Err(Closed)` if the input side is shut,
    /// - `Err(Oversize)` if the block can never fit,
    /// - `Err(Full)` if the buffer is momentarily too full,
    /// - `Ok(0)` for the empty block,
    /// - `Ok(len)` once the block is in.
    pub fn put_block(&mut self, blk: &[u8]) -> TransferResult {
        if self.input_closed() {
            return Err(TransferError::Closed);
        }
        if blk.is_empty() {
            return Ok(0);
        }

        let capacity = match self.rd_limit {
            Some(limit) => self.buf.size().min(limit),
            None => self.buf.size(),
        };
        if blk.len() > capacity {
            return Err(TransferError::Oversize);
        }
        if blk.len() > self.max_input() {
            return Err(TransferError::Full);
        }

        self.buf.put_input(blk);
        self.total += blk.len() as u64;
        self.flags.set(ChanFlags::READ_PARTIAL);

        // Immediately consume credit granted ahead of this data.
        if self.to_forward > 0 {
            if self.to_forward == FORWARD_INFINITE {
                self.buf.advance(blk.len());
            } else {
                let fwd = blk.len().min(self.to_forward as usize);
                self.buf.advance(fwd);
                self.to_forward -= fwd as u32;
            }
        }

        Ok(blk.len())
    }

    /// Append bytes directly to the output region, bypassing analysis.
    ///
    /// Used to inject synthesised responses (error pages, protocol
    /// preambles). The caller guarantees there is no pending input.
    pub fn inject_output(&mut self, msg: &[u8]) -> std::result::Result<(), TransferError> {
        debug_assert_eq!(self.buf.input_len(), 0);
        if msg.len() > self.buf.size() {
            return Err(TransferError::Oversize);
        }
        if msg.len() > self.buf.free_space() {
            return Err(TransferError::Full);
        }
        self.buf.put_input(msg);
        self.buf.advance(msg.len());
        self.total += msg.len() as u64;
        Ok(())
    }

    // =========================
    // Consumer side
    // =========================

    /// Copy bytes from the output region into `dst` up to and including the
    /// first `\n`, or up to `dst.len()`, whichever is less.
    ///
    /// Non-destructive; the caller skips consumed bytes explicitly.
    /// `Ok(0)` means no newline yet and more may arrive; `Err(Closed)`
    /// means the output side is shut and no newline will ever come.
    pub fn get_line(&self, dst: &mut [u8]) -> TransferResult {
        let avail = self.buf.output_len();
        let scan = avail.min(dst.len());

        for k in 0..scan {
            if self.buf.peek_output(k) == b'\n' {
                self.buf.copy_output(0, &mut dst[..=k]);
                return Ok(k + 1);
            }
        }

        // No newline within reach: a full destination is still progress.
        if dst.len() <= avail {
            self.buf.copy_output(0, dst);
            return Ok(dst.len());
        }
        if self.output_closed() {
            return Err(TransferError::Closed);
        }
        Ok(0)
    }

    /// Copy exactly `dst.len()` bytes starting at `offset` into the output
    /// region.
    ///
    /// `Ok(0)` means not enough data yet; `Err(Closed)` means the output
    /// side is shut and the request can never complete.
    pub fn get_block(&self, dst: &mut [u8], offset: usize) -> TransferResult {
        if self.buf.output_len() < offset + dst.len() {
            if self.output_closed() {
                return Err(TransferError::Closed);
            }
            return Ok(0);
        }
        self.buf.copy_output(offset, dst);
        Ok(dst.len())
    }

    /// Drop `n` bytes from the front of the output region.
    pub fn skip_output(&mut self, n: usize) {
        self.buf.skip_output(n);
        if n > 0 {
            self.flags.set(ChanFlags::WRITE_PARTIAL);
        }
    }

    // =========================
    // Shutdown requests
    // =========================

    /// Request that the read side be shut at the next opportunity.
    pub fn shut_read_now(&mut self) {
        self.flags.set(ChanFlags::SHUTR_NOW);
    }

    /// Request that the write side be shut once pending output drains.
    pub fn shut_write_now(&mut self) {
        self.flags.set(ChanFlags::SHUTW_NOW);
    }

    /// Complete a read shutdown: no byte will enter this channel again.
    pub fn apply_shutr(&mut self) {
        self.flags.clear(ChanFlags::SHUTR_NOW);
        self.flags.set(ChanFlags::SHUTR);
        self.rex = None;
    }

    /// Complete a write shutdown: no byte will leave this channel again.
    pub fn apply_shutw(&mut self) {
        self.flags.clear(ChanFlags::SHUTW_NOW);
        self.flags.set(ChanFlags::SHUTW);
        self.wex = None;
    }

    // =========================
    // Timeouts
    // =========================

    /// Arm the read expiration from `now`, if a read timeout is configured.
    pub fn arm_read_timeout(&mut self, now: Tick) {
        self.rex = self.rto.map(|d| now.advance(d));
    }

    /// Arm the write expiration from `now`, if a write timeout is configured.
    pub fn arm_write_timeout(&mut self, now: Tick) {
        self.wex = self.wto.map(|d| now.advance(d));
    }

    /// Latch timeout flags for any expiration at or before `now`.
    pub fn check_timeouts(&mut self, now: Tick) {
        if let Some(rex) = self.rex {
            if now >= rex && !self.input_closed() {
                self.flags.set(ChanFlags::READ_TIMEOUT);
                self.rex = None;
            }
        }
        if let Some(wex) = self.wex {
            if now >= wex && !self.output_closed() {
                self.flags.set(ChanFlags::WRITE_TIMEOUT);
                self.wex = None;
            }
        }
    }

    /// Earliest pending expiration tick of this channel.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Tick> {
        [self.rex, self.wex, self.analyse_exp]
            .into_iter()
            .flatten()
            .min()
    }
}
