//! Sans-IO HTTP/2 framing mux, packaged as a stream-interface applet.
//!
//! The mux replaces the server socket on the back side of a stream. Each
//! `io_handler` step consumes request-channel bytes (the client's wire
//! data) and produces response-channel bytes, advancing one state at a
//! time and yielding as soon as the channel runs dry:
//!
//! ```text
//! INIT -> PREFACE -> SETTINGS1 -> FRAME_HDR <-> FRAME_BODY
//!                                      |
//!                                   CLOSED / ERROR
//! ```
//!
//! On entry the mux emits its own empty SETTINGS frame. It then demands
//! the exact 24-byte client preface, the client's opening SETTINGS, and
//! finally loops over frame heads, consuming each advertised payload.
//! PING frames are answered with an ACK queued ahead of any other
//! emission. While a header run (HEADERS/PUSH_PROMISE without
//! END_HEADERS) is open, the mux is *busy*: any frame other than a
//! CONTINUATION for that same stream is a protocol error.

use crate::frame::{
    FrameError, FrameHead, Kind, StreamId, DEFAULT_MAX_FRAME_SIZE, FLAG_ACK, HEADER_LEN,
};
use crate::preface::{self, PrefaceCheck, PREFACE_SIZE};
use bytes::BytesMut;
use gantry_core::applet::{Applet, AppletCtx};
use gantry_core::channel::Channel;
use gantry_core::flags::ChanFlags;
use smallvec::SmallVec;
use tracing::{debug, trace};

/// Mux progress states, mirrored into the applet context's `st0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    Init = 0,
    Preface = 1,
    Settings1 = 2,
    FrameHdr = 3,
    FrameBody = 4,
    Closed = 5,
    Error = 6,
}

/// A control frame waiting to go out ahead of everything else.
#[derive(Debug)]
struct PendingFrame {
    wire: BytesMut,
}

/// HTTP/2 framing applet.
pub struct H2Mux {
    state: MuxState,
    /// Head of the frame whose payload is being consumed.
    head: Option<FrameHead>,
    /// Payload bytes still to consume for the current frame.
    body_left: usize,
    /// PING payload collector; echoed back in the ACK.
    ping_payload: Option<SmallVec<[u8; 8]>>,
    /// Stream of the open header run, if any.
    header_run: Option<StreamId>,
    /// Control frames queued for priority emission.
    pending: SmallVec<[PendingFrame; 2]>,
    max_frame_size: u32,
    /// Frames fully consumed, for `show sess` style reporting.
    frames_in: u64,
}

impl H2Mux {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: MuxState::Init,
            head: None,
            body_left: 0,
            ping_payload: None,
            header_run: None,
            pending: SmallVec::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            frames_in: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> MuxState {
        self.state
    }

    #[must_use]
    pub const fn frames_in(&self) -> u64 {
        self.frames_in
    }

    /// True while a multi-frame header run is open: the mux refuses to
    /// start a frame for any unrelated stream until it completes.
    #[must_use]
    pub const fn mux_busy(&self) -> bool {
        self.header_run.is_some()
    }

    // =========================
    // Emission helpers
    // =========================

    /// Flush queued control frames into the response channel.
    ///
    /// Returns `false` (and latches `CANT_PUT`) if the channel cannot take
    /// the next frame yet.
    fn flush_pending(&mut self, ctx: &mut AppletCtx, ic: &mut Channel) -> bool {
        while !self.pending.is_empty() {
            if ic.put_block(&self.pending[0].wire).is_err() {
                ctx.cant_put();
                return false;
            }
            self.pending.remove(0);
        }
        true
    }

    fn queue_ping_ack(&mut self, payload: &[u8]) {
        let head = FrameHead::new(Kind::Ping, FLAG_ACK, StreamId::CONNECTION, 8);
        let mut wire = BytesMut::with_capacity(HEADER_LEN + 8);
        head.encode_with_payload(payload, &mut wire);
        self.pending.push(PendingFrame { wire });
        trace!(target: "gantry::h2", "queued PING ack");
    }

    // =========================
    // Failure paths
    // =========================

    /// Abort the stream on a protocol violation: both sides shut, the
    /// response channel carries the end-of-stream mark.
    fn protocol_error(&mut self, err: FrameError, oc: &mut Channel, ic: &mut Channel) {
        debug!(target: "gantry::h2", error = %err, "protocol error, aborting stream");
        self.state = MuxState::Error;
        self.pending.clear();

        let stale = oc.output_len();
        oc.skip_output(stale);
        oc.shut_read_now();
        oc.shut_write_now();

        ic.flags.set(ChanFlags::READ_NULL);
        ic.shut_read_now();
    }

    /// The client is gone; wind the response side down cleanly.
    fn peer_closed(&mut self, ic: &mut Channel) {
        if self.state != MuxState::Error {
            self.state = MuxState::Closed;
        }
        ic.flags.set(ChanFlags::READ_NULL);
        ic.shut_read_now();
    }

    // =========================
    // State steps
    // =========================

    /// Head-of-line validation against the current mux state.
    fn validate_head(&self, head: &FrameHead) -> Result<(), FrameError> {
        head.validate(self.max_frame_size)?;

        match self.header_run {
            Some(run) => {
                // Busy: only the run's own CONTINUATION may proceed.
                if head.kind != Kind::Continuation || head.stream_id != run {
                    return Err(FrameError::ExpectedContinuation);
                }
            }
            None => {
                if head.kind == Kind::Continuation {
                    return Err(FrameError::UnexpectedContinuation);
                }
            }
        }
        Ok(())
    }

    /// Account a parsed head and set up payload consumption.
    fn accept_head(&mut self, head: FrameHead, oc: &mut Channel) {
        trace!(
            target: "gantry::h2",
            kind = ?head.kind,
            len = head.length,
            sid = head.stream_id.0,
            "frame head"
        );
        oc.skip_output(HEADER_LEN);

        if head.kind.starts_header_block() && !head.is_end_headers() {
            self.header_run = Some(head.stream_id);
        } else if head.kind == Kind::Continuation && head.is_end_headers() {
            self.header_run = None;
        }

        self.ping_payload = (head.kind == Kind::Ping && !head.is_ack())
            .then(SmallVec::new);
        self.body_left = head.length as usize;
        self.head = Some(head);
        self.state = MuxState::FrameBody;
    }

    /// Consume payload bytes; returns `true` once the frame is complete.
    fn step_body(&mut self, ctx: &mut AppletCtx, oc: &mut Channel) -> bool {
        let avail = oc.output_len();
        let take = avail.min(self.body_left);
        if take > 0 {
            if let Some(collector) = &mut self.ping_payload {
                let mut chunk = [0u8; 8];
                let n = take.min(8 - collector.len());
                if oc.get_block(&mut chunk[..n], 0).unwrap_or(0) == n {
                    collector.extend_from_slice(&chunk[..n]);
                }
            }
            oc.skip_output(take);
            self.body_left -= take;
        }

        if self.body_left > 0 {
            if oc.output_closed() {
                self.peer_closed_mid_frame();
            } else {
                ctx.cant_get();
            }
            return false;
        }

        // Frame complete.
        self.frames_in += 1;
        if let Some(payload) = self.ping_payload.take() {
            self.queue_ping_ack(&payload);
        }
        self.head = None;
        self.state = MuxState::FrameHdr;
        true
    }

    fn peer_closed_mid_frame(&mut self) {
        debug!(target: "gantry::h2", "peer closed mid-frame");
        self.state = MuxState::Closed;
    }
}

impl Default for H2Mux {
    fn default() -> Self {
        Self::new()
    }
}

impl Applet for H2Mux {
    fn name(&self) -> &'static str {
        "h2-mux"
    }

    fn io_handler(&mut self, ctx: &mut AppletCtx, oc: &mut Channel, ic: &mut Channel) {
        loop {
            // Control frames (PING acks) go out before anything else.
            if !self.flush_pending(ctx, ic) {
                break;
            }

            match self.state {
                // =========================
                // Init: advertise our empty SETTINGS
                // =========================
                MuxState::Init => {
                    let head = FrameHead::new(Kind::Settings, 0, StreamId::CONNECTION, 0);
                    match ic.put_block(&head.encode()) {
                        Ok(_) => {
                            trace!(target: "gantry::h2", "sent empty SETTINGS");
                            self.state = MuxState::Preface;
                        }
                        Err(_) => {
                            ctx.cant_put();
                            break;
                        }
                    }
                }

                // =========================
                // Preface: exact 24-byte literal
                // =========================
                MuxState::Preface => {
                    let avail = oc.output_len().min(PREFACE_SIZE);
                    let mut buf = [0u8; PREFACE_SIZE];
                    if avail > 0 && oc.get_block(&mut buf[..avail], 0).unwrap_or(0) != avail {
                        ctx.cant_get();
                        break;
                    }

                    match preface::check(&buf[..avail]) {
                        PrefaceCheck::Match => {
                            oc.skip_output(PREFACE_SIZE);
                            trace!(target: "gantry::h2", "client preface accepted");
                            self.state = MuxState::Settings1;
                        }
                        PrefaceCheck::Mismatch => {
                            self.protocol_error(FrameError::BadPreface, oc, ic);
                            break;
                        }
                        PrefaceCheck::NeedMore => {
                            if oc.output_closed() {
                                self.peer_closed(ic);
                            } else {
                                ctx.cant_get();
                            }
                            break;
                        }
                    }
                }

                // =========================
                // Settings1: the client's opening SETTINGS
                // =========================
                MuxState::Settings1 => {
                    let mut buf = [0u8; HEADER_LEN];
                    match oc.get_block(&mut buf, 0) {
                        Ok(n) if n == HEADER_LEN => {}
                        Ok(_) => {
                            ctx.cant_get();
                            break;
                        }
                        Err(_) => {
                            self.peer_closed(ic);
                            break;
                        }
                    }

                    let head = match FrameHead::parse(&buf) {
                        Ok(head) if head.kind == Kind::Settings && !head.is_ack() => head,
                        Ok(_) | Err(_) => {
                            self.protocol_error(FrameError::ExpectedSettings, oc, ic);
                            break;
                        }
                    };
                    if let Err(err) = head.validate(self.max_frame_size) {
                        self.protocol_error(err, oc, ic);
                        break;
                    }
                    self.accept_head(head, oc);
                }

                // =========================
                // FrameHdr: one 9-byte head at a time
                // =========================
                MuxState::FrameHdr => {
                    let mut buf = [0u8; HEADER_LEN];
                    match oc.get_block(&mut buf, 0) {
                        Ok(n) if n == HEADER_LEN => {}
                        Ok(_) => {
                            if oc.output_closed() {
                                self.peer_closed(ic);
                            } else {
                                ctx.cant_get();
                            }
                            break;
                        }
                        Err(_) => {
                            self.peer_closed(ic);
                            break;
                        }
                    }

                    let head = match FrameHead::parse(&buf) {
                        Ok(head) => head,
                        Err(err) => {
                            self.protocol_error(err, oc, ic);
                            break;
                        }
                    };
                    if let Err(err) = self.validate_head(&head) {
                        self.protocol_error(err, oc, ic);
                        break;
                    }
                    self.accept_head(head, oc);
                }

                // =========================
                // FrameBody: consume the advertised payload
                // =========================
                MuxState::FrameBody => {
                    if !self.step_body(ctx, oc) {
                        break;
                    }
                }

                // =========================
                // Terminal states
                // =========================
                MuxState::Closed | MuxState::Error => break,
            }
        }

        ctx.st0 = self.state as u32;
    }

    fn release(&mut self) {
        if let Some(head) = self.head.take() {
            trace!(
                target: "gantry::h2",
                kind = ?head.kind,
                left = self.body_left,
                "released mid-frame"
            );
        }
        debug!(
            target: "gantry::h2",
            frames = self.frames_in,
            state = ?self.state,
            "mux released"
        );
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preface::PREFACE;
    use gantry_core::buffer::Buffer;
    use gantry_core::channel::FORWARD_INFINITE;
    use gantry_core::flags::IfFlags;

    const CLIENT_SETTINGS: [u8; 9] = [0, 0, 0, 4, 0, 0, 0, 0, 0];

    fn wire_chan() -> Channel {
        let mut ch = Channel::new(Buffer::with_capacity(1024));
        ch.forward(FORWARD_INFINITE);
        ch
    }

    fn feed(oc: &mut Channel, bytes: &[u8]) {
        oc.put_block(bytes).unwrap();
    }

    fn drain(ic: &mut Channel) -> Vec<u8> {
        let n = ic.output_len();
        let mut out = vec![0u8; n];
        if n > 0 {
            ic.get_block(&mut out, 0).unwrap();
            ic.skip_output(n);
        }
        out
    }

    fn run(mux: &mut H2Mux, ctx: &mut AppletCtx, oc: &mut Channel, ic: &mut Channel) {
        ctx.flags = IfFlags::empty();
        mux.io_handler(ctx, oc, ic);
    }

    #[test]
    fn init_sends_empty_settings_then_waits_for_preface() {
        let mut mux = H2Mux::new();
        let mut ctx = AppletCtx::new();
        let (mut oc, mut ic) = (wire_chan(), wire_chan());

        run(&mut mux, &mut ctx, &mut oc, &mut ic);

        assert_eq!(mux.state(), MuxState::Preface);
        assert_eq!(drain(&mut ic), CLIENT_SETTINGS);
        assert!(ctx.flags.contains(IfFlags::CANT_GET));
        assert_eq!(ctx.st0, MuxState::Preface as u32);
    }

    #[test]
    fn preface_then_settings_reaches_frame_hdr() {
        let mut mux = H2Mux::new();
        let mut ctx = AppletCtx::new();
        let (mut oc, mut ic) = (wire_chan(), wire_chan());

        feed(&mut oc, PREFACE);
        feed(&mut oc, &CLIENT_SETTINGS);
        run(&mut mux, &mut ctx, &mut oc, &mut ic);

        assert_eq!(mux.state(), MuxState::FrameHdr);
        assert_eq!(drain(&mut ic), CLIENT_SETTINGS, "our empty SETTINGS went out");
        assert_eq!(mux.frames_in(), 1);
        assert!(!oc.flags.shutr_pending());
        assert!(!ic.flags.shutr_pending());
    }

    #[test]
    fn split_preface_waits_for_the_rest() {
        let mut mux = H2Mux::new();
        let mut ctx = AppletCtx::new();
        let (mut oc, mut ic) = (wire_chan(), wire_chan());

        feed(&mut oc, &PREFACE[..10]);
        run(&mut mux, &mut ctx, &mut oc, &mut ic);
        assert_eq!(mux.state(), MuxState::Preface);
        assert!(ctx.flags.contains(IfFlags::CANT_GET));

        feed(&mut oc, &PREFACE[10..]);
        feed(&mut oc, &CLIENT_SETTINGS);
        run(&mut mux, &mut ctx, &mut oc, &mut ic);
        assert_eq!(mux.state(), MuxState::FrameHdr);
    }

    #[test]
    fn preface_mismatch_aborts_both_sides() {
        let mut mux = H2Mux::new();
        let mut ctx = AppletCtx::new();
        let (mut oc, mut ic) = (wire_chan(), wire_chan());

        feed(&mut oc, b"GET / HTTP/1.1\r\n\r\n");
        run(&mut mux, &mut ctx, &mut oc, &mut ic);

        assert_eq!(mux.state(), MuxState::Error);
        assert!(oc.flags.shutr_pending());
        assert!(oc.flags.shutw_pending());
        assert!(ic.flags.contains(ChanFlags::READ_NULL));
        assert!(ic.flags.shutr_pending());
        assert_eq!(oc.output_len(), 0, "stale request bytes are discarded");
    }

    #[test]
    fn ping_is_acked_with_echoed_payload() {
        let mut mux = H2Mux::new();
        let mut ctx = AppletCtx::new();
        let (mut oc, mut ic) = (wire_chan(), wire_chan());

        feed(&mut oc, PREFACE);
        feed(&mut oc, &CLIENT_SETTINGS);
        let ping_head = FrameHead::new(Kind::Ping, 0, StreamId::CONNECTION, 8);
        feed(&mut oc, &ping_head.encode());
        feed(&mut oc, b"gantry!!");
        run(&mut mux, &mut ctx, &mut oc, &mut ic);

        let mut expected = CLIENT_SETTINGS.to_vec();
        let ack_head = FrameHead::new(Kind::Ping, FLAG_ACK, StreamId::CONNECTION, 8);
        expected.extend_from_slice(&ack_head.encode());
        expected.extend_from_slice(b"gantry!!");

        assert_eq!(drain(&mut ic), expected);
        assert_eq!(mux.frames_in(), 2);
        assert_eq!(mux.state(), MuxState::FrameHdr);
    }

    #[test]
    fn open_header_run_makes_the_mux_busy() {
        let mut mux = H2Mux::new();
        let mut ctx = AppletCtx::new();
        let (mut oc, mut ic) = (wire_chan(), wire_chan());

        feed(&mut oc, PREFACE);
        feed(&mut oc, &CLIENT_SETTINGS);
        // HEADERS on stream 1 without END_HEADERS opens a run.
        let headers = FrameHead::new(Kind::Headers, 0, StreamId(1), 0);
        feed(&mut oc, &headers.encode());
        run(&mut mux, &mut ctx, &mut oc, &mut ic);
        assert!(mux.mux_busy());

        // A DATA frame for another stream must not start.
        let data = FrameHead::new(Kind::Data, 0, StreamId(3), 0);
        feed(&mut oc, &data.encode());
        run(&mut mux, &mut ctx, &mut oc, &mut ic);
        assert_eq!(mux.state(), MuxState::Error);
    }

    #[test]
    fn continuation_for_the_same_stream_completes_the_run() {
        let mut mux = H2Mux::new();
        let mut ctx = AppletCtx::new();
        let (mut oc, mut ic) = (wire_chan(), wire_chan());

        feed(&mut oc, PREFACE);
        feed(&mut oc, &CLIENT_SETTINGS);
        let headers = FrameHead::new(Kind::Headers, 0, StreamId(1), 0);
        feed(&mut oc, &headers.encode());
        let cont = FrameHead::new(Kind::Continuation, crate::frame::FLAG_END_HEADERS, StreamId(1), 0);
        feed(&mut oc, &cont.encode());
        run(&mut mux, &mut ctx, &mut oc, &mut ic);

        assert!(!mux.mux_busy());
        assert_eq!(mux.state(), MuxState::FrameHdr);
        assert_eq!(mux.frames_in(), 3);
    }

    #[test]
    fn continuation_without_a_run_is_a_protocol_error() {
        let mut mux = H2Mux::new();
        let mut ctx = AppletCtx::new();
        let (mut oc, mut ic) = (wire_chan(), wire_chan());

        feed(&mut oc, PREFACE);
        feed(&mut oc, &CLIENT_SETTINGS);
        let cont = FrameHead::new(Kind::Continuation, 0, StreamId(1), 0);
        feed(&mut oc, &cont.encode());
        run(&mut mux, &mut ctx, &mut oc, &mut ic);

        assert_eq!(mux.state(), MuxState::Error);
    }

    #[test]
    fn unknown_frame_types_are_consumed_and_skipped() {
        let mut mux = H2Mux::new();
        let mut ctx = AppletCtx::new();
        let (mut oc, mut ic) = (wire_chan(), wire_chan());

        feed(&mut oc, PREFACE);
        feed(&mut oc, &CLIENT_SETTINGS);
        feed(&mut oc, &[0, 0, 3, 0x2A, 0, 0, 0, 0, 1]);
        feed(&mut oc, b"abc");
        run(&mut mux, &mut ctx, &mut oc, &mut ic);

        assert_eq!(mux.state(), MuxState::FrameHdr);
        assert_eq!(mux.frames_in(), 2);
        assert_eq!(oc.output_len(), 0);
    }

    #[test]
    fn first_frame_must_be_settings() {
        let mut mux = H2Mux::new();
        let mut ctx = AppletCtx::new();
        let (mut oc, mut ic) = (wire_chan(), wire_chan());

        feed(&mut oc, PREFACE);
        let ping = FrameHead::new(Kind::Ping, 0, StreamId::CONNECTION, 8);
        feed(&mut oc, &ping.encode());
        feed(&mut oc, b"12345678");
        run(&mut mux, &mut ctx, &mut oc, &mut ic);

        assert_eq!(mux.state(), MuxState::Error);
    }

    #[test]
    fn frame_body_split_across_arrivals() {
        let mut mux = H2Mux::new();
        let mut ctx = AppletCtx::new();
        let (mut oc, mut ic) = (wire_chan(), wire_chan());

        feed(&mut oc, PREFACE);
        feed(&mut oc, &CLIENT_SETTINGS);
        let data = FrameHead::new(Kind::Data, 0, StreamId(1), 10);
        feed(&mut oc, &data.encode());
        feed(&mut oc, b"first");
        run(&mut mux, &mut ctx, &mut oc, &mut ic);
        assert_eq!(mux.state(), MuxState::FrameBody);
        assert!(ctx.flags.contains(IfFlags::CANT_GET));

        feed(&mut oc, b"extra");
        run(&mut mux, &mut ctx, &mut oc, &mut ic);
        assert_eq!(mux.state(), MuxState::FrameHdr);
        assert_eq!(mux.frames_in(), 2);
    }
}
