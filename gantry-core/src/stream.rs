//! Stream: one client-to-server conversation.
//!
//! A stream owns a request channel, a response channel and the two stream
//! interfaces cross-wired over them:
//!
//! ```text
//!              produces req               consumes req
//!   client <-> [front interface]  ...  [back interface] <-> server/applet
//!              consumes res                produces res
//! ```
//!
//! `process` is the single scheduler step: it latches expired timers,
//! drives connection progress, runs both forwarding directions and
//! advances the interface state machines. The stream is finished exactly
//! when both interfaces reach `CLO`; the owner then frees it once.

use crate::channel::Channel;
use crate::flags::ChanFlags;
use crate::interface::{IfState, StreamInterface};
use crate::sched::{TaskId, Tick};
use smallvec::SmallVec;
use tracing::debug;

/// Inspection stage gating a channel.
///
/// Analysers run, in registration order, whenever their bit is still set
/// in the channel's analyser mask. `Done` removes the bit; `NeedMore`
/// stops the loop until new input arrives. Bytes are not forwarded while
/// any analyser bit remains.
pub trait Analyser {
    fn name(&self) -> &'static str;
    fn bit(&self) -> u32;
    fn analyse(&mut self, chn: &mut Channel) -> Verdict;
}

/// Analyser step outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// This stage is finished for good.
    Done,
    /// Not enough data yet; run again on further input.
    NeedMore,
}

/// Why a stream terminated, recorded once at the first fatal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermCause {
    /// Both sides completed and closed cleanly.
    Normal,
    /// The client stopped sending before its timeout.
    ClientTimeout,
    /// The server stopped sending or draining before its timeout.
    ServerTimeout,
    /// Analysis did not complete within its allotted time.
    AnalysisTimeout,
    /// The backend connection failed or timed out without retries left.
    ConnectError,
    /// A protocol violation was detected by an analyser or applet.
    Protocol,
    /// The client aborted mid-stream.
    ClientAbort,
    /// The server aborted mid-stream.
    ServerAbort,
}

/// Result of one stream step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    /// Both interfaces reached `CLO`; free the stream.
    pub finished: bool,
    /// Observable state changed; another step may make further progress.
    pub progressed: bool,
}

/// One proxied conversation.
pub struct Stream {
    pub id: u64,
    pub task: TaskId,
    pub front: StreamInterface,
    pub back: StreamInterface,
    pub req: Channel,
    pub res: Channel,
    req_analysers: SmallVec<[Box<dyn Analyser>; 2]>,
    res_analysers: SmallVec<[Box<dyn Analyser>; 2]>,
    term: Option<TermCause>,
    pub created: Tick,
}

impl Stream {
    #[must_use]
    pub fn new(id: u64, task: TaskId, req: Channel, res: Channel, now: Tick) -> Self {
        Self {
            id,
            task,
            front: StreamInterface::new(),
            back: StreamInterface::new(),
            req,
            res,
            req_analysers: SmallVec::new(),
            res_analysers: SmallVec::new(),
            term: None,
            created: now,
        }
    }

    /// Register a request-side analyser and gate the channel on it.
    pub fn add_req_analyser(&mut self, analyser: Box<dyn Analyser>) {
        self.req.analysers.0 |= analyser.bit();
        self.req_analysers.push(analyser);
    }

    /// Register a response-side analyser and gate the channel on it.
    pub fn add_res_analyser(&mut self, analyser: Box<dyn Analyser>) {
        self.res.analysers.0 |= analyser.bit();
        self.res_analysers.push(analyser);
    }

    #[must_use]
    pub const fn termination(&self) -> Option<TermCause> {
        self.term
    }

    /// Bytes received from the client so far.
    #[must_use]
    pub const fn bytes_in(&self) -> u64 {
        self.req.total()
    }

    /// Bytes received from the server/applet so far.
    #[must_use]
    pub const fn bytes_out(&self) -> u64 {
        self.res.total()
    }

    /// Earliest tick at which this stream needs a timer wake-up.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Tick> {
        [self.req.next_expiry(), self.res.next_expiry(), self.back.exp]
            .into_iter()
            .flatten()
            .min()
    }

    /// Run one cooperative step over both directions.
    pub fn process(&mut self, now: Tick) -> StepReport {
        let before = self.fingerprint();

        self.req.flags.clear_transient();
        self.res.flags.clear_transient();

        self.latch_timeouts(now);
        self.step_backend_connect(now);

        self.step_request(now);
        self.step_response(now);

        // Interface lifecycle: front produces req / consumes res, back the
        // opposite.
        let req_r = self.req.input_closed();
        let req_w = self.req.output_closed();
        let res_r = self.res.input_closed();
        let res_w = self.res.output_closed();
        self.front.maybe_close(req_r, res_w);
        self.back.maybe_close(res_r, req_w);

        let finished = self.front.is_closed() && self.back.is_closed();
        if finished && self.term.is_none() {
            self.term = Some(TermCause::Normal);
        }

        StepReport {
            finished,
            progressed: self.fingerprint() != before,
        }
    }

    /// Force both directions shut, recording the first cause.
    pub fn abort(&mut self, cause: TermCause) {
        if self.term.is_none() {
            self.term = Some(cause);
            debug!(target: "gantry::stream", id = self.id, ?cause, "stream aborted");
        }
        self.front.shut_read(&mut self.req);
        self.back.shut_write(&mut self.req);
        self.back.shut_read(&mut self.res);
        self.front.shut_write(&mut self.res);
    }

    /// Detach both buffers for return to the pool. The channels keep
    /// zero-capacity sentinels; the stream must not be stepped again.
    pub fn release_buffers(&mut self) -> (crate::buffer::Buffer, crate::buffer::Buffer) {
        let mut req = self.req.attach_buffer(crate::buffer::Buffer::sentinel());
        let mut res = self.res.attach_buffer(crate::buffer::Buffer::sentinel());
        req.reset();
        res.reset();
        (req, res)
    }

    // =========================
    // Step phases
    // =========================

    fn latch_timeouts(&mut self, now: Tick) {
        self.req.check_timeouts(now);
        self.res.check_timeouts(now);

        if self.req.flags.contains(ChanFlags::READ_TIMEOUT) {
            self.abort(TermCause::ClientTimeout);
        } else if self.res.flags.contains(ChanFlags::READ_TIMEOUT)
            || self.req.flags.contains(ChanFlags::WRITE_TIMEOUT)
        {
            self.abort(TermCause::ServerTimeout);
        } else if self.res.flags.contains(ChanFlags::WRITE_TIMEOUT) {
            self.abort(TermCause::ClientTimeout);
        }

        let analysis_expired = [&self.req, &self.res].into_iter().any(|chn| {
            chn.analyse_exp
                .is_some_and(|exp| now >= exp && !chn.analysers.is_empty())
        });
        if analysis_expired {
            self.abort(TermCause::AnalysisTimeout);
        }
    }

    fn step_backend_connect(&mut self, now: Tick) {
        self.back.step_connect(now);
        if self.back.state == IfState::Cer && self.back.conn_retries == 0 {
            self.abort(TermCause::ConnectError);
        }
    }

    fn step_request(&mut self, now: Tick) {
        self.front.recv_step(&mut self.req, now);

        if let Some(runner) = self.back.applet() {
            if runner.may_run(&self.req, &self.res) {
                runner.run(&mut self.req, &mut self.res);
            }
        }

        run_analysers(&mut self.req, &mut self.req_analysers);
        self.req.promote();
        self.back.send_step(&mut self.req, now);

        if self.req.flags.contains(ChanFlags::WRITE_PARTIAL) {
            self.front
                .flags
                .clear(crate::flags::IfFlags::WAIT_ROOM);
        }

        propagate_shutdown(&mut self.req, &mut self.front, &mut self.back);
        self.note_request_errors();
    }

    fn step_response(&mut self, now: Tick) {
        self.back.recv_step(&mut self.res, now);

        // A back applet may have been unblocked by response-side room or
        // request-side input that arrived after its first run.
        if let Some(runner) = self.back.applet() {
            if runner.may_run(&self.req, &self.res) {
                runner.run(&mut self.req, &mut self.res);
            }
        }
        if let Some(runner) = self.front.applet() {
            if runner.may_run(&self.res, &self.req) {
                runner.run(&mut self.res, &mut self.req);
            }
        }

        run_analysers(&mut self.res, &mut self.res_analysers);
        self.res.promote();
        self.front.send_step(&mut self.res, now);

        if self.res.flags.contains(ChanFlags::WRITE_PARTIAL) {
            self.back
                .flags
                .clear(crate::flags::IfFlags::WAIT_ROOM);
        }

        propagate_shutdown(&mut self.res, &mut self.back, &mut self.front);
        self.note_response_errors();
    }

    fn note_request_errors(&mut self) {
        if self.term.is_some() {
            return;
        }
        if self.req.flags.contains(ChanFlags::READ_ERROR) {
            self.abort(TermCause::ClientAbort);
        } else if self.req.flags.contains(ChanFlags::WRITE_ERROR) {
            self.abort(TermCause::ServerAbort);
        }
    }

    fn note_response_errors(&mut self) {
        if self.term.is_some() {
            return;
        }
        if self.res.flags.contains(ChanFlags::READ_ERROR) {
            self.abort(TermCause::ServerAbort);
        } else if self.res.flags.contains(ChanFlags::WRITE_ERROR) {
            self.abort(TermCause::ClientAbort);
        }
    }

    fn fingerprint(&self) -> (u64, u64, usize, usize, usize, usize, bool, bool, bool, bool) {
        (
            self.req.total(),
            self.res.total(),
            self.req.output_len(),
            self.res.output_len(),
            self.req.input_len(),
            self.res.input_len(),
            self.req.input_closed(),
            self.req.output_closed(),
            self.res.input_closed(),
            self.res.output_closed(),
        )
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("front", &self.front.state)
            .field("back", &self.back.state)
            .field("term", &self.term)
            .finish()
    }
}

/// Run the analyser loop for one channel, then release the gate.
///
/// Clears `READ_PARTIAL` once the loop has observed it, per the one-shot
/// flag discipline.
fn run_analysers(chn: &mut Channel, analysers: &mut [Box<dyn Analyser>]) {
    if !chn.analysers.is_empty() {
        for a in analysers.iter_mut() {
            if !chn.analysers.contains(a.bit()) {
                continue;
            }
            match a.analyse(chn) {
                Verdict::Done => chn.analysers.remove(a.bit()),
                Verdict::NeedMore => break,
            }
        }
    }
    if chn.analysers.is_empty() && !chn.flags.contains(ChanFlags::MAY_FORWARD) {
        chn.flags.set(ChanFlags::MAY_FORWARD);
    }
    chn.flags.clear(ChanFlags::READ_PARTIAL);
}

/// Forward-direction shutdown propagation for one channel.
///
/// The producer's EOF becomes `SHUTR` once analysis is done; a fully
/// drained channel whose read side is shut requests `SHUTW`; a pending
/// `SHUTW` completes when the consumer has nothing left to flush. The
/// opposite direction of the stream is deliberately left untouched.
fn propagate_shutdown(
    chn: &mut Channel,
    producer: &mut StreamInterface,
    consumer: &mut StreamInterface,
) {
    // Explicit abort request from an applet or analyser.
    if chn.flags.contains(ChanFlags::SHUTR_NOW) && !chn.input_closed() {
        producer.shut_read(chn);
    }

    // Clean EOF promotes to SHUTR only once analysis is complete.
    if chn.flags.contains(ChanFlags::READ_NULL)
        && chn.analysers.is_empty()
        && !chn.input_closed()
    {
        producer.shut_read(chn);
    }

    // Errors close the read side regardless of analysis.
    if chn
        .flags
        .intersects(ChanFlags::READ_ERROR | ChanFlags::WRITE_ERROR)
    {
        if !chn.input_closed() {
            producer.shut_read(chn);
        }
        if !chn.output_closed() {
            consumer.shut_write(chn);
        }
        return;
    }

    // A drained, read-shut channel will carry nothing more: ask the
    // consumer to close its outgoing half.
    if chn.input_closed()
        && chn.input_len() == 0
        && chn.output_len() == 0
        && !chn.flags.shutw_pending()
    {
        chn.shut_write_now();
    }

    // Complete a requested write shutdown once the output drains.
    if chn.flags.contains(ChanFlags::SHUTW_NOW)
        && chn.output_len() == 0
        && !chn.output_closed()
    {
        consumer.shut_write(chn);
    }
}
