//! Stream interface: one endpoint of a channel pair.
//!
//! Each stream owns two interfaces. An interface produces into one channel
//! (`ic`, bytes read from its attachment) and consumes from the other
//! (`oc`, bytes written to its attachment). The two interfaces of a stream
//! are cross-wired: the front produces the request channel and consumes
//! the response channel; the back does the opposite.
//!
//! The interface tracks connection progress through a small state machine:
//!
//! ```text
//! INIT -> CON -> CER          (outgoing connect, may retry)
//!          \
//!           -> EST -> DIS -> CLO
//! ```
//!
//! Accepted front connections enter `EST` directly. `DIS` means both of
//! the interface's channel sides are shut; `CLO` means the attachment has
//! been released.

use crate::applet::{Applet, AppletRunner};
use crate::channel::Channel;
use crate::endpoint::{ConnectState, Endpoint, IoResult};
use crate::flags::{ChanFlags, IfFlags};
use crate::sched::Tick;
use tracing::trace;

/// Interface connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfState {
    /// Not wired to anything yet.
    Init,
    /// Outgoing connection in flight.
    Con,
    /// Connect error; the owner may retry.
    Cer,
    /// Established; I/O flows.
    Est,
    /// Both directions shut; draining is over.
    Dis,
    /// Attachment released; terminal.
    Clo,
}

/// What is plugged into this side of the stream.
pub enum Attachment {
    None,
    Peer(Box<dyn Endpoint>),
    Applet(AppletRunner),
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Peer(_) => f.write_str("Peer"),
            Self::Applet(a) => write!(f, "Applet({})", a.name()),
        }
    }
}

/// One endpoint of a channel pair.
#[derive(Debug)]
pub struct StreamInterface {
    pub state: IfState,
    pub flags: IfFlags,
    /// Remaining connect retries while in `CER`.
    pub conn_retries: u32,
    /// Connect expiration tick while in `CON`.
    pub exp: Option<Tick>,
    attachment: Attachment,
}

impl StreamInterface {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: IfState::Init,
            flags: IfFlags::empty(),
            conn_retries: 0,
            exp: None,
            attachment: Attachment::None,
        }
    }

    // =========================
    // Wiring
    // =========================

    /// Attach an accepted peer: established immediately.
    pub fn attach_accepted(&mut self, ep: Box<dyn Endpoint>) {
        debug_assert!(matches!(self.state, IfState::Init));
        self.attachment = Attachment::Peer(ep);
        self.state = IfState::Est;
    }

    /// Attach an outgoing peer: connection pending until the endpoint
    /// reports established.
    pub fn attach_connecting(&mut self, ep: Box<dyn Endpoint>, retries: u32, exp: Option<Tick>) {
        debug_assert!(matches!(self.state, IfState::Init | IfState::Cer));
        self.attachment = Attachment::Peer(ep);
        self.conn_retries = retries;
        self.exp = exp;
        self.state = IfState::Con;
    }

    /// Attach an applet: internally terminated, established immediately.
    pub fn attach_applet(&mut self, applet: Box<dyn Applet>) {
        debug_assert!(matches!(self.state, IfState::Init));
        self.attachment = Attachment::Applet(AppletRunner::new(applet));
        self.state = IfState::Est;
    }

    #[must_use]
    pub fn applet(&mut self) -> Option<&mut AppletRunner> {
        match &mut self.attachment {
            Attachment::Applet(runner) => Some(runner),
            _ => None,
        }
    }

    #[must_use]
    pub fn peer(&mut self) -> Option<&mut Box<dyn Endpoint>> {
        match &mut self.attachment {
            Attachment::Peer(ep) => Some(ep),
            _ => None,
        }
    }

    /// Display name of the attachment for logs.
    #[must_use]
    pub fn attachment_name(&self) -> &'static str {
        match &self.attachment {
            Attachment::None => "none",
            Attachment::Peer(_) => "peer",
            Attachment::Applet(a) => a.name(),
        }
    }

    // =========================
    // Connection progress
    // =========================

    /// Drive a pending connection one step. Latches `ERR` on failure or
    /// connect timeout; the retry decision belongs to the owner.
    pub fn step_connect(&mut self, now: Tick) {
        if self.state != IfState::Con {
            return;
        }
        let Attachment::Peer(ep) = &mut self.attachment else {
            return;
        };
        match ep.poll_connect() {
            ConnectState::Established => {
                trace!(target: "gantry::iface", "connection established");
                self.state = IfState::Est;
                self.exp = None;
            }
            ConnectState::Failed => {
                self.state = IfState::Cer;
                self.flags.set(IfFlags::ERR);
            }
            ConnectState::Pending => {
                if let Some(exp) = self.exp {
                    if now >= exp {
                        trace!(target: "gantry::iface", "connect timeout");
                        self.state = IfState::Cer;
                        self.flags.set(IfFlags::ERR);
                        self.exp = None;
                    }
                }
            }
        }
    }

    // =========================
    // I/O steps (peer attachment)
    // =========================

    /// Pull from the attachment into the produced channel until the source
    /// or the buffer runs dry. Applet attachments are driven elsewhere,
    /// with both channels in hand.
    pub fn recv_step(&mut self, ic: &mut Channel, now: Tick) {
        if self.state != IfState::Est
            || ic.input_closed()
            || ic.flags.contains(ChanFlags::HIJACK)
        {
            return;
        }
        let Attachment::Peer(ep) = &mut self.attachment else {
            return;
        };

        loop {
            match ep.recv(ic) {
                IoResult::Moved(n) => {
                    trace!(target: "gantry::iface", bytes = n, "recv");
                    ic.arm_read_timeout(now);
                }
                IoResult::Full => {
                    self.flags.set(IfFlags::WAIT_ROOM);
                    break;
                }
                IoResult::WouldBlock => break,
                IoResult::Eof => {
                    ic.flags.set(ChanFlags::READ_NULL);
                    self.flags.set(IfFlags::EOS);
                    break;
                }
                IoResult::Error | IoResult::Starved => {
                    ic.flags.set(ChanFlags::READ_ERROR);
                    self.flags.set(IfFlags::ERR);
                    break;
                }
            }
        }
    }

    /// Push the consumed channel's output to the attachment; finalize a
    /// pending write shutdown once the output drains.
    pub fn send_step(&mut self, oc: &mut Channel, now: Tick) {
        if !matches!(self.state, IfState::Est | IfState::Dis) || oc.output_closed() {
            return;
        }
        if oc.flags.contains(ChanFlags::HIJACK) {
            return;
        }
        let Attachment::Peer(ep) = &mut self.attachment else {
            return;
        };

        while oc.output_len() > 0 {
            match ep.send(oc) {
                IoResult::Moved(n) => {
                    trace!(target: "gantry::iface", bytes = n, "send");
                    oc.arm_write_timeout(now);
                }
                IoResult::WouldBlock | IoResult::Starved => break,
                IoResult::Error | IoResult::Full | IoResult::Eof => {
                    oc.flags.set(ChanFlags::WRITE_ERROR);
                    self.flags.set(IfFlags::ERR);
                    break;
                }
            }
        }

        if oc.output_len() == 0 {
            self.flags.set(IfFlags::WAIT_DATA);
            if oc.flags.contains(ChanFlags::SHUTW_NOW) {
                self.shut_write(oc);
            }
        }
    }

    // =========================
    // Shutdown
    // =========================

    /// Complete a read shutdown on the produced channel.
    pub fn shut_read(&mut self, ic: &mut Channel) {
        if ic.input_closed() {
            return;
        }
        ic.apply_shutr();
        match &mut self.attachment {
            Attachment::Peer(ep) => ep.shutr(),
            Attachment::Applet(_) | Attachment::None => {}
        }
        trace!(target: "gantry::iface", "shut read");
    }

    /// Complete a write shutdown on the consumed channel.
    pub fn shut_write(&mut self, oc: &mut Channel) {
        if oc.output_closed() {
            return;
        }
        oc.apply_shutw();
        match &mut self.attachment {
            Attachment::Peer(ep) => ep.shutw(),
            Attachment::Applet(_) | Attachment::None => {}
        }
        trace!(target: "gantry::iface", "shut write");
    }

    /// Advance toward the terminal state once both channel sides are shut.
    ///
    /// `produced_shut` is the read state of the channel this interface
    /// produces; `consumed_shut` the write state of the one it consumes.
    pub fn maybe_close(&mut self, produced_shut: bool, consumed_shut: bool) {
        if self.state != IfState::Clo && produced_shut && consumed_shut {
            self.state = IfState::Dis;
            self.release();
        }
    }

    /// Release the attachment. Idempotent; runs applet `release` once.
    pub fn release(&mut self) {
        if let Attachment::Applet(runner) = &mut self.attachment {
            runner.release();
        }
        self.attachment = Attachment::None;
        self.state = IfState::Clo;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == IfState::Clo
    }
}

impl Default for StreamInterface {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::endpoint::PipeEndpoint;

    fn chan(size: usize) -> Channel {
        Channel::new(Buffer::with_capacity(size))
    }

    #[test]
    fn accepted_peer_is_established() {
        let mut si = StreamInterface::new();
        si.attach_accepted(Box::new(PipeEndpoint::new()));
        assert_eq!(si.state, IfState::Est);
    }

    #[test]
    fn recv_marks_eof_on_clean_close() {
        let mut si = StreamInterface::new();
        let mut ep = PipeEndpoint::new();
        ep.feed(b"bye");
        ep.feed_eof();
        si.attach_accepted(Box::new(ep));

        let mut ic = chan(32);
        si.recv_step(&mut ic, Tick::ZERO);

        assert_eq!(ic.input_len(), 3);
        assert!(ic.flags.contains(ChanFlags::READ_NULL));
        assert!(si.flags.contains(IfFlags::EOS));
    }

    #[test]
    fn full_buffer_sets_wait_room() {
        let mut si = StreamInterface::new();
        let mut ep = PipeEndpoint::new();
        ep.feed(&[0u8; 64]);
        si.attach_accepted(Box::new(ep));

        let mut ic = chan(8);
        si.recv_step(&mut ic, Tick::ZERO);

        assert_eq!(ic.input_len(), 8);
        assert!(si.flags.contains(IfFlags::WAIT_ROOM));
    }

    #[test]
    fn pending_shutw_completes_once_drained() {
        let mut si = StreamInterface::new();
        si.attach_accepted(Box::new(PipeEndpoint::new()));

        let mut oc = chan(32);
        oc.put_block(b"last words").unwrap();
        oc.forward(10);
        oc.shut_write_now();

        si.send_step(&mut oc, Tick::ZERO);
        assert!(oc.output_closed());
        assert_eq!(oc.output_len(), 0);
    }

    #[test]
    fn connect_timeout_latches_error() {
        let mut si = StreamInterface::new();

        struct NeverConnects;
        impl Endpoint for NeverConnects {
            fn poll_connect(&mut self) -> ConnectState {
                ConnectState::Pending
            }
            fn recv(&mut self, _: &mut Channel) -> IoResult {
                IoResult::WouldBlock
            }
            fn send(&mut self, _: &mut Channel) -> IoResult {
                IoResult::WouldBlock
            }
        }

        si.attach_connecting(Box::new(NeverConnects), 0, Some(Tick::from_millis(100)));
        si.step_connect(Tick::from_millis(50));
        assert_eq!(si.state, IfState::Con);

        si.step_connect(Tick::from_millis(100));
        assert_eq!(si.state, IfState::Cer);
        assert!(si.flags.contains(IfFlags::ERR));
    }
}
