//! Applets: cooperative protocol mini-tasks embedded in a stream interface.
//!
//! An applet replaces a socket on one side of a stream. Instead of moving
//! bytes to a kernel, the interface hands both channels to the applet's
//! `io_handler`, which advances its protocol state machine one
//! non-blocking step and returns. When an applet cannot make progress it
//! latches `CANT_GET` (want input) or `CANT_PUT` (want room) on its
//! context and is not re-entered until the opposite endpoint changes the
//! situation.

use crate::channel::Channel;
use crate::flags::IfFlags;

/// Per-applet execution context.
///
/// `st0` is the applet's small state word; protocol crates map their state
/// enum onto it. The flag word carries the `CANT_PUT`/`CANT_GET` latches.
#[derive(Debug, Default)]
pub struct AppletCtx {
    pub st0: u32,
    pub flags: IfFlags,
}

impl AppletCtx {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch "no progress possible without more input".
    pub fn cant_get(&mut self) {
        self.flags.set(IfFlags::CANT_GET);
    }

    /// Latch "no progress possible without more room".
    pub fn cant_put(&mut self) {
        self.flags.set(IfFlags::CANT_PUT);
    }
}

/// A protocol state machine usable as a stream interface's attachment.
///
/// `oc` is the channel the applet consumes (the stream's request side when
/// attached at the back) and `ic` the channel it produces into (the
/// response side). `release` runs exactly once when the owning interface
/// closes.
pub trait Applet {
    /// Display name for logs.
    fn name(&self) -> &'static str;

    /// Advance the protocol one non-blocking step.
    fn io_handler(&mut self, ctx: &mut AppletCtx, oc: &mut Channel, ic: &mut Channel);

    /// Free applet-owned state. Called exactly once at interface close.
    fn release(&mut self) {}
}

/// An applet plus its execution context, as held by a stream interface.
pub struct AppletRunner {
    applet: Box<dyn Applet>,
    pub ctx: AppletCtx,
    released: bool,
}

impl AppletRunner {
    #[must_use]
    pub fn new(applet: Box<dyn Applet>) -> Self {
        Self {
            applet,
            ctx: AppletCtx::new(),
            released: false,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.applet.name()
    }

    /// Clear progress latches that the channels have since invalidated,
    /// then report whether the applet is runnable.
    pub fn may_run(&mut self, oc: &Channel, ic: &Channel) -> bool {
        if self.released {
            return false;
        }
        if self.ctx.flags.contains(IfFlags::CANT_GET)
            && (oc.output_len() > 0 || oc.output_closed())
        {
            self.ctx.flags.clear(IfFlags::CANT_GET);
        }
        if self.ctx.flags.contains(IfFlags::CANT_PUT) && ic.max_input() > 0 {
            self.ctx.flags.clear(IfFlags::CANT_PUT);
        }
        !self
            .ctx
            .flags
            .intersects(IfFlags::CANT_GET | IfFlags::CANT_PUT)
    }

    /// Run one applet step.
    pub fn run(&mut self, oc: &mut Channel, ic: &mut Channel) {
        debug_assert!(!self.released);
        self.applet.io_handler(&mut self.ctx, oc, ic);
    }

    /// Release applet state. Idempotent.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.applet.release();
        }
    }
}

impl std::fmt::Debug for AppletRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppletRunner")
            .field("applet", &self.applet.name())
            .field("ctx", &self.ctx)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;

    /// Echoes request bytes to the response channel.
    struct Echo {
        releases: std::rc::Rc<std::cell::Cell<u32>>,
    }

    impl Applet for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn io_handler(&mut self, ctx: &mut AppletCtx, oc: &mut Channel, ic: &mut Channel) {
            let mut byte = [0u8; 1];
            loop {
                match oc.get_block(&mut byte, 0) {
                    Ok(0) | Err(_) => {
                        ctx.cant_get();
                        return;
                    }
                    Ok(_) => {}
                }
                if ic.put_block(&byte).is_err() {
                    ctx.cant_put();
                    return;
                }
                oc.skip_output(1);
            }
        }

        fn release(&mut self) {
            self.releases.set(self.releases.get() + 1);
        }
    }

    fn chan(size: usize) -> Channel {
        Channel::new(Buffer::with_capacity(size))
    }

    #[test]
    fn latches_gate_reentry_until_progress() {
        let releases = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut runner = AppletRunner::new(Box::new(Echo {
            releases: releases.clone(),
        }));
        let mut oc = chan(16);
        let mut ic = chan(16);

        assert!(runner.may_run(&oc, &ic));
        runner.run(&mut oc, &mut ic);
        assert!(
            !runner.may_run(&oc, &ic),
            "starved applet must not be re-entered"
        );

        oc.put_block(b"hi").unwrap();
        oc.forward(2);
        assert!(runner.may_run(&oc, &ic), "new input clears the latch");
        runner.run(&mut oc, &mut ic);
        assert_eq!(ic.input_len(), 2);
    }

    #[test]
    fn release_runs_exactly_once() {
        let releases = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut runner = AppletRunner::new(Box::new(Echo {
            releases: releases.clone(),
        }));
        runner.release();
        runner.release();
        assert_eq!(releases.get(), 1);
    }
}
