//! Gantry Core
//!
//! This crate contains the runtime-agnostic forwarding kernel:
//! - Circular byte buffers with output/input regions (`buffer`)
//! - Channels: buffer + flags + timers + forwarding credit (`channel`)
//! - Stream interfaces and the endpoint seam (`interface`, `endpoint`)
//! - Protocol applets embedded in an interface (`applet`)
//! - Streams: one proxied conversation (`stream`)
//! - Single-threaded cooperative scheduler (`sched`)
//! - Typed object pools (`pool`)
//! - Error types (`error`)

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]
pub mod applet;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod flags;
pub mod interface;
pub mod pool;
pub mod sched;
pub mod stream;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::applet::{Applet, AppletCtx};
    pub use crate::buffer::Buffer;
    pub use crate::channel::{Channel, TransferError, FORWARD_INFINITE};
    pub use crate::endpoint::{ConnectState, Endpoint, IoResult, PipeEndpoint};
    pub use crate::error::CoreError;
    pub use crate::flags::{ChanFlags, IfFlags};
    pub use crate::interface::{IfState, StreamInterface};
    pub use crate::pool::Pool;
    pub use crate::sched::{Scheduler, TaskId, Tick};
    pub use crate::stream::{Analyser, Stream, StepReport, TermCause, Verdict};
}
