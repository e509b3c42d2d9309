//! HTTP/2 framing applet for the Gantry forwarding kernel.
//!
//! This crate is a protocol module: a pure, sans-IO state machine that
//! plugs into a stream interface through the applet contract. It
//! understands the client preface and the 9-byte frame head layout, emits
//! its own SETTINGS, answers PING, and enforces CONTINUATION discipline.
//! It deliberately stops short of HTTP semantics: no HPACK, no request
//! routing, no stream multiplexing beyond framing.

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::match_same_arms)]
pub mod frame;
pub mod mux;
pub mod preface;

pub use frame::{FrameError, FrameHead, Kind, StreamId, DEFAULT_MAX_FRAME_SIZE, HEADER_LEN};
pub use mux::{H2Mux, MuxState};
pub use preface::{PrefaceCheck, PREFACE, PREFACE_SIZE};
