//! # Gantry
//!
//! A high-performance TCP/HTTP reverse proxy core with a single-threaded
//! cooperative forwarding kernel.
//!
//! ## Architecture
//!
//! Gantry is structured as a **forwarding kernel** with clean layering:
//!
//! - **`gantry-core`**: buffers, channels, stream interfaces, applets,
//!   the cooperative scheduler and typed pools
//! - **Protocol crates**: pure state machines (sans-IO), plugged in as
//!   applets
//! - **`gantry`**: proxy topology, balance strategies, admin CLI and the
//!   worker loop (this crate)
//!
//! ## Protocols (opt-in via features)
//!
//! - **`h2`** - HTTP/2 framing applet (enabled by default)
//!
//! ## Quick Start
//!
//! ```rust
//! use gantry::balance::RoundRobin;
//! use gantry::topology::{Backend, Frontend, Server, Topology};
//! use gantry::Proxy;
//! use gantry_core::endpoint::PipeEndpoint;
//! use gantry_core::sched::Tick;
//!
//! let mut topology = Topology::new();
//! topology.add_backend(
//!     Backend::new("web").server(Server::new("s1", "127.0.0.1:8001".parse().unwrap())),
//! );
//! topology.add_frontend(Frontend::new("fe", "web"));
//!
//! let mut proxy = Proxy::new(topology, Box::new(RoundRobin::new()));
//!
//! // Terminate an HTTP/2 connection internally with the framing applet.
//! let mut client = PipeEndpoint::new();
//! client.feed(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n");
//! proxy.accept_h2(Box::new(client), Tick::ZERO).unwrap();
//!
//! while proxy.run_once(Tick::ZERO) > 0 {}
//! ```
//!
//! ## Design
//!
//! - **Non-blocking everywhere**: every operation is a bounded step;
//!   readiness flags (`WAIT_ROOM`, `WAIT_DATA`) encode why a task yielded
//! - **Credit-based forwarding**: consumers drain exactly what analysis
//!   has released, nothing more
//! - **Typed pools**: steady-state traffic allocates nothing
//! - **Sans-IO protocols**: applets are pure state machines, testable
//!   without sockets

#![deny(unsafe_code)]
#![warn(clippy::all)]
// Allow some pedantic patterns
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

pub mod admin;
pub mod balance;
pub mod net;
pub mod proxy;
pub mod topology;

// Re-export core types
pub use bytes::Bytes;
pub use gantry_core::channel::{Channel, FORWARD_INFINITE};
pub use gantry_core::error::CoreError;
pub use gantry_core::sched::{Scheduler, TaskId, Tick};
pub use gantry_core::stream::{Stream, TermCause};
pub use proxy::Proxy;

#[cfg(feature = "h2")]
pub use gantry_h2 as h2;

/// Development helpers (benches/tests)
pub mod dev_tracing;
