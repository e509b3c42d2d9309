//! End-to-end tests: the H2 mux applet mounted on a real stream.
//!
//! The front interface is an in-memory pipe playing the client socket;
//! the back interface is the mux applet. Bytes travel the full path:
//! pipe -> request channel -> applet -> response channel -> pipe.

use gantry_core::buffer::Buffer;
use gantry_core::channel::{Channel, FORWARD_INFINITE};
use gantry_core::endpoint::PipeEndpoint;
use gantry_core::flags::ChanFlags;
use gantry_core::sched::{TaskId, Tick};
use gantry_core::stream::Stream;
use gantry_h2::{H2Mux, PREFACE};

const SETTINGS_WIRE: [u8; 9] = [0, 0, 0, 4, 0, 0, 0, 0, 0];

/// Best-effort tracing for debugging runs with `RUST_LOG` set.
fn init_tracing() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

fn h2_stream(client: PipeEndpoint) -> Stream {
    init_tracing();
    let mut stream = Stream::new(
        1,
        TaskId::default(),
        Channel::new(Buffer::with_capacity(4096)),
        Channel::new(Buffer::with_capacity(4096)),
        Tick::ZERO,
    );
    stream.front.attach_accepted(Box::new(client));
    stream.back.attach_applet(Box::new(H2Mux::new()));
    stream.req.forward(FORWARD_INFINITE);
    stream.res.forward(FORWARD_INFINITE);
    stream
}

/// Step until the stream settles (no observable change) or finishes.
fn settle(stream: &mut Stream, now: Tick) -> bool {
    for _ in 0..16 {
        let report = stream.process(now);
        if report.finished {
            return true;
        }
        if !report.progressed {
            return false;
        }
    }
    panic!("stream did not settle");
}

#[test]
fn preface_happy_path() {
    let mut client = PipeEndpoint::new();
    client.feed(PREFACE);
    client.feed(&SETTINGS_WIRE);

    let mut stream = h2_stream(client);
    let finished = settle(&mut stream, Tick::ZERO);
    assert!(!finished, "a healthy connection stays open");

    // Our empty SETTINGS reached the client, nothing was shut.
    assert_eq!(stream.bytes_out(), 9, "exactly one SETTINGS frame emitted");
    assert_eq!(stream.res.output_len(), 0, "response flushed to the client");
    assert!(!stream.req.input_closed());
    assert!(!stream.res.output_closed());
}

#[test]
fn preface_mismatch_tears_the_stream_down() {
    let mut client = PipeEndpoint::new();
    client.feed(b"GET / HTTP/1.1\r\n\r\n");

    let mut stream = h2_stream(client);
    let finished = settle(&mut stream, Tick::ZERO);

    assert!(finished, "protocol error frees the stream");
    assert!(stream.req.input_closed());
    assert!(stream.req.output_closed());
    assert!(stream.res.input_closed());
    assert!(stream.res.output_closed());
    assert!(stream.res.flags.contains(ChanFlags::READ_NULL));
}

#[test]
fn ping_round_trip_through_the_stream() {
    let mut client = PipeEndpoint::new();
    client.feed(PREFACE);
    client.feed(&SETTINGS_WIRE);
    // PING, no ACK, eight bytes of payload.
    client.feed(&[0, 0, 8, 6, 0, 0, 0, 0, 0]);
    client.feed(b"ping-pay");

    let mut stream = h2_stream(client);
    settle(&mut stream, Tick::ZERO);

    // SETTINGS (9) + PING ACK (17) on the wire back to the client.
    assert_eq!(stream.bytes_out(), 26);
    assert_eq!(stream.res.output_len(), 0);
}

#[test]
fn client_eof_closes_the_response_side() {
    let mut client = PipeEndpoint::new();
    client.feed(PREFACE);
    client.feed(&SETTINGS_WIRE);
    client.feed_eof();

    let mut stream = h2_stream(client);
    let finished = settle(&mut stream, Tick::ZERO);

    assert!(finished, "clean client close winds the stream down");
    assert!(stream.req.input_closed());
    assert!(stream.res.output_closed());
}

#[test]
fn read_timeout_reaps_an_idle_connection() {
    use gantry_core::stream::TermCause;
    use std::time::Duration;

    let mut client = PipeEndpoint::new();
    client.feed(PREFACE);
    client.feed(&SETTINGS_WIRE);

    let mut stream = h2_stream(client);
    stream.req.rto = Some(Duration::from_millis(100));
    stream.req.arm_read_timeout(Tick::ZERO);

    settle(&mut stream, Tick::ZERO);
    assert_eq!(stream.termination(), None);

    let finished = settle(&mut stream, Tick::from_millis(250));
    assert!(finished);
    assert_eq!(stream.termination(), Some(TermCause::ClientTimeout));
}
