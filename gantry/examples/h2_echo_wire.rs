//! Drive the HTTP/2 framing applet over a real loopback socket.
//!
//! A helper thread plays the client: it sends the connection preface and
//! an empty SETTINGS frame, then prints the SETTINGS frame the mux sends
//! back. The main thread is the proxy worker, polled in a tiny loop that
//! stands in for the event multiplexer.
//!
//! Run with `RUST_LOG=trace` to watch the state machine advance.

use gantry::balance::RoundRobin;
use gantry::net::TcpEndpoint;
use gantry::topology::{Backend, Frontend, Server, Topology};
use gantry::Proxy;
use gantry_core::sched::Tick;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
const EMPTY_SETTINGS: [u8; 9] = [0, 0, 0, 4, 0, 0, 0, 0, 0];

fn main() -> std::io::Result<()> {
    gantry::dev_tracing::init_tracing();

    let mut topology = Topology::new();
    topology.add_backend(
        Backend::new("web").server(Server::new("s1", "127.0.0.1:8001".parse().unwrap())),
    );
    topology.add_frontend(Frontend::new("fe", "web"));
    let mut proxy = Proxy::new(topology, Box::new(RoundRobin::new()));

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let client = std::thread::spawn(move || {
        let mut sock = TcpStream::connect(addr).expect("connect");
        sock.write_all(PREFACE).expect("send preface");
        sock.write_all(&EMPTY_SETTINGS).expect("send settings");

        let mut frame = [0u8; 9];
        sock.read_exact(&mut frame).expect("read server settings");
        println!("server answered with SETTINGS: {frame:02X?}");
        assert_eq!(frame, EMPTY_SETTINGS);
    });

    let (accepted, peer) = listener.accept()?;
    println!("accepted {peer}, mounting the h2 mux");
    let task = proxy
        .accept_h2(Box::new(TcpEndpoint::from_accepted(accepted)?), Tick::ZERO)
        .expect("session setup");

    // Poll in place of a readiness multiplexer.
    let start = Instant::now();
    while proxy.session_count() > 0 {
        let now = Tick::from_millis(start.elapsed().as_millis() as u64);
        proxy.notify_io(task);
        proxy.run_once(now);
        std::thread::sleep(Duration::from_millis(1));
    }

    client.join().expect("client thread");
    println!("session closed cleanly");
    Ok(())
}
