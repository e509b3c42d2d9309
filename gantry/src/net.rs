//! TCP endpoints for stream interfaces.
//!
//! Sockets are always non-blocking: the scheduler thread must never park
//! in a syscall. Outgoing connections go through `socket2` so the connect
//! can be issued without blocking and completion checked on later steps;
//! accepted sockets are plain `std` streams flipped to non-blocking.

use gantry_core::channel::{Channel, TransferError};
use gantry_core::endpoint::{ConnectState, Endpoint, IoResult};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use tracing::trace;

/// Linux errno for a connect still in flight.
const EINPROGRESS: i32 = 115;

/// Read chunk bound per step; keeps one task from hogging the loop.
const READ_CHUNK: usize = 8192;

enum TcpState {
    Connecting(Socket),
    Connected(TcpStream),
    Dead,
}

/// Non-blocking TCP endpoint.
pub struct TcpEndpoint {
    state: TcpState,
    shut_r: bool,
    shut_w: bool,
}

impl TcpEndpoint {
    /// Wrap an accepted connection.
    pub fn from_accepted(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            state: TcpState::Connected(stream),
            shut_r: false,
            shut_w: false,
        })
    }

    /// Start a non-blocking connect toward a backend server.
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let domain = Domain::for_address(addr);
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        socket.set_nodelay(true)?;

        let state = match socket.connect(&addr.into()) {
            Ok(()) => {
                trace!(target: "gantry::net", %addr, "connected immediately");
                TcpState::Connected(socket.into())
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.raw_os_error() == Some(EINPROGRESS) =>
            {
                trace!(target: "gantry::net", %addr, "connect in flight");
                TcpState::Connecting(socket)
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            state,
            shut_r: false,
            shut_w: false,
        })
    }
}

impl Endpoint for TcpEndpoint {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn poll_connect(&mut self) -> ConnectState {
        match &mut self.state {
            TcpState::Connected(_) => ConnectState::Established,
            TcpState::Dead => ConnectState::Failed,
            TcpState::Connecting(socket) => {
                match socket.take_error() {
                    Ok(Some(_)) | Err(_) => {
                        self.state = TcpState::Dead;
                        return ConnectState::Failed;
                    }
                    Ok(None) => {}
                }
                // A readable peer address means the handshake finished.
                if socket.peer_addr().is_ok() {
                    let TcpState::Connecting(socket) =
                        std::mem::replace(&mut self.state, TcpState::Dead)
                    else {
                        unreachable!()
                    };
                    self.state = TcpState::Connected(socket.into());
                    ConnectState::Established
                } else {
                    ConnectState::Pending
                }
            }
        }
    }

    fn recv(&mut self, chn: &mut Channel) -> IoResult {
        let TcpState::Connected(stream) = &mut self.state else {
            return IoResult::WouldBlock;
        };
        if self.shut_r {
            return IoResult::Eof;
        }

        let room = chn.max_input().min(READ_CHUNK);
        if room == 0 {
            return IoResult::Full;
        }

        let mut buf = [0u8; READ_CHUNK];
        match stream.read(&mut buf[..room]) {
            Ok(0) => IoResult::Eof,
            Ok(n) => match chn.put_block(&buf[..n]) {
                Ok(put) => IoResult::Moved(put),
                Err(TransferError::Full) => IoResult::Full,
                Err(_) => IoResult::Error,
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => IoResult::WouldBlock,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => IoResult::WouldBlock,
            Err(_) => IoResult::Error,
        }
    }

    fn send(&mut self, chn: &mut Channel) -> IoResult {
        let TcpState::Connected(stream) = &mut self.state else {
            return IoResult::WouldBlock;
        };
        if self.shut_w {
            return IoResult::Error;
        }
        if chn.output_len() == 0 {
            return IoResult::Starved;
        }

        // One contiguous slice per step; the wrap tail goes out next call.
        let (head, _) = chn.buffer().output_slices();
        match stream.write(head) {
            Ok(0) => IoResult::WouldBlock,
            Ok(n) => {
                chn.skip_output(n);
                IoResult::Moved(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => IoResult::WouldBlock,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => IoResult::WouldBlock,
            Err(_) => IoResult::Error,
        }
    }

    fn shutr(&mut self) {
        self.shut_r = true;
        if let TcpState::Connected(stream) = &self.state {
            let _ = stream.shutdown(Shutdown::Read);
        }
    }

    fn shutw(&mut self) {
        self.shut_w = true;
        if let TcpState::Connected(stream) = &self.state {
            let _ = stream.shutdown(Shutdown::Write);
        }
    }
}
