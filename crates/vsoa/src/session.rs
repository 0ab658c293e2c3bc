// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session (C3): server-side state for one connected peer.
//!
//! The server core is the exclusive owner of every `Session`; no other
//! component holds a direct reference. Lifecycle: `Pending` (post-accept,
//! handshake not yet complete) → `Active` (handshake done, subscriptions and
//! RPC routing live) → the session is dropped on close, there is no
//! `Closed` state to linger in.

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::wire::Reassembler;

/// Server-assigned, monotonic, unique-over-server-lifetime session id.
pub type SessionId = u32;

/// Either transport a session can ride on.
pub enum Socket {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Socket {
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Socket::Unix(s) => s.set_nonblocking(nonblocking),
        }
    }

    pub fn try_clone(&self) -> io::Result<Socket> {
        match self {
            Socket::Tcp(s) => Ok(Socket::Tcp(s.try_clone()?)),
            #[cfg(unix)]
            Socket::Unix(s) => Ok(Socket::Unix(s.try_clone()?)),
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Socket::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Socket::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Socket::Unix(s) => s.flush(),
        }
    }
}

/// Handshake state machine: `Pending --SERVINFO--> Active`, or
/// `Pending --deadline--> (session dropped)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Pending,
    Active,
}

/// One connected peer, owned exclusively by the server core.
pub struct Session {
    id: SessionId,
    socket: Socket,
    reassembler: Reassembler,
    subscriptions: HashSet<String>,
    state: HandshakeState,
    /// Milliseconds remaining until the pre-handshake deadline; ticked down
    /// by the shared timer's 100 ms server tick. `None` once handshaken.
    handshake_deadline_ms: Option<i64>,
    /// Set once a send fails; the next event-loop pass removes the session.
    shutting_down: bool,
}

impl Session {
    pub fn new(id: SessionId, socket: Socket, handshake_timeout_ms: u32) -> Self {
        Self {
            id,
            socket,
            reassembler: Reassembler::new(),
            subscriptions: HashSet::new(),
            state: HandshakeState::Pending,
            handshake_deadline_ms: Some(handshake_timeout_ms as i64),
            shutting_down: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == HandshakeState::Active
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn mark_shutting_down(&mut self) {
        self.shutting_down = true;
    }

    /// Complete the handshake: clears the deadline and flips to `Active`.
    /// Idempotent — a second `SERVINFO` on an already-active session is a
    /// caller bug, not modeled here.
    pub fn complete_handshake(&mut self) {
        self.state = HandshakeState::Active;
        self.handshake_deadline_ms = None;
    }

    /// Decrement the pending handshake deadline. Returns `true` once it
    /// crosses zero — the caller must then close the session.
    pub fn tick_handshake(&mut self, delta_ms: u32) -> bool {
        match self.handshake_deadline_ms.as_mut() {
            Some(remaining) => {
                *remaining -= delta_ms as i64;
                *remaining <= 0
            }
            None => false,
        }
    }

    /// Idempotent subscribe: returns `true` if this added a new entry.
    pub fn subscribe(&mut self, url: &str) -> bool {
        self.subscriptions.insert(url.to_string())
    }

    /// Returns `true` if `url` was present and removed.
    pub fn unsubscribe(&mut self, url: &str) -> bool {
        self.subscriptions.remove(url)
    }

    pub fn subscriptions(&self) -> &HashSet<String> {
        &self.subscriptions
    }

    pub fn reassembler_mut(&mut self) -> &mut Reassembler {
        &mut self.reassembler
    }

    /// Read whatever is available into `scratch` without blocking the
    /// caller's event loop beyond one syscall.
    pub fn recv(&mut self, scratch: &mut [u8]) -> io::Result<usize> {
        self.socket.read(scratch)
    }

    /// Write a fully framed packet. A failure here downgrades the session
    /// to shutting-down; the caller removes it on the next event-loop pass.
    /// The bytes are written in one `write_all` call — the Rust-side
    /// equivalent of the source's scatter/gather send, since `PacketBuilder`
    /// already assembles header + url + payload into a single contiguous
    /// buffer before the session ever sees it.
    pub fn send_framed(&mut self, framed: &[u8]) -> io::Result<()> {
        match self.socket.write_all(framed) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shutting_down = true;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream as StdTcpStream};

    fn pair() -> (Socket, StdTcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (Socket::Tcp(server), client)
    }

    #[test]
    fn handshake_deadline_fires_after_elapsed_delta() {
        let (socket, _client) = pair();
        let mut session = Session::new(1, socket, 5_000);
        assert!(!session.tick_handshake(4_999));
        assert!(session.tick_handshake(1));
    }

    #[test]
    fn completing_handshake_clears_deadline() {
        let (socket, _client) = pair();
        let mut session = Session::new(1, socket, 5_000);
        session.complete_handshake();
        assert_eq!(session.state(), HandshakeState::Active);
        assert!(!session.tick_handshake(10_000));
    }

    #[test]
    fn subscribe_is_idempotent() {
        let (socket, _client) = pair();
        let mut session = Session::new(1, socket, 5_000);
        assert!(session.subscribe("/tele/"));
        assert!(!session.subscribe("/tele/"));
        assert_eq!(session.subscriptions().len(), 1);
    }
}
