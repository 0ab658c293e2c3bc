// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client core (C6): connect/handshake, the pending-request table's
//! counterpart on the wire, and the single background reader thread that
//! drives an active connection.
//!
//! Mirrors the server core's shape — a small owned `Arc<ClientInner>`, a
//! dedicated I/O thread spawned on `connect` and joined on `disconnect`/
//! `Drop` (`admin/api/server.rs`'s lifecycle again) — but splits state into
//! three independent locks instead of one coarse mutex: `io` (socket +
//! reassembler), `pending` (the C2 table), `hooks` (publish/datagram
//! callbacks). `PendingTable::deliver`/`timeout_tick`/`abort_all` only ever
//! pop entries and hand back their callback(s); the lock guard is dropped
//! before any of them run, so a reply callback that issues a chained `call`/
//! `subscribe`/`unsubscribe` can safely re-acquire `pending`. Timeouts
//! discovered by the shared timer thread are queued in
//! `expired_callbacks` and woken via `EventPair` rather than invoked
//! in place, so a timeout callback always runs on the client's own reader
//! thread, never on the timer thread shared with every other client.

use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::{ClientConfig, Endpoint};
use crate::eventpair::EventPair;
use crate::pending::{PendingKind, PendingTable, ReplyCallback};
use crate::session::{SessionId, Socket};
use crate::timer::{self, TimerClient};
use crate::wire::{self, MsgType, PacketBuilder, Reassembler, Status};

/// Fired once per inbound `PUBLISH`.
pub type PublishHandler = Box<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Fired once per inbound `DATAGRAM`.
pub type DatagramHandler = Box<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Result of a `subscribe`/`unsubscribe` round trip: `Some(())` on an `Ok`
/// acknowledgement, `None` on timeout, disconnect, or a non-`Ok` status.
pub type SubAckCallback = Box<dyn FnOnce(Option<()>) + Send>;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const HANDSHAKE_POLL: Duration = Duration::from_millis(2);

struct ClientIo {
    socket: Option<Socket>,
    reassembler: Reassembler,
    connected: bool,
    session_id: Option<SessionId>,
}

#[derive(Default)]
struct Hooks {
    on_publish: Option<Arc<PublishHandler>>,
    on_datagram: Option<Arc<DatagramHandler>>,
}

struct ClientInner {
    io: Mutex<ClientIo>,
    pending: Mutex<PendingTable>,
    /// Timeout callbacks collected by the shared timer thread's tick,
    /// drained and invoked by `reader_loop` on the client's own thread.
    expired_callbacks: Mutex<Vec<ReplyCallback>>,
    /// Wakes `reader_loop` promptly when the timer thread queues an expired
    /// callback, instead of waiting out the rest of the poll interval.
    wakeup: EventPair,
    hooks: Mutex<Hooks>,
    config: ClientConfig,
    running: AtomicBool,
    timer_registered: AtomicBool,
}

impl TimerClient for ClientInner {
    fn on_client_tick(&self, delta_ms: u32) {
        if self.running.load(Ordering::Acquire) {
            let expired = self.pending.lock().timeout_tick(delta_ms);
            if !expired.is_empty() {
                self.expired_callbacks.lock().extend(expired);
                self.wakeup.notify();
            }
        }
    }
}

/// One owned view of an assembled inbound packet, collected while `io` is
/// locked and dispatched after it is released.
struct Inbound {
    msg_type: MsgType,
    status: Status,
    seqno: u16,
    url: Vec<u8>,
    payload: Vec<u8>,
}

/// C6: a single outgoing VSOA connection.
///
/// Not `Clone` — owns the reader thread and joins it on `Drop`.
pub struct Client {
    inner: Arc<ClientInner>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn create(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                io: Mutex::new(ClientIo {
                    socket: None,
                    reassembler: Reassembler::new(),
                    connected: false,
                    session_id: None,
                }),
                pending: Mutex::new(PendingTable::new()),
                expired_callbacks: Mutex::new(Vec::new()),
                wakeup: EventPair::new(),
                hooks: Mutex::new(Hooks::default()),
                config,
                running: AtomicBool::new(false),
                timer_registered: AtomicBool::new(false),
            }),
            reader_thread: Mutex::new(None),
        }
    }

    /// Connect and complete the `SERVINFO` handshake within `timeout`. On
    /// success, the server-assigned session id is stored and a background
    /// reader thread is started; on any failure (connect refused, bad
    /// handshake reply, deadline exceeded) the client is left disconnected.
    pub fn connect(&self, endpoint: Endpoint, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut socket = match Self::dial(endpoint, timeout) {
            Some(s) => s,
            None => return false,
        };
        if socket.set_nonblocking(true).is_err() {
            return false;
        }

        let handshake = PacketBuilder::new(MsgType::ServInfo, Status::Ok, 0).finish();
        if !write_retrying(&mut socket, &handshake, deadline) {
            return false;
        }

        let mut reassembler = Reassembler::new();
        let session_id = match read_handshake_reply(&mut socket, &mut reassembler, deadline) {
            Some(id) => id,
            None => return false,
        };

        self.inner.running.store(true, Ordering::Release);
        {
            let mut io = self.inner.io.lock();
            io.socket = Some(socket);
            io.reassembler = reassembler;
            io.connected = true;
            io.session_id = Some(session_id);
        }

        if !self.inner.timer_registered.swap(true, Ordering::AcqRel) {
            let as_timer: Arc<dyn TimerClient> = self.inner.clone();
            timer::register_client(&as_timer);
        }

        let inner = self.inner.clone();
        let handle = thread::spawn(move || reader_loop(inner));
        *self.reader_thread.lock() = Some(handle);
        true
    }

    fn dial(endpoint: Endpoint, timeout: Duration) -> Option<Socket> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect_timeout(&addr, timeout).ok()?;
                stream.set_nodelay(true).ok();
                Some(Socket::Tcp(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(&path).ok()?;
                Some(Socket::Unix(stream))
            }
        }
    }

    /// Tear down the connection: stop the reader thread, drop the socket,
    /// and abort every pending call (`Rpc`-kind callbacks fire with `None`,
    /// `Result`-kind callbacks are dropped silently — see `PendingTable`).
    pub fn disconnect(&self) {
        self.inner.running.store(false, Ordering::Release);
        if let Some(handle) = self.reader_thread.lock().take() {
            let _ = handle.join();
        }
        {
            let mut io = self.inner.io.lock();
            io.socket = None;
            io.connected = false;
            io.session_id = None;
        }
        let aborted = self.inner.pending.lock().abort_all();
        for cb in aborted {
            cb(None);
        }
        // The reader thread may have exited (e.g. on a closed socket) before
        // draining a batch the timer thread had just queued.
        let leftover = std::mem::take(&mut *self.inner.expired_callbacks.lock());
        for cb in leftover {
            cb(None);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.io.lock().connected
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.io.lock().session_id
    }

    pub fn set_on_publish(&self, handler: PublishHandler) {
        self.inner.hooks.lock().on_publish = Some(Arc::new(handler));
    }

    pub fn set_on_datagram(&self, handler: DatagramHandler) {
        self.inner.hooks.lock().on_datagram = Some(Arc::new(handler));
    }

    /// Issue an RPC. `on_reply` fires exactly once: with the reply on
    /// success, or `None` on timeout or disconnect. Returns `false`
    /// immediately (without ever invoking `on_reply`) for a malformed URL,
    /// an oversized payload, a disconnected client, or an exhausted pending
    /// table.
    pub fn call(&self, url: &str, payload: &[u8], on_reply: ReplyCallback, timeout: Duration) -> bool {
        if !url.starts_with('/') || url.len() + payload.len() > wire::MAX_DATA_LENGTH {
            return false;
        }
        if !self.is_connected() {
            return false;
        }
        let seqno = match self
            .inner
            .pending
            .lock()
            .reserve(PendingKind::Rpc, timeout.as_millis() as u32, on_reply)
        {
            Ok(s) => s,
            Err(_) => return false,
        };
        let mut builder = PacketBuilder::new(MsgType::Rpc, Status::Ok, seqno);
        if builder.set_url(url.as_bytes()).is_err() || builder.set_payload(payload).is_err() {
            return false;
        }
        let _ = self.send_framed(&builder.finish());
        true
    }

    /// Send a fire-and-forget datagram on the fast seqno lane. No reply is
    /// ever expected or awaited.
    pub fn datagram(&self, url: &str, payload: &[u8]) -> bool {
        if !url.starts_with('/') || url.len() + payload.len() > wire::MAX_DATA_LENGTH {
            return false;
        }
        if !self.is_connected() {
            return false;
        }
        let seqno = self.inner.pending.lock().next_fast_seqno();
        let mut builder = PacketBuilder::new(MsgType::Datagram, Status::Ok, seqno);
        if builder.set_url(url.as_bytes()).is_err() || builder.set_payload(payload).is_err() {
            return false;
        }
        self.send_framed(&builder.finish()).is_ok()
    }

    pub fn subscribe(&self, url: &str, on_result: SubAckCallback, timeout: Duration) -> bool {
        self.sub_unsub(MsgType::Subscribe, url, on_result, timeout)
    }

    pub fn unsubscribe(&self, url: &str, on_result: SubAckCallback, timeout: Duration) -> bool {
        self.sub_unsub(MsgType::Unsubscribe, url, on_result, timeout)
    }

    fn sub_unsub(&self, msg_type: MsgType, url: &str, on_result: SubAckCallback, timeout: Duration) -> bool {
        if !url.starts_with('/') {
            return false;
        }
        if !self.is_connected() {
            return false;
        }
        let wrapped: ReplyCallback = Box::new(move |reply| {
            on_result(reply.and_then(|(status, _)| (status == Status::Ok).then_some(())))
        });
        let seqno = match self
            .inner
            .pending
            .lock()
            .reserve(PendingKind::Result, timeout.as_millis() as u32, wrapped)
        {
            Ok(s) => s,
            Err(_) => return false,
        };
        let mut builder = PacketBuilder::new(msg_type, Status::Ok, seqno);
        if builder.set_url(url.as_bytes()).is_err() {
            return false;
        }
        let _ = self.send_framed(&builder.finish());
        true
    }

    fn send_framed(&self, framed: &[u8]) -> io::Result<()> {
        let mut io = self.inner.io.lock();
        match io.socket.as_mut() {
            Some(socket) => socket.write_all(framed),
            None => Err(io::Error::new(ErrorKind::NotConnected, "not connected")),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn write_retrying(socket: &mut Socket, buf: &[u8], deadline: Instant) -> bool {
    let mut written = 0;
    while written < buf.len() {
        match socket.write(&buf[written..]) {
            Ok(0) => return false,
            Ok(n) => written += n,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return false;
                }
                thread::sleep(HANDSHAKE_POLL);
            }
            Err(_) => return false,
        }
    }
    true
}

/// Block (politely, via short sleeps on a nonblocking socket) until the
/// handshake's `SERVINFO` reply arrives or `deadline` passes. Returns the
/// assigned session id on an `Ok` reply.
fn read_handshake_reply(socket: &mut Socket, reassembler: &mut Reassembler, deadline: Instant) -> Option<SessionId> {
    let mut scratch = [0u8; 64];
    loop {
        match socket.read(&mut scratch) {
            Ok(0) => return None,
            Ok(n) => {
                let mut result = None;
                let fed = reassembler.feed(&scratch[..n], |pkt| {
                    if pkt.header.msg_type() == Some(MsgType::ServInfo) {
                        let mut id_bytes = [0u8; 4];
                        let take = pkt.data.len().min(4);
                        id_bytes[..take].copy_from_slice(&pkt.data[..take]);
                        let id = u32::from_be_bytes(id_bytes);
                        result = Some((pkt.header.status(), id));
                    }
                });
                if fed.is_err() {
                    return None;
                }
                if let Some((status, id)) = result {
                    return match status {
                        Some(Status::Ok) => Some(id),
                        _ => None,
                    };
                }
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return None;
                }
                thread::sleep(HANDSHAKE_POLL);
            }
            Err(_) => return None,
        }
    }
}

fn reader_loop(inner: Arc<ClientInner>) {
    let mut scratch = [0u8; 65536];
    while inner.running.load(Ordering::Acquire) {
        let mut inbound = Vec::new();
        let mut closed = false;
        {
            let mut io = inner.io.lock();
            if let Some(socket) = io.socket.as_mut() {
                match socket.read(&mut scratch) {
                    Ok(0) => closed = true,
                    Ok(n) => {
                        let data = &scratch[..n];
                        let fed = io.reassembler.feed(data, |pkt| {
                            if let Some(msg_type) = pkt.header.msg_type() {
                                inbound.push(Inbound {
                                    msg_type,
                                    status: pkt.header.status().unwrap_or(Status::Arguments),
                                    seqno: pkt.header.seqno,
                                    url: pkt.url.to_vec(),
                                    payload: pkt.data.to_vec(),
                                });
                            }
                        });
                        if fed.is_err() {
                            closed = true;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(_) => closed = true,
                }
            } else {
                closed = true;
            }
        }

        for pkt in inbound {
            dispatch_inbound(&inner, pkt);
        }

        // Invoke timeout callbacks the timer thread queued, on this thread
        // rather than the timer thread, per the client's single-event-loop
        // threading guarantee.
        let expired = std::mem::take(&mut *inner.expired_callbacks.lock());
        for cb in expired {
            cb(None);
        }

        if closed {
            inner.running.store(false, Ordering::Release);
            {
                let mut io = inner.io.lock();
                io.connected = false;
            }
            let aborted = inner.pending.lock().abort_all();
            for cb in aborted {
                cb(None);
            }
            let leftover = std::mem::take(&mut *inner.expired_callbacks.lock());
            for cb in leftover {
                cb(None);
            }
            return;
        }

        inner.wakeup.wait_timeout(POLL_INTERVAL);
    }
}

fn dispatch_inbound(inner: &Arc<ClientInner>, pkt: Inbound) {
    match pkt.msg_type {
        MsgType::Rpc | MsgType::Subscribe | MsgType::Unsubscribe => {
            let cb = inner.pending.lock().deliver(pkt.seqno);
            if let Some(cb) = cb {
                cb(Some((pkt.status, &pkt.payload)));
            }
        }
        MsgType::Publish => {
            let hook = inner.hooks.lock().on_publish.clone();
            if let Some(hook) = hook {
                if let Ok(url) = std::str::from_utf8(&pkt.url) {
                    hook(url, &pkt.payload);
                }
            }
        }
        MsgType::Datagram => {
            let hook = inner.hooks.lock().on_datagram.clone();
            if let Some(hook) = hook {
                if let Ok(url) = std::str::from_utf8(&pkt.url) {
                    hook(url, &pkt.payload);
                }
            }
        }
        MsgType::ServInfo | MsgType::PingEcho | MsgType::ReplyFlag | MsgType::Noop => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::HEADER_LEN;
    use std::net::{TcpListener, TcpStream as StdTcpStream};
    use std::sync::mpsc;

    /// A bare listener that speaks just enough VSOA to ack the handshake,
    /// for tests that exercise `Client` without a full `Server`.
    fn handshake_only_peer() -> (std::net::SocketAddr, JoinHandle<StdTcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut header = [0u8; HEADER_LEN];
            stream.read_exact(&mut header).unwrap();
            let mut reply = PacketBuilder::new(MsgType::ServInfo, Status::Ok, 0);
            reply.set_payload(&7u32.to_be_bytes()).unwrap();
            stream.write_all(&reply.finish()).unwrap();
            stream
        });
        (addr, handle)
    }

    #[test]
    fn connect_assigns_session_id_from_handshake_reply() {
        let (addr, handle) = handshake_only_peer();
        let client = Client::create(ClientConfig::default());
        assert!(client.connect(Endpoint::Tcp(addr), Duration::from_secs(2)));
        assert_eq!(client.session_id(), Some(7));
        client.disconnect();
        let _ = handle.join();
    }

    #[test]
    fn connect_fails_when_peer_never_replies() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = Client::create(ClientConfig::default());
        assert!(!client.connect(Endpoint::Tcp(addr), Duration::from_millis(100)));
        assert!(!client.is_connected());
        drop(listener);
    }

    #[test]
    fn call_times_out_with_none_when_server_never_replies() {
        let (addr, handle) = handshake_only_peer();
        let client = Client::create(ClientConfig::default());
        assert!(client.connect(Endpoint::Tcp(addr), Duration::from_secs(2)));

        let (tx, rx) = mpsc::channel();
        assert!(client.call(
            "/never/replied",
            b"",
            Box::new(move |reply| {
                let _ = tx.send(reply.is_none());
            }),
            Duration::from_millis(50),
        ));
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        client.disconnect();
        let _ = handle.join();
    }

    #[test]
    fn rejects_url_without_leading_slash() {
        let (addr, handle) = handshake_only_peer();
        let client = Client::create(ClientConfig::default());
        assert!(client.connect(Endpoint::Tcp(addr), Duration::from_secs(2)));
        assert!(!client.call("no-leading-slash", b"", Box::new(|_| {}), Duration::from_secs(1)));
        client.disconnect();
        let _ = handle.join();
    }
}
