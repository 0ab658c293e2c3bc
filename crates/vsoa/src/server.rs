// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Server core (C5): accept loop, per-client registry, listener registry,
//! publish engine, and the single-threaded event loop that drives all of
//! it.
//!
//! The event loop is a dedicated `std::thread::JoinHandle` the server
//! spawns on `start` and joins in `Drop`/`close` — the same lifecycle
//! `AdminApi::bind`/`AdminApi::drop` uses for the admin TCP listener
//! (`admin/api/server.rs`), generalized from a thread-per-connection accept
//! loop to a single thread that owns every session and polls them with
//! short nonblocking reads, since VSOA sessions must see their own packets
//! in order and share one coarse lock rather than each running on its own
//! thread. One `parking_lot::Mutex<ServerState>` guards all mutable state;
//! per-send I/O happens inside that lock (framing must serialize), but
//! every user callback (RPC handler, datagram handler, connect hook) runs
//! only after the lock has been released, per the design's "no user
//! callback runs under a C5/C7 lock" rule — callbacks receive a
//! [`ServerHandle`], a cheap `&Arc` facade, rather than the owning
//! [`Server`] itself, so invoking one never risks tearing down the event
//! loop it was called from.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::TcpListener;
#[cfg(unix)]
use std::os::unix::net::UnixListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{Endpoint, ServerConfig};
use crate::error::{Error, Result};
use crate::listener::{ListenerRegistry, Lookup};
use crate::matcher;
use crate::session::{Session, SessionId, Socket};
use crate::timer::{self, TimerServer};
use crate::wire::{MsgType, PacketBuilder, PacketView, Status};

/// Invoked for every `RPC` request routed to this listener. Arguments are a
/// borrowed view — `url`/`payload` must not be retained past the call.
/// Handlers typically call [`ServerHandle::reply`] synchronously; an
/// asynchronous reply is equally legal by capturing `client_id`/`seqno` and
/// calling `reply` later from another thread via a cloned handle.
pub type RpcHandler = Box<dyn Fn(&ServerHandle, SessionId, u16, &str, &[u8]) + Send + Sync>;

/// Invoked for every inbound `DATAGRAM` packet.
pub type DatagramHandler = Box<dyn Fn(&ServerHandle, SessionId, &str, &[u8]) + Send + Sync>;

/// Invoked exactly once per session: `true` when the handshake completes,
/// `false` on disconnect (only for sessions that ever handshook).
pub type ConnectHandler = Box<dyn Fn(&ServerHandle, SessionId, bool) + Send + Sync>;

const RECV_SCRATCH_LEN: usize = 65536;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

enum ListenSocket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl ListenSocket {
    fn accept(&self) -> std::io::Result<Socket> {
        match self {
            ListenSocket::Tcp(l) => {
                let (stream, _addr) = l.accept()?;
                stream.set_nodelay(true).ok();
                Ok(Socket::Tcp(stream))
            }
            #[cfg(unix)]
            ListenSocket::Unix(l) => {
                let (stream, _addr) = l.accept()?;
                Ok(Socket::Unix(stream))
            }
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
        match self {
            ListenSocket::Tcp(l) => l.set_nonblocking(nonblocking),
            #[cfg(unix)]
            ListenSocket::Unix(l) => l.set_nonblocking(nonblocking),
        }
    }
}

struct ClientRegistry {
    buckets: Vec<HashMap<SessionId, Session>>,
}

impl ClientRegistry {
    fn new(bucket_count: usize) -> Self {
        Self {
            buckets: (0..bucket_count.max(1)).map(|_| HashMap::new()).collect(),
        }
    }

    fn bucket_of(&self, id: SessionId) -> usize {
        id as usize % self.buckets.len()
    }

    fn insert(&mut self, session: Session) {
        let idx = self.bucket_of(session.id());
        self.buckets[idx].insert(session.id(), session);
    }

    fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        let idx = self.bucket_of(id);
        self.buckets[idx].get_mut(&id)
    }

    fn remove(&mut self, id: SessionId) -> Option<Session> {
        let idx = self.bucket_of(id);
        self.buckets[idx].remove(&id)
    }

    fn contains(&self, id: SessionId) -> bool {
        let idx = self.bucket_of(id);
        self.buckets[idx].contains_key(&id)
    }

    fn ids(&self) -> Vec<SessionId> {
        self.buckets.iter().flat_map(|b| b.keys().copied()).collect()
    }

    fn len(&self) -> usize {
        self.buckets.iter().map(HashMap::len).sum()
    }
}

struct ServerState {
    clients: ClientRegistry,
    listeners: ListenerRegistry,
    on_client: Option<Arc<ConnectHandler>>,
    next_id: u32,
}

/// Owned view of one fully assembled inbound packet, queued for dispatch
/// once the state lock is released (owned, since the reassembler's
/// borrowed `PacketView` does not outlive its callback).
struct Inbound {
    msg_type: MsgType,
    seqno: u16,
    url: Vec<u8>,
    payload: Vec<u8>,
}

struct ServerInner {
    state: Mutex<ServerState>,
    config: ServerConfig,
    running: AtomicBool,
}

impl TimerServer for ServerInner {
    fn on_server_tick(&self, delta_ms: u32) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.state.lock();
        let expired: Vec<SessionId> = state
            .clients
            .ids()
            .into_iter()
            .filter(|id| {
                state
                    .clients
                    .get_mut(*id)
                    .map(|s| !s.is_active() && s.tick_handshake(delta_ms))
                    .unwrap_or(false)
            })
            .collect();
        for id in expired {
            if let Some(session) = state.clients.remove(id) {
                log::debug!("session {id} handshake timed out");
                drop(session);
            }
        }
    }
}

/// Cheap, `Copy`-able reference to a live server's shared state, handed to
/// every RPC/datagram/connect callback instead of the owning [`Server`].
/// Holding one keeps the server alive but confers no ownership over its
/// accept thread, so a callback can safely call back into `reply`/`publish`
/// without any risk of joining its own event loop.
#[derive(Clone, Copy)]
pub struct ServerHandle<'a> {
    inner: &'a Arc<ServerInner>,
}

impl<'a> ServerHandle<'a> {
    /// Reply to an outstanding RPC request. `seqno` must match the seqno of
    /// the original request.
    pub fn reply(&self, client_id: SessionId, status: Status, seqno: u16, payload: &[u8]) -> Result<bool> {
        self.reply_as(client_id, MsgType::Rpc, status, seqno, payload)
    }

    fn reply_as(
        &self,
        client_id: SessionId,
        msg_type: MsgType,
        status: Status,
        seqno: u16,
        payload: &[u8],
    ) -> Result<bool> {
        let mut builder = PacketBuilder::new(msg_type, status, seqno);
        builder.set_payload(payload)?;
        let framed = builder.finish();

        let mut state = self.inner.state.lock();
        match state.clients.get_mut(client_id) {
            Some(session) => Ok(session.send_framed(&framed).is_ok()),
            None => Ok(false),
        }
    }

    /// Publish `payload` under `url` to every subscribed, handshaken
    /// session. A send error on one session never prevents delivery to
    /// others — it only marks that session for removal on the next poll.
    pub fn publish(&self, url: &str, payload: &[u8]) -> Result<bool> {
        publish_on(self.inner, url, payload)
    }

    pub fn close_client(&self, client_id: SessionId) {
        close_client_on(self.inner, client_id);
    }

    pub fn client_count(&self) -> usize {
        self.inner.state.lock().clients.len()
    }
}

fn publish_on(inner: &Arc<ServerInner>, url: &str, payload: &[u8]) -> Result<bool> {
    if !url.starts_with('/') {
        return Err(Error::InvalidArg("publish url must start with '/'".into()));
    }
    let mut builder = PacketBuilder::new(MsgType::Publish, Status::Ok, 0);
    builder.set_url(url.as_bytes())?;
    builder.set_payload(payload)?;
    let framed = builder.finish();

    let mut state = inner.state.lock();
    let mut delivered = false;
    for id in state.clients.ids() {
        if let Some(session) = state.clients.get_mut(id) {
            if !session.is_active() {
                continue;
            }
            let matched = session.subscriptions().iter().any(|s| matcher::matches(s, url));
            if matched {
                if session.send_framed(&framed).is_err() {
                    log::warn!("publish send failed for session {id}, marking for close");
                } else {
                    delivered = true;
                }
            }
        }
    }
    Ok(delivered)
}

fn close_client_on(inner: &Arc<ServerInner>, client_id: SessionId) {
    let fired = {
        let mut state = inner.state.lock();
        match state.clients.remove(client_id) {
            Some(session) if session.is_active() => state.on_client.clone(),
            _ => None,
        }
    };
    if let Some(hook) = fired {
        hook(&ServerHandle { inner }, client_id, false);
    }
}

/// C5: the broker accept loop, listener registry, and publish engine.
/// Not `Clone` — a single `Server` owns the accept/event-loop thread and
/// joins it on `Drop`; code that needs to act on the server from inside a
/// callback receives a [`ServerHandle`] instead.
pub struct Server {
    inner: Arc<ServerInner>,
    listen: Mutex<Option<ListenSocket>>,
    event_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Create a server with the given configuration. No socket is bound
    /// until [`Server::start`].
    pub fn create(config: ServerConfig) -> Self {
        let inner = Arc::new(ServerInner {
            state: Mutex::new(ServerState {
                clients: ClientRegistry::new(config.client_buckets),
                listeners: ListenerRegistry::new(config.listener_buckets),
                on_client: None,
                next_id: 0,
            }),
            config,
            running: AtomicBool::new(false),
        });
        Self {
            inner,
            listen: Mutex::new(None),
            event_thread: Mutex::new(None),
        }
    }

    /// Bind and start the accept/event-loop thread.
    pub fn start(&self, endpoint: Endpoint) -> Result<()> {
        let listen = match endpoint {
            Endpoint::Tcp(addr) => {
                let socket = socket2::Socket::new(
                    socket2::Domain::for_address(addr),
                    socket2::Type::STREAM,
                    Some(socket2::Protocol::TCP),
                )?;
                socket.set_reuse_address(true)?;
                socket.bind(&addr.into())?;
                socket.listen(self.inner.config.backlog)?;
                let listener: TcpListener = socket.into();
                listener.set_nonblocking(true)?;
                ListenSocket::Tcp(listener)
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let _ = std::fs::remove_file(&path);
                let listener = UnixListener::bind(&path)?;
                listener.set_nonblocking(true)?;
                ListenSocket::Unix(listener)
            }
        };

        self.inner.running.store(true, Ordering::Release);
        let as_timer: Arc<dyn TimerServer> = self.inner.clone();
        timer::register_server(&as_timer);

        let inner = self.inner.clone();
        let listen_for_thread = match &listen {
            ListenSocket::Tcp(l) => ListenSocket::Tcp(l.try_clone()?),
            #[cfg(unix)]
            ListenSocket::Unix(l) => ListenSocket::Unix(l.try_clone()?),
        };
        let handle = thread::spawn(move || event_loop(inner, listen_for_thread));

        *self.listen.lock() = Some(listen);
        *self.event_thread.lock() = Some(handle);
        Ok(())
    }

    /// Stop the event loop and close every session.
    pub fn close(&self) {
        self.inner.running.store(false, Ordering::Release);
        if let Some(handle) = self.event_thread.lock().take() {
            let _ = handle.join();
        }
        let mut state = self.inner.state.lock();
        let ids = state.clients.ids();
        for id in ids {
            state.clients.remove(id);
        }
        *self.listen.lock() = None;
    }

    /// Register (or replace) the handler for `url`.
    pub fn add_listener(&self, url: &str, handler: RpcHandler) -> Result<()> {
        if !url.starts_with('/') {
            return Err(Error::InvalidArg("listener url must start with '/'".into()));
        }
        self.inner.state.lock().listeners.add_listener(url, handler);
        Ok(())
    }

    pub fn remove_listener(&self, url: &str) {
        self.inner.state.lock().listeners.remove_listener(url);
    }

    pub fn on_datagram(&self, handler: DatagramHandler) {
        self.inner.state.lock().listeners.set_datagram_handler(handler);
    }

    pub fn on_client(&self, handler: ConnectHandler) {
        self.inner.state.lock().on_client = Some(Arc::new(handler));
    }

    /// Publish `payload` under `url` to every subscribed, handshaken session.
    pub fn publish(&self, url: &str, payload: &[u8]) -> Result<bool> {
        publish_on(&self.inner, url, payload)
    }

    /// Reply to an outstanding RPC request.
    pub fn reply(&self, client_id: SessionId, status: Status, seqno: u16, payload: &[u8]) -> Result<bool> {
        ServerHandle { inner: &self.inner }.reply(client_id, status, seqno, payload)
    }

    pub fn close_client(&self, client_id: SessionId) {
        close_client_on(&self.inner, client_id);
    }

    pub fn client_count(&self) -> usize {
        self.inner.state.lock().clients.len()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

fn event_loop(inner: Arc<ServerInner>, listen: ListenSocket) {
    listen.set_nonblocking(true).ok();
    while inner.running.load(Ordering::Acquire) {
        accept_once(&inner, &listen);
        poll_sessions(&inner);
        thread::sleep(POLL_INTERVAL);
    }
}

fn accept_once(inner: &Arc<ServerInner>, listen: &ListenSocket) {
    match listen.accept() {
        Ok(socket) => {
            socket.set_nonblocking(true).ok();
            let mut state = inner.state.lock();
            let mut id = state.next_id;
            while state.clients.contains(id) {
                id = id.wrapping_add(1);
            }
            state.next_id = id.wrapping_add(1);
            let handshake_ms = inner.config.handshake_timeout.as_millis() as u32;
            state.clients.insert(Session::new(id, socket, handshake_ms));
            log::debug!("accepted session {id}");
        }
        Err(ref e) if e.kind() == ErrorKind::WouldBlock => {}
        Err(e) => log::warn!("accept failed: {e}"),
    }
}

enum SessionOutcome {
    Ok(Vec<Inbound>),
    Close,
}

fn poll_sessions(inner: &Arc<ServerInner>) {
    let mut dispatch: Vec<(SessionId, Inbound)> = Vec::new();
    let mut closing: Vec<SessionId> = Vec::new();

    {
        let mut state = inner.state.lock();
        let ids = state.clients.ids();
        for id in ids {
            let outcome = {
                let Some(session) = state.clients.get_mut(id) else {
                    continue;
                };
                if session.is_shutting_down() {
                    SessionOutcome::Close
                } else {
                    poll_one_session(session)
                }
            };
            match outcome {
                SessionOutcome::Close => closing.push(id),
                SessionOutcome::Ok(packets) => {
                    for pkt in packets {
                        dispatch.push((id, pkt));
                    }
                }
            }
        }

        for id in &closing {
            if let Some(session) = state.clients.remove(*id) {
                drop(session);
            }
        }
    }

    for (id, pkt) in dispatch {
        dispatch_packet(inner, id, pkt);
    }

    for id in closing {
        fire_disconnect(inner, id);
    }
}

fn poll_one_session(session: &mut Session) -> SessionOutcome {
    let mut scratch = [0u8; RECV_SCRATCH_LEN];
    match session.recv(&mut scratch) {
        Ok(0) => SessionOutcome::Close,
        Ok(n) => {
            let mut packets = Vec::new();
            let feed_result = session.reassembler_mut().feed(&scratch[..n], |pkt: PacketView<'_>| {
                if let Some(msg_type) = pkt.header.msg_type() {
                    packets.push(Inbound {
                        msg_type,
                        seqno: pkt.header.seqno,
                        url: pkt.url.to_vec(),
                        payload: pkt.data.to_vec(),
                    });
                }
            });
            match feed_result {
                Ok(()) => handle_inline(session, packets),
                Err(e) => {
                    log::warn!("protocol error on session {}: {e}", session.id());
                    SessionOutcome::Close
                }
            }
        }
        Err(ref e) if e.kind() == ErrorKind::WouldBlock => SessionOutcome::Ok(Vec::new()),
        Err(_) => SessionOutcome::Close,
    }
}

/// Handle the packet kinds that never need a user callback (handshake,
/// subscribe/unsubscribe, ping-echo) inline, while the session is already
/// locked; return the rest (RPC, datagram) for dispatch after the lock
/// drops.
fn handle_inline(session: &mut Session, packets: Vec<Inbound>) -> SessionOutcome {
    let mut deferred = Vec::new();
    for pkt in packets {
        match pkt.msg_type {
            MsgType::ServInfo => {
                if session.is_active() {
                    continue;
                }
                let id = session.id();
                let mut builder = PacketBuilder::new(MsgType::ServInfo, Status::Ok, pkt.seqno);
                let _ = builder.set_payload(&id.to_be_bytes());
                if session.send_framed(&builder.finish()).is_err() {
                    return SessionOutcome::Close;
                }
                session.complete_handshake();
            }
            _ if !session.is_active() => {
                reply_invalid_url(session, pkt.msg_type, pkt.seqno);
            }
            MsgType::Subscribe => {
                let Ok(url) = std::str::from_utf8(&pkt.url) else {
                    reply_arguments(session, pkt.msg_type, pkt.seqno);
                    continue;
                };
                session.subscribe(url);
                let mut builder = PacketBuilder::new(MsgType::Subscribe, Status::Ok, pkt.seqno);
                let _ = builder.set_url(pkt.url.as_slice());
                if session.send_framed(&builder.finish()).is_err() {
                    return SessionOutcome::Close;
                }
            }
            MsgType::Unsubscribe => {
                let Ok(url) = std::str::from_utf8(&pkt.url) else {
                    reply_arguments(session, pkt.msg_type, pkt.seqno);
                    continue;
                };
                session.unsubscribe(url);
                let mut builder = PacketBuilder::new(MsgType::Unsubscribe, Status::Ok, pkt.seqno);
                let _ = builder.set_url(pkt.url.as_slice());
                if session.send_framed(&builder.finish()).is_err() {
                    return SessionOutcome::Close;
                }
            }
            MsgType::PingEcho => {
                let mut builder = PacketBuilder::new(MsgType::PingEcho, Status::Ok, pkt.seqno);
                let _ = builder.set_payload(&pkt.payload);
                if session.send_framed(&builder.finish()).is_err() {
                    return SessionOutcome::Close;
                }
            }
            MsgType::Rpc | MsgType::Datagram => deferred.push(pkt),
            MsgType::ReplyFlag | MsgType::Noop => {}
        }
    }
    SessionOutcome::Ok(deferred)
}

fn reply_invalid_url(session: &mut Session, msg_type: MsgType, seqno: u16) {
    let builder = PacketBuilder::new(msg_type, Status::InvalidUrl, seqno);
    let _ = session.send_framed(&builder.finish());
}

fn reply_arguments(session: &mut Session, msg_type: MsgType, seqno: u16) {
    let builder = PacketBuilder::new(msg_type, Status::Arguments, seqno);
    let _ = session.send_framed(&builder.finish());
}

fn dispatch_packet(inner: &Arc<ServerInner>, id: SessionId, pkt: Inbound) {
    let Ok(url) = std::str::from_utf8(&pkt.url) else {
        reply_status_only(inner, id, pkt.msg_type, pkt.seqno, Status::Arguments);
        return;
    };

    match pkt.msg_type {
        MsgType::Rpc => {
            if !url.starts_with('/') {
                reply_status_only(inner, id, pkt.msg_type, pkt.seqno, Status::Arguments);
                return;
            }
            let handler = {
                let state = inner.state.lock();
                match state.listeners.lookup(url) {
                    Lookup::Found(h) => Some(h.clone()),
                    Lookup::NotFound => None,
                }
            };
            match handler {
                Some(h) => h(&ServerHandle { inner }, id, pkt.seqno, url, &pkt.payload),
                None => reply_status_only(inner, id, pkt.msg_type, pkt.seqno, Status::InvalidUrl),
            }
        }
        MsgType::Datagram => {
            let handler = {
                let state = inner.state.lock();
                state.listeners.datagram.clone()
            };
            if let Some(h) = handler {
                h(&ServerHandle { inner }, id, url, &pkt.payload);
            }
        }
        _ => {}
    }
}

fn reply_status_only(inner: &Arc<ServerInner>, client_id: SessionId, msg_type: MsgType, seqno: u16, status: Status) {
    let builder = PacketBuilder::new(msg_type, status, seqno);
    let framed = builder.finish();
    let mut state = inner.state.lock();
    if let Some(session) = state.clients.get_mut(client_id) {
        let _ = session.send_framed(&framed);
    }
}

fn fire_disconnect(inner: &Arc<ServerInner>, id: SessionId) {
    let hook = inner.state.lock().on_client.clone();
    if let Some(hook) = hook {
        hook(&ServerHandle { inner }, id, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::config::ClientConfig;
    use std::net::SocketAddr;
    use std::sync::mpsc;

    fn tcp_endpoint() -> (Endpoint, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        (Endpoint::Tcp(addr), addr)
    }

    #[test]
    fn handshake_assigns_id_and_fires_connect_hook() {
        let (endpoint, addr) = tcp_endpoint();
        let server = Server::create(ServerConfig::default());
        let (tx, rx) = mpsc::channel();
        server.on_client(Box::new(move |_handle, id, connected| {
            let _ = tx.send((id, connected));
        }));
        server.start(endpoint).unwrap();
        thread::sleep(Duration::from_millis(20));

        let client = Client::create(ClientConfig::default());
        assert!(client.connect(Endpoint::Tcp(addr), Duration::from_secs(2)));
        assert!(client.is_connected());

        let (id, connected) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(connected);
        assert_eq!(id, 0);
        assert_eq!(server.client_count(), 1);
    }

    #[test]
    fn rpc_listener_precedence_exact_then_prefix_then_default() {
        let (endpoint, addr) = tcp_endpoint();
        let server = Server::create(ServerConfig::default());
        server
            .add_listener(
                "/x/y",
                Box::new(|handle, id, seqno, _url, _payload| {
                    let _ = handle.reply(id, Status::Ok, seqno, b"E");
                }),
            )
            .unwrap();
        server
            .add_listener(
                "/x/",
                Box::new(|handle, id, seqno, _url, _payload| {
                    let _ = handle.reply(id, Status::Ok, seqno, b"P");
                }),
            )
            .unwrap();
        server.start(endpoint).unwrap();
        thread::sleep(Duration::from_millis(20));

        let client = Client::create(ClientConfig::default());
        assert!(client.connect(Endpoint::Tcp(addr), Duration::from_secs(2)));

        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        client.call(
            "/x/y",
            b"",
            Box::new(move |reply| {
                let _ = tx2.send(reply.map(|(_s, p)| p.to_vec()));
            }),
            Duration::from_secs(2),
        );
        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got.unwrap(), b"E");

        let tx3 = tx.clone();
        client.call(
            "/x/z",
            b"",
            Box::new(move |reply| {
                let _ = tx3.send(reply.map(|(_s, p)| p.to_vec()));
            }),
            Duration::from_secs(2),
        );
        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got.unwrap(), b"P");

        let tx4 = tx.clone();
        client.call(
            "/q",
            b"",
            Box::new(move |reply| {
                let status = reply.map(|(s, _)| vec![s as u8]);
                let _ = tx4.send(status);
            }),
            Duration::from_secs(2),
        );
        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got.unwrap(), vec![Status::InvalidUrl as u8]);
    }

    #[test]
    fn publish_fans_out_only_to_matching_subscribers() {
        let (endpoint, addr) = tcp_endpoint();
        let server = Server::create(ServerConfig::default());
        server.start(endpoint).unwrap();
        thread::sleep(Duration::from_millis(20));

        let a = Client::create(ClientConfig::default());
        let b = Client::create(ClientConfig::default());
        assert!(a.connect(Endpoint::Tcp(addr), Duration::from_secs(2)));
        assert!(b.connect(Endpoint::Tcp(addr), Duration::from_secs(2)));

        let (tx_a, rx_a) = mpsc::channel();
        a.subscribe(
            "/tele/",
            Box::new(move |ok| {
                let _ = tx_a.send(ok.is_some());
            }),
            Duration::from_secs(2),
        );
        let (tx_b, rx_b) = mpsc::channel();
        b.subscribe(
            "/tele/rpm",
            Box::new(move |ok| {
                let _ = tx_b.send(ok.is_some());
            }),
            Duration::from_secs(2),
        );
        assert!(rx_a.recv_timeout(Duration::from_secs(2)).unwrap());
        assert!(rx_b.recv_timeout(Duration::from_secs(2)).unwrap());

        let (pub_tx_a, pub_rx_a) = mpsc::channel();
        a.set_on_publish(Box::new(move |url, data| {
            let _ = pub_tx_a.send((url.to_string(), data.to_vec()));
        }));
        let (pub_tx_b, pub_rx_b) = mpsc::channel();
        b.set_on_publish(Box::new(move |url, data| {
            let _ = pub_tx_b.send((url.to_string(), data.to_vec()));
        }));

        thread::sleep(Duration::from_millis(20));
        assert!(server.publish("/tele/speed", b"42").unwrap());

        let (url, data) = pub_rx_a.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(url, "/tele/speed");
        assert_eq!(data, b"42");
        assert!(pub_rx_b.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
