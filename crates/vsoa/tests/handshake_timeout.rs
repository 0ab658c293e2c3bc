// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A peer that connects and stays silent past the handshake deadline must
//! be dropped without ever touching the connect hook or the client count.

use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use vsoa::{Endpoint, Server, ServerConfig};

fn tcp_endpoint() -> (Endpoint, std::net::SocketAddr) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    (Endpoint::Tcp(addr), addr)
}

#[test]
fn silent_peer_is_dropped_after_handshake_deadline() {
    let (endpoint, addr) = tcp_endpoint();
    let mut config = ServerConfig::default();
    config.handshake_timeout = Duration::from_millis(150);
    let server = Arc::new(Server::create(config));

    let (tx, rx) = mpsc::channel();
    server.on_client(Box::new(move |_handle, id, connected| {
        let _ = tx.send((id, connected));
    }));
    server.start(endpoint).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let silent_peer = TcpStream::connect(addr).unwrap();
    assert_eq!(server.client_count(), 1, "accepted but not yet handshaken");

    // The connect hook only fires on a completed handshake or on a
    // disconnect of a session that was ever active; a purely pre-handshake
    // timeout fires neither.
    assert!(rx.recv_timeout(Duration::from_millis(600)).is_err());

    // Give the 100 ms server timer tick a couple of passes to reap it.
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(server.client_count(), 0);
    drop(silent_peer);
}
