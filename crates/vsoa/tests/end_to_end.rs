// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end smoke test wiring the RTDB (C7) to the server core (C5): an
//! RTDB update callback publishes the new value to bus subscribers, and an
//! RPC listener answers reads straight out of the RTDB. Exercises the same
//! "RTDB write -> broker push" path `vsoa-ws` rides on, without a
//! WebSocket hop.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use vsoa::wire::Status;
use vsoa::{Client, ClientConfig, Endpoint, Rtdb, Server, ServerConfig};

fn tcp_endpoint() -> (Endpoint, std::net::SocketAddr) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    (Endpoint::Tcp(addr), addr)
}

#[test]
fn rtdb_write_fans_out_as_publish_and_rpc_reads_current_value() {
    let (endpoint, addr) = tcp_endpoint();
    let server = Arc::new(Server::create(ServerConfig::default()));
    let rtdb = Arc::new(Rtdb::new());

    let publish_server = server.clone();
    rtdb.add_update_callback(move |record| {
        let _ = publish_server.publish(&record.name, record.value.as_bytes());
    });

    let read_rtdb = rtdb.clone();
    server
        .add_listener(
            "/tags/read",
            Box::new(move |handle, id, seqno, _url, payload| {
                let name = String::from_utf8_lossy(payload).into_owned();
                match read_rtdb.get(&name) {
                    Some(record) => {
                        let _ = handle.reply(id, Status::Ok, seqno, record.value.as_bytes());
                    }
                    None => {
                        let _ = handle.reply(id, Status::NoResponding, seqno, b"");
                    }
                }
            }),
        )
        .unwrap();

    server.start(endpoint).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let client = Client::create(ClientConfig::default());
    assert!(client.connect(Endpoint::Tcp(addr), Duration::from_secs(2)));

    let (sub_tx, sub_rx) = mpsc::channel();
    client.subscribe(
        "/tele/",
        Box::new(move |ok| {
            let _ = sub_tx.send(ok.is_some());
        }),
        Duration::from_secs(2),
    );
    assert!(sub_rx.recv_timeout(Duration::from_secs(2)).unwrap());

    let (pub_tx, pub_rx) = mpsc::channel();
    client.set_on_publish(Box::new(move |url, payload| {
        let _ = pub_tx.send((url.to_string(), payload.to_vec()));
    }));

    rtdb.set("/tele/speed", "42", 0, "obd2", "ecu-0");

    let (url, payload) = pub_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(url, "/tele/speed");
    assert_eq!(payload, b"42");

    let (rpc_tx, rpc_rx) = mpsc::channel();
    client.call(
        "/tags/read",
        b"/tele/speed",
        Box::new(move |reply| {
            let _ = rpc_tx.send(reply.map(|(status, data)| (status, data.to_vec())));
        }),
        Duration::from_secs(2),
    );
    let (status, data) = rpc_rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
    assert_eq!(status, Status::Ok);
    assert_eq!(data, b"42");

    let (miss_tx, miss_rx) = mpsc::channel();
    client.call(
        "/tags/read",
        b"/tele/unknown",
        Box::new(move |reply| {
            let _ = miss_tx.send(reply.map(|(status, _)| status));
        }),
        Duration::from_secs(2),
    );
    let status = miss_rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
    assert_eq!(status, Status::NoResponding);
}
