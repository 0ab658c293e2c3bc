// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RTDB bridge - connects to a VSOA broker and fans tag updates out to
//! WebSocket sessions.
//!
//! Holds its own `Rtdb` rather than reading the broker's: the bridge sees
//! the broker only through the wire (a `vsoa::Client`), so it mirrors tag
//! state locally from inbound `PUBLISH` packets and derives the JSON push
//! frame's `timestamp`/`driver`/`device` fields from that mirror, same as
//! the upstream gateway process derives them from its own RTDB writes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};
use vsoa::{Client, ClientConfig, Endpoint, Rtdb};

use crate::protocol::PointUpdate;

/// Channel capacity for the broadcast bus feeding WebSocket sessions. A
/// session that falls this far behind drops frames (reported to it as a
/// `RecvError::Lagged`) rather than being allowed to stall the bridge.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

pub struct RtdbBridge {
    rtdb: Arc<Rtdb>,
    client: Client,
    updates: broadcast::Sender<PointUpdate>,
}

impl RtdbBridge {
    /// Connect to `endpoint`, subscribe to `prefix`, and start mirroring
    /// every `PUBLISH` under that prefix into the local RTDB.
    pub fn connect(
        endpoint: Endpoint,
        config: ClientConfig,
        prefix: &str,
        connect_timeout: Duration,
        subscribe_timeout: Duration,
    ) -> Result<Arc<Self>, String> {
        let rtdb = Arc::new(Rtdb::new());
        let (updates, _rx) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        let broadcast_tx = updates.clone();
        rtdb.add_update_callback(move |record| {
            let update = PointUpdate::new(
                &record.name,
                &record.value,
                record.timestamp_ms,
                &record.driver_name,
                &record.device_name,
            );
            // A lagging/absent receiver is not the bridge's problem to solve.
            let _ = broadcast_tx.send(update);
        });

        let client = Client::create(config);
        if !client.connect(endpoint, connect_timeout) {
            return Err("failed to connect to broker".to_string());
        }
        info!("connected to broker, mirroring prefix '{}'", prefix);

        let mirror = rtdb.clone();
        client.set_on_publish(Box::new(move |url, payload| {
            let value = String::from_utf8_lossy(payload).into_owned();
            mirror.set(url, &value, 0, "", "");
        }));

        let (ack_tx, ack_rx) = std::sync::mpsc::channel();
        let subscribed = client.subscribe(
            prefix,
            Box::new(move |result| {
                let _ = ack_tx.send(result.is_some());
            }),
            subscribe_timeout,
        );
        if !subscribed {
            return Err("subscribe call rejected before send".to_string());
        }
        match ack_rx.recv_timeout(subscribe_timeout + Duration::from_millis(500)) {
            Ok(true) => {}
            Ok(false) => return Err(format!("broker rejected subscribe to '{prefix}'")),
            Err(_) => return Err("timed out waiting for subscribe acknowledgement".to_string()),
        }

        Ok(Arc::new(Self {
            rtdb,
            client,
            updates,
        }))
    }

    /// A fresh receiver on the update broadcast bus. Each WebSocket session
    /// gets its own and filters by its own subscribed prefixes.
    pub fn updates(&self) -> broadcast::Receiver<PointUpdate> {
        self.updates.subscribe()
    }

    pub fn rtdb(&self) -> &Rtdb {
        &self.rtdb
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}

impl Drop for RtdbBridge {
    fn drop(&mut self) {
        if self.client.is_connected() {
            warn!("bridge shutting down, disconnecting broker client");
        }
    }
}
