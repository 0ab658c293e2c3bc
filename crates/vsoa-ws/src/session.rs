// SPDX-License-Identifier: Apache-2.0 OR MIT

//! WebSocket client session management.
//!
//! Each connected browser gets a `ClientSession` that handles:
//! - command parsing (`SUBSCRIBE`/`UNSUBSCRIBE`/`PING`)
//! - its own prefix subscription set
//! - forwarding matching `POINT_UPDATE` frames from the bridge's broadcast bus
//!
//! A per-session write-mutex (the `tx` half held behind the forwarding
//! task's channel) serializes writes onto the one WebSocket I/O thread, per
//! spec.md §4.8.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vsoa::matcher;

use crate::bridge::RtdbBridge;
use crate::protocol::{parse_command, ClientCommand};

pub struct ClientSession {
    bridge: Arc<RtdbBridge>,
    prefixes: Arc<Mutex<Vec<String>>>,
    session_id: String,
}

impl ClientSession {
    pub fn new(bridge: Arc<RtdbBridge>) -> Self {
        let session_id = Uuid::new_v4().to_string()[..8].to_string();
        info!("[{}] new session", session_id);
        Self {
            bridge,
            prefixes: Arc::new(Mutex::new(Vec::new())),
            session_id,
        }
    }

    /// Run the session until the browser disconnects or a transport error
    /// occurs. Transport errors here never unwind the server: the caller
    /// just drops this session and the accept loop keeps serving others.
    pub async fn run(self, socket: WebSocket) {
        let (mut ws_tx, mut ws_rx) = socket.split();
        let (line_tx, mut line_rx) = tokio::sync::mpsc::channel::<String>(256);

        let writer_session_id = self.session_id.clone();
        let writer = tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                if ws_tx.send(Message::Text(line)).await.is_err() {
                    debug!("[{}] write failed, closing", writer_session_id);
                    break;
                }
            }
        });

        let forward = self.spawn_update_forwarder(line_tx.clone());

        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => self.handle_command(&text, &line_tx).await,
                Ok(Message::Close(_)) => {
                    info!("[{}] client closed connection", self.session_id);
                    break;
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(Message::Binary(_)) => {
                    warn!("[{}] binary frames not supported", self.session_id);
                }
                Err(e) => {
                    error!("[{}] websocket error: {}", self.session_id, e);
                    break;
                }
            }
        }

        forward.abort();
        writer.abort();
        info!("[{}] session ended", self.session_id);
    }

    fn spawn_update_forwarder(
        &self,
        line_tx: tokio::sync::mpsc::Sender<String>,
    ) -> tokio::task::JoinHandle<()> {
        let mut updates = self.bridge.updates();
        let prefixes = self.prefixes.clone();
        let session_id = self.session_id.clone();

        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => {
                        let matched = prefixes
                            .lock()
                            .iter()
                            .any(|p| matcher::matches(p, &update.name));
                        if !matched {
                            continue;
                        }
                        match serde_json::to_string(&update) {
                            Ok(json) => {
                                if line_tx.send(json).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => error!("[{}] failed to serialize update: {}", session_id, e),
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("[{}] lagged {} updates", session_id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle_command(&self, text: &str, line_tx: &tokio::sync::mpsc::Sender<String>) {
        debug!("[{}] received: {}", self.session_id, text);
        let reply = match parse_command(text) {
            Ok(ClientCommand::Subscribe(prefix)) => {
                let mut prefixes = self.prefixes.lock();
                if !prefixes.contains(&prefix) {
                    prefixes.push(prefix.clone());
                }
                info!("[{}] subscribed to '{}'", self.session_id, prefix);
                format!("SUBSCRIBED {prefix}")
            }
            Ok(ClientCommand::Unsubscribe(prefix)) => {
                self.prefixes.lock().retain(|p| p != &prefix);
                info!("[{}] unsubscribed from '{}'", self.session_id, prefix);
                format!("UNSUBSCRIBED {prefix}")
            }
            Ok(ClientCommand::Ping) => "PONG".to_string(),
            Err(e) => format!("ERROR {e}"),
        };
        let _ = line_tx.send(reply).await;
    }
}
