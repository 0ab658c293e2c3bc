// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Standalone WebSocket push bridge (C8): connects to a VSOA broker as an
//! ordinary client, subscribes to one URL prefix, and re-publishes every
//! matching tag update to browser sessions as JSON.

mod bridge;
mod protocol;
mod session;

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use vsoa::{ClientConfig, Endpoint};

use bridge::RtdbBridge;
use session::ClientSession;

/// Bridge RTDB tag updates from a VSOA broker to WebSocket browser clients.
#[derive(Parser, Debug)]
#[command(name = "vsoa-ws", version, about)]
struct Args {
    /// Broker address to connect to, "host:port" for TCP.
    #[arg(long, default_value = "127.0.0.1:8087")]
    broker: String,

    /// Unix-domain socket path to connect to instead of `--broker`.
    #[arg(long)]
    broker_unix: Option<String>,

    /// URL prefix to subscribe on the broker; "/" mirrors every tag.
    #[arg(long, default_value = "/")]
    prefix: String,

    /// Address to bind the WebSocket/HTTP server on.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to bind the WebSocket/HTTP server on.
    #[arg(short, long, default_value_t = 8088)]
    port: u16,

    /// Maximum concurrent WebSocket sessions; further upgrades get 503.
    #[arg(long, default_value_t = 256)]
    max_clients: usize,

    /// Tracing filter, e.g. "info" or "vsoa_ws=debug".
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct AppState {
    bridge: Arc<RtdbBridge>,
    max_clients: usize,
    client_count: RwLock<usize>,
}

impl AppState {
    fn can_accept_client(&self) -> bool {
        *self.client_count.read().unwrap() < self.max_clients
    }

    fn add_client(&self) {
        *self.client_count.write().unwrap() += 1;
    }

    fn remove_client(&self) {
        let mut count = self.client_count.write().unwrap();
        *count = count.saturating_sub(1);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(args.log_level.clone()))
        .init();

    let endpoint = resolve_endpoint(&args)?;

    let bridge = RtdbBridge::connect(
        endpoint,
        ClientConfig::default(),
        &args.prefix,
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
    .map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;

    let state = Arc::new(AppState {
        bridge,
        max_clients: args.max_clients,
        client_count: RwLock::new(0),
    });

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .to_socket_addrs()?
        .next()
        .ok_or("could not resolve bind address")?;

    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn resolve_endpoint(args: &Args) -> Result<Endpoint, Box<dyn std::error::Error>> {
    if let Some(path) = &args.broker_unix {
        return Ok(Endpoint::Unix(path.into()));
    }
    let addr = args
        .broker
        .to_socket_addrs()?
        .next()
        .ok_or("could not resolve broker address")?;
    Ok(Endpoint::Tcp(addr))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    if !state.can_accept_client() {
        return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| async move {
        state.add_client();
        let session = ClientSession::new(state.bridge.clone());
        session.run(socket).await;
        state.remove_client();
    })
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if !state.bridge.is_connected() {
        error!("health check: broker connection is down");
    }
    Json(json!({
        "status": if state.bridge.is_connected() { "ok" } else { "degraded" },
        "broker_connected": state.bridge.is_connected(),
        "clients": *state.client_count.read().unwrap(),
        "rtdb_tags": state.bridge.rtdb().stats().total_tags,
    }))
}
