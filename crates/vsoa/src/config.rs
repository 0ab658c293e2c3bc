// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tunables for server and client cores, with the documented defaults.
//!
//! No CLI parsing or config-file loading lives here — that belongs to
//! whatever binary embeds this crate. Fields are plain `pub` with a
//! `Default` impl, matching the transport config structs elsewhere in this
//! codebase.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default TCP port when neither an explicit port nor `VSOA_AUTO_PORT` is set.
pub const DEFAULT_TCP_PORT: u16 = 3001;

/// Env var that overrides `DEFAULT_TCP_PORT`.
pub const AUTO_PORT_ENV: &str = "VSOA_AUTO_PORT";

/// A bindable/connectable address: a Unix-domain socket path, or a TCP
/// host/port pair.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen backlog passed to `listen(2)`.
    pub backlog: i32,

    /// How long a write is allowed to block before the session is
    /// considered stalled.
    pub send_timeout: Duration,

    /// Grace period between accept and a completed `SERVINFO` handshake
    /// before the session is closed.
    pub handshake_timeout: Duration,

    /// TCP keepalive idle time before the first probe (ignored for Unix
    /// domain sockets).
    pub tcp_keepalive_idle: Duration,

    /// Number of keepalive probes sent before the peer is considered dead.
    pub tcp_keepalive_probes: u32,

    /// Number of hash buckets for the per-id client registry.
    pub client_buckets: usize,

    /// Number of hash buckets for the exact-match listener registry.
    pub listener_buckets: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backlog: 32,
            send_timeout: Duration::from_millis(100),
            handshake_timeout: Duration::from_secs(5),
            tcp_keepalive_idle: Duration::from_secs(10),
            tcp_keepalive_probes: 3,
            client_buckets: 64,
            listener_buckets: 32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long a write is allowed to block before `connect`/`call`/etc.
    /// report failure.
    pub send_timeout: Duration,

    /// Default RPC reply timeout when the caller doesn't override it.
    pub default_rpc_timeout: Duration,

    /// Timeout for the initial connect + handshake round trip.
    pub connect_timeout: Duration,

    /// TCP keepalive idle time before the first probe.
    pub tcp_keepalive_idle: Duration,

    pub tcp_keepalive_probes: u32,

    /// Pre-allocated fast-pool size for the pending table (see `pending`).
    /// Present here for documentation of the default; the table itself is
    /// sized at the 255-slow-slot hard cap regardless.
    pub pending_fast_pool: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_millis(500),
            default_rpc_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            tcp_keepalive_idle: Duration::from_secs(10),
            tcp_keepalive_probes: 3,
            pending_fast_pool: 8,
        }
    }
}

/// Resolve the TCP port a server should bind: `VSOA_AUTO_PORT` if set and
/// parseable, else `DEFAULT_TCP_PORT`.
pub fn resolve_tcp_port() -> u16 {
    std::env::var(AUTO_PORT_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TCP_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults_match_documented_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.backlog, 32);
        assert_eq!(cfg.send_timeout, Duration::from_millis(100));
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(5));
    }

    #[test]
    fn client_defaults_match_documented_values() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.send_timeout, Duration::from_millis(500));
        assert_eq!(cfg.default_rpc_timeout, Duration::from_secs(60));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(5));
        assert_eq!(cfg.pending_fast_pool, 8);
    }
}
