// SPDX-License-Identifier: Apache-2.0 OR MIT

//! VSOA message-oriented session core.
//!
//! A bidirectional, length-framed request/response/publish/subscribe bus
//! over Unix-domain or TCP stream sockets, paired with an in-process
//! real-time tag database (RTDB) that fans tag updates out to bus
//! subscribers.
//!
//! Clients connect, authenticate by a one-packet handshake, subscribe to URL
//! prefixes, publish tagged payloads, invoke RPCs whose replies are
//! correlated by sequence number, and receive server-pushed updates as the
//! RTDB mutates. This crate covers the wire codec, the pending-request
//! table, sessions, the subscription matcher, the server and client cores,
//! and the RTDB; the WebSocket push bridge that fans RTDB updates out to
//! browsers lives in the separate `vsoa-ws` binary crate, mirroring how the
//! HTTP/SQLite-backed controllers and the historical-data store sit outside
//! this core in the wider gateway.

pub mod client;
pub mod config;
mod error;
mod eventpair;
mod listener;
pub mod matcher;
pub mod pending;
pub mod rtdb;
pub mod server;
pub mod session;
mod timer;
pub mod wire;

pub use client::Client;
pub use config::{ClientConfig, Endpoint, ServerConfig};
pub use error::{Error, Result};
pub use rtdb::{Rtdb, RtdbStats, TagRecord};
pub use server::{Server, ServerHandle};
pub use session::SessionId;
pub use wire::{MsgType, Status};
