// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The single process-wide timer thread that services every live client's
//! pending-table deadlines (10 ms tick) and every live server's handshake
//! deadlines (100 ms tick).
//!
//! Replaces the source's file-scope client/server lists with a registry
//! struct that owns the timer thread outright: the thread is spawned lazily
//! on first registration and joined when the last registration is dropped,
//! tracked by how many live `Weak` references still upgrade.

use std::sync::{Arc, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

/// Implemented by anything that wants a 10 ms tick (client cores).
pub trait TimerClient: Send + Sync {
    fn on_client_tick(&self, delta_ms: u32);
}

/// Implemented by anything that wants a 100 ms tick (server cores).
pub trait TimerServer: Send + Sync {
    fn on_server_tick(&self, delta_ms: u32);
}

const CLIENT_TICK: Duration = Duration::from_millis(10);
const SERVER_TICK_MULTIPLE: u32 = 10;

struct Registry {
    clients: Vec<Weak<dyn TimerClient>>,
    servers: Vec<Weak<dyn TimerServer>>,
    handle: Option<JoinHandle<()>>,
}

impl Registry {
    const fn new() -> Self {
        Self {
            clients: Vec::new(),
            servers: Vec::new(),
            handle: None,
        }
    }
}

static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();

fn registry() -> &'static Mutex<Registry> {
    REGISTRY.get_or_init(|| Mutex::new(Registry::new()))
}

/// Register a client core for the 10 ms tick. The caller retains the `Arc`;
/// the registry only keeps a `Weak`, so dropping every other clone
/// deregisters it automatically on the next tick.
pub fn register_client(client: &Arc<dyn TimerClient>) {
    let mut reg = registry().lock();
    reg.clients.push(Arc::downgrade(client));
    ensure_running(&mut reg);
}

/// Register a server core for the 100 ms tick.
pub fn register_server(server: &Arc<dyn TimerServer>) {
    let mut reg = registry().lock();
    reg.servers.push(Arc::downgrade(server));
    ensure_running(&mut reg);
}

fn ensure_running(reg: &mut Registry) {
    if reg.handle.is_none() {
        reg.handle = Some(std::thread::spawn(run));
    }
}

fn run() {
    let mut since_server_tick: u32 = 0;
    loop {
        std::thread::sleep(CLIENT_TICK);
        since_server_tick += 1;

        let (live_clients, live_servers, should_stop) = {
            let mut reg = registry().lock();
            reg.clients.retain(|w| w.strong_count() > 0);
            reg.servers.retain(|w| w.strong_count() > 0);
            let clients: Vec<_> = reg.clients.iter().filter_map(Weak::upgrade).collect();
            let servers: Vec<_> = reg.servers.iter().filter_map(Weak::upgrade).collect();
            let stop = reg.clients.is_empty() && reg.servers.is_empty();
            if stop {
                reg.handle = None;
            }
            (clients, servers, stop)
        };

        for c in &live_clients {
            c.on_client_tick(CLIENT_TICK.as_millis() as u32);
        }

        if since_server_tick >= SERVER_TICK_MULTIPLE {
            since_server_tick = 0;
            let delta = CLIENT_TICK.as_millis() as u32 * SERVER_TICK_MULTIPLE;
            for s in &live_servers {
                s.on_server_tick(delta);
            }
        }

        if should_stop {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingClient(AtomicU32);

    impl TimerClient for CountingClient {
        fn on_client_tick(&self, delta_ms: u32) {
            self.0.fetch_add(delta_ms, Ordering::SeqCst);
        }
    }

    #[test]
    fn registered_client_accumulates_ticks() {
        let client = Arc::new(CountingClient(AtomicU32::new(0)));
        let as_trait: Arc<dyn TimerClient> = client.clone();
        register_client(&as_trait);
        std::thread::sleep(Duration::from_millis(120));
        let elapsed = client.0.load(Ordering::SeqCst);
        assert!(elapsed >= 50, "expected several 10ms ticks, got {elapsed}");
    }
}
