// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Listener registry (C5 internals): where the server core routes an RPC
//! URL to a handler.
//!
//! Kept as three genuinely separate collections rather than one polymorphic
//! list — exact-match listeners in a hash-bucketed table, prefix listeners
//! in an insertion-ordered list, and a single optional default — mirroring
//! `ipc_server.c`'s separate `cmd_h`/`cmd_t` vs. `prefix_h`/`prefix_t` lists
//! plus a default slot (see `SPEC_FULL.md`'s "Supplemented from
//! original_source/" section). `matcher::matches` drives the actual
//! prefix-vs-exact decision; this module only owns storage and lookup
//! order.

use std::sync::Arc;

use crate::matcher;
use crate::server::{DatagramHandler, RpcHandler};

struct ExactEntry {
    url: String,
    handler: Arc<RpcHandler>,
}

struct PrefixEntry {
    url: String,
    handler: Arc<RpcHandler>,
}

/// Owns every registered RPC listener plus the optional datagram handler.
/// `add_listener`/`remove_listener` are idempotent by URL: registering an
/// already-present URL replaces its handler in place.
pub struct ListenerRegistry {
    buckets: Vec<Vec<ExactEntry>>,
    prefixes: Vec<PrefixEntry>,
    default: Option<Arc<RpcHandler>>,
    pub(crate) datagram: Option<Arc<DatagramHandler>>,
}

/// Outcome of a lookup: which handler should run, if any, and the kind of
/// match (exact matches win over prefix, prefix over default).
pub enum Lookup<'a> {
    Found(&'a Arc<RpcHandler>),
    NotFound,
}

impl ListenerRegistry {
    pub fn new(bucket_count: usize) -> Self {
        Self {
            buckets: (0..bucket_count.max(1)).map(|_| Vec::new()).collect(),
            prefixes: Vec::new(),
            default: None,
            datagram: None,
        }
    }

    /// Register or replace the handler for `url`. Detects default (`"/"`),
    /// prefix (trailing `/`, length > 1) or exact shape from the URL itself.
    pub fn add_listener(&mut self, url: &str, handler: RpcHandler) {
        let handler = Arc::new(handler);
        if matcher::is_default_pattern(url) {
            self.default = Some(handler);
        } else if matcher::is_prefix_pattern(url) {
            if let Some(existing) = self.prefixes.iter_mut().find(|e| e.url == url) {
                existing.handler = handler;
            } else {
                self.prefixes.push(PrefixEntry {
                    url: url.to_string(),
                    handler,
                });
            }
        } else {
            let bucket = &mut self.buckets[matcher::exact_bucket_hash(url, self.buckets.len())];
            if let Some(existing) = bucket.iter_mut().find(|e| e.url == url) {
                existing.handler = handler;
            } else {
                bucket.push(ExactEntry {
                    url: url.to_string(),
                    handler,
                });
            }
        }
    }

    /// Remove the listener registered under `url`, whichever shape it is.
    pub fn remove_listener(&mut self, url: &str) {
        if matcher::is_default_pattern(url) {
            self.default = None;
        } else if matcher::is_prefix_pattern(url) {
            self.prefixes.retain(|e| e.url != url);
        } else {
            let bucket = &mut self.buckets[matcher::exact_bucket_hash(url, self.buckets.len())];
            bucket.retain(|e| e.url != url);
        }
    }

    /// Resolve `request_url` to a handler: exact match wins, then the most
    /// recently registered matching prefix (LIFO of the prefix list), then
    /// the default listener.
    pub fn lookup(&self, request_url: &str) -> Lookup<'_> {
        let bucket = &self.buckets[matcher::exact_bucket_hash(request_url, self.buckets.len())];
        if let Some(entry) = bucket.iter().find(|e| e.url == request_url) {
            return Lookup::Found(&entry.handler);
        }
        for entry in self.prefixes.iter().rev() {
            if matcher::matches(&entry.url, request_url) {
                return Lookup::Found(&entry.handler);
            }
        }
        match &self.default {
            Some(h) => Lookup::Found(h),
            None => Lookup::NotFound,
        }
    }

    pub fn set_datagram_handler(&mut self, handler: DatagramHandler) {
        self.datagram = Some(Arc::new(handler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Status;

    fn marker_handler(tag: &'static str) -> RpcHandler {
        Box::new(move |_server, _id, _seqno, _url, _payload| {
            let _ = tag;
        })
    }

    #[test]
    fn exact_beats_prefix_beats_default() {
        let mut reg = ListenerRegistry::new(32);
        reg.add_listener("/", marker_handler("default"));
        reg.add_listener("/x/", marker_handler("prefix"));
        reg.add_listener("/x/y", marker_handler("exact"));

        assert!(matches!(reg.lookup("/x/y"), Lookup::Found(_)));
        assert!(matches!(reg.lookup("/x/z"), Lookup::Found(_)));
        assert!(matches!(reg.lookup("/q"), Lookup::Found(_)));
    }

    #[test]
    fn not_found_without_default() {
        let mut reg = ListenerRegistry::new(32);
        reg.add_listener("/x/y", marker_handler("exact"));
        assert!(matches!(reg.lookup("/q"), Lookup::NotFound));
        let _ = Status::Ok;
    }

    #[test]
    fn add_listener_replaces_existing_by_url() {
        let mut reg = ListenerRegistry::new(32);
        reg.add_listener("/a", marker_handler("first"));
        reg.add_listener("/a", marker_handler("second"));
        assert!(matches!(reg.lookup("/a"), Lookup::Found(_)));
    }

    #[test]
    fn remove_listener_clears_entry() {
        let mut reg = ListenerRegistry::new(32);
        reg.add_listener("/a", marker_handler("x"));
        reg.remove_listener("/a");
        assert!(matches!(reg.lookup("/a"), Lookup::NotFound));
    }
}
