// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Real-time tag database (C7): a sharded, read-mostly key/value store that
//! fans every mutating write out to a set of registered callbacks.
//!
//! Grounded on the same per-shard-lock sharding shape used for the server's
//! client and listener registries (`server::ClientRegistry`), generalized
//! from fixed hash-bucket counts to `max(2 × available_parallelism, 8)` so
//! the shard count scales with the host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

/// A named, timestamped, string-valued tag record. `name` is the primary
/// key and immutable for the record's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub name: String,
    pub value: String,
    pub timestamp_ms: u64,
    pub driver_name: String,
    pub device_name: String,
    /// Monotonically non-decreasing per key; incremented on every mutating
    /// write regardless of whether `value` actually changed.
    pub version: u64,
}

/// Snapshot of aggregate RTDB activity. Relaxed-consistency counters,
/// monitoring-only — not a synchronization boundary (mirrors the source's
/// `std::atomic<uint64_t>` relaxed stats counters).
#[derive(Debug, Default)]
pub struct RtdbStats {
    pub total_tags: usize,
    pub reads: u64,
    pub writes: u64,
    pub last_write_ts: u64,
}

type UpdateCallback = dyn Fn(&TagRecord) + Send + Sync;

struct Shard {
    tags: RwLock<HashMap<String, TagRecord>>,
}

/// Sharded tag store. Each shard owns an independent `RwLock`-guarded
/// hashmap; a key's shard is `hash(name) mod shard_count`, so unrelated
/// keys never contend on the same lock.
pub struct Rtdb {
    shards: Vec<Shard>,
    callbacks: RwLock<Vec<(u64, Arc<UpdateCallback>)>>,
    next_callback_id: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    last_write_ts: AtomicU64,
}

impl Default for Rtdb {
    fn default() -> Self {
        Self::new()
    }
}

impl Rtdb {
    /// Build a store sized `max(2 × available_parallelism, 8)` shards.
    pub fn new() -> Self {
        let shard_count = std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(8)
            .max(8);
        Self::with_shard_count(shard_count)
    }

    /// Build a store with an explicit shard count, mainly for tests that
    /// want deterministic contention characteristics.
    pub fn with_shard_count(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count)
            .map(|_| Shard {
                tags: RwLock::new(HashMap::new()),
            })
            .collect();
        Self {
            shards,
            callbacks: RwLock::new(Vec::new()),
            next_callback_id: AtomicU64::new(1),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            last_write_ts: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, name: &str) -> &Shard {
        &self.shards[fnv1a(name) as usize % self.shards.len()]
    }

    /// Pre-allocate a slot for `name` with an empty value. Fails (returns
    /// `false`) if the tag already exists.
    pub fn register(&self, name: &str) -> bool {
        let shard = self.shard_for(name);
        let mut tags = shard.tags.write();
        if tags.contains_key(name) {
            return false;
        }
        tags.insert(
            name.to_string(),
            TagRecord {
                name: name.to_string(),
                value: String::new(),
                timestamp_ms: 0,
                driver_name: String::new(),
                device_name: String::new(),
                version: 0,
            },
        );
        true
    }

    /// Remove `name`. Returns `false` if it was absent.
    pub fn unregister(&self, name: &str) -> bool {
        let shard = self.shard_for(name);
        shard.tags.write().remove(name).is_some()
    }

    /// Write `value` to `name`, creating the record if it doesn't exist yet.
    /// `ts_ms == 0` substitutes the current wall-clock time. Registered
    /// update callbacks fire with a snapshot copy after the shard's write
    /// lock is released.
    pub fn set(&self, name: &str, value: &str, ts_ms: u64, driver: &str, device: &str) {
        let ts = if ts_ms == 0 { now_ms() } else { ts_ms };
        let shard = self.shard_for(name);
        let snapshot = {
            let mut tags = shard.tags.write();
            let entry = tags.entry(name.to_string()).or_insert_with(|| TagRecord {
                name: name.to_string(),
                value: String::new(),
                timestamp_ms: 0,
                driver_name: String::new(),
                device_name: String::new(),
                version: 0,
            });
            entry.value = value.to_string();
            entry.timestamp_ms = ts;
            entry.driver_name = driver.to_string();
            entry.device_name = device.to_string();
            entry.version += 1;
            entry.clone()
        };

        self.writes.fetch_add(1, Ordering::Relaxed);
        self.last_write_ts.store(ts, Ordering::Relaxed);
        self.fire_callbacks(&snapshot);
    }

    /// Write many entries, grouped by shard to amortize locking. Returns the
    /// number of records written.
    pub fn set_many(&self, entries: &[(String, String, u64, String, String)]) -> usize {
        let mut by_shard: Vec<Vec<usize>> = vec![Vec::new(); self.shards.len()];
        for (idx, (name, ..)) in entries.iter().enumerate() {
            by_shard[fnv1a(name) as usize % self.shards.len()].push(idx);
        }

        let mut written = Vec::new();
        for (shard_idx, indices) in by_shard.into_iter().enumerate() {
            if indices.is_empty() {
                continue;
            }
            let shard = &self.shards[shard_idx];
            let mut tags = shard.tags.write();
            for idx in indices {
                let (name, value, ts_ms, driver, device) = &entries[idx];
                let ts = if *ts_ms == 0 { now_ms() } else { *ts_ms };
                let entry = tags.entry(name.clone()).or_insert_with(|| TagRecord {
                    name: name.clone(),
                    value: String::new(),
                    timestamp_ms: 0,
                    driver_name: String::new(),
                    device_name: String::new(),
                    version: 0,
                });
                entry.value = value.clone();
                entry.timestamp_ms = ts;
                entry.driver_name = driver.clone();
                entry.device_name = device.clone();
                entry.version += 1;
                written.push(entry.clone());
            }
        }

        let count = written.len();
        if count > 0 {
            self.writes.fetch_add(count as u64, Ordering::Relaxed);
            if let Some(last) = written.last() {
                self.last_write_ts.store(last.timestamp_ms, Ordering::Relaxed);
            }
        }
        for record in &written {
            self.fire_callbacks(record);
        }
        count
    }

    /// Snapshot copy of `name`, or `None` if absent.
    pub fn get(&self, name: &str) -> Option<TagRecord> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let shard = self.shard_for(name);
        shard.tags.read().get(name).cloned()
    }

    /// Snapshot copies for `names`, grouped by shard to amortize locking.
    /// Absent names are simply omitted from the result.
    pub fn get_many(&self, names: &[String]) -> Vec<TagRecord> {
        let mut by_shard: Vec<Vec<&String>> = vec![Vec::new(); self.shards.len()];
        for name in names {
            by_shard[fnv1a(name) as usize % self.shards.len()].push(name);
        }

        let mut out = Vec::with_capacity(names.len());
        for (shard_idx, wanted) in by_shard.into_iter().enumerate() {
            if wanted.is_empty() {
                continue;
            }
            let tags = self.shards[shard_idx].tags.read();
            for name in wanted {
                if let Some(record) = tags.get(name) {
                    out.push(record.clone());
                }
            }
        }
        self.reads.fetch_add(names.len() as u64, Ordering::Relaxed);
        out
    }

    /// Register an update callback, invoked on every `set`/`set_many` write
    /// (after the shard's write lock drops) with a snapshot of the written
    /// record. Returns an id usable with `remove_update_callback`.
    pub fn add_update_callback<F>(&self, callback: F) -> u64
    where
        F: Fn(&TagRecord) + Send + Sync + 'static,
    {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.write().push((id, Arc::new(callback)));
        id
    }

    /// Remove a previously registered callback by id. Returns `false` if no
    /// such id was registered.
    pub fn remove_update_callback(&self, id: u64) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(cb_id, _)| *cb_id != id);
        callbacks.len() != before
    }

    fn fire_callbacks(&self, record: &TagRecord) {
        // Snapshot the registry under its own short-lived lock so user code
        // never runs while the callback registry (or a shard) is locked.
        let snapshot: Vec<Arc<UpdateCallback>> =
            self.callbacks.read().iter().map(|(_, cb)| cb.clone()).collect();
        for cb in snapshot {
            cb(record);
        }
    }

    /// Aggregate stats for monitoring.
    pub fn stats(&self) -> RtdbStats {
        let total_tags = self.shards.iter().map(|s| s.tags.read().len()).sum();
        RtdbStats {
            total_tags,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            last_write_ts: self.last_write_ts.load(Ordering::Relaxed),
        }
    }

    /// Trivial liveness probe: the store is always healthy once constructed
    /// (no background threads, no external resources to fail).
    pub fn health(&self) -> bool {
        true
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Cheap, stable, non-cryptographic hash for shard routing.
fn fnv1a(s: &str) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for byte in s.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
