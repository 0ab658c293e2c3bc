// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Client-side pending-request table (C2): correlates an outgoing `RPC` or
//! `SUBSCRIBE`/`UNSUBSCRIBE` with its eventual reply, and times it out if
//! none arrives.
//!
//! Two disjoint seqno ranges share one 16-bit space so fast-lane sends never
//! collide with a slow-lane entry: slow-lane (callback-bearing) seqnos are
//! the low byte, `0x0000..=0x00ff`, indexed directly into a 256-slot array;
//! fast-lane (fire-and-forget) seqnos come from a 15-bit counter with the
//! top bit forced on, `0x8000..=0xffff`, and never occupy a table slot.

use crate::wire::Status;

/// Which callback flavor a slot holds. `Result`-kind entries (subscribe /
/// unsubscribe acknowledgements) are dropped silently on disconnect rather
/// than invoked with a null reply, unlike `Rpc`-kind entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Rpc,
    Result,
}

/// A reply delivered to a pending callback. `None` signals timeout or
/// disconnect (the "null reply" sentinel).
pub type ReplyCallback = Box<dyn FnOnce(Option<(Status, &[u8])>) + Send>;

struct Entry {
    kind: PendingKind,
    callback: ReplyCallback,
    deadline_ms: i64,
}

/// Highest seqno in the slow lane's 256-slot range.
const SLOW_LANE_MASK: u16 = 0x00ff;

/// Forces the top bit on so fast-lane seqnos never fall in `0x0000..=0x00ff`.
const FAST_LANE_FLAG: u16 = 0x8000;

const FAST_LANE_COUNTER_MASK: u16 = 0x7fff;

/// Per-client table. One instance per connected client.
pub struct PendingTable {
    slots: Box<[Option<Entry>; 256]>,
    cursor: u8,
    occupied: usize,
    fast_counter: u16,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            slots: Box::new(std::array::from_fn(|_| None)),
            cursor: 0,
            occupied: 0,
            fast_counter: 0,
        }
    }

    /// Number of slow-lane entries currently awaiting a reply.
    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Allocate the next fast-lane seqno for a fire-and-forget send. Does
    /// not touch the slot table.
    pub fn next_fast_seqno(&mut self) -> u16 {
        let seqno = (self.fast_counter & FAST_LANE_COUNTER_MASK) | FAST_LANE_FLAG;
        self.fast_counter = self.fast_counter.wrapping_add(1);
        seqno
    }

    /// Reserve a slow-lane slot for a callback-bearing send. Scans up to 256
    /// slots starting from a rotating cursor; fails with `Error::Busy` if
    /// every slot is occupied.
    pub fn reserve(
        &mut self,
        kind: PendingKind,
        timeout_ms: u32,
        callback: ReplyCallback,
    ) -> crate::Result<u16> {
        if self.occupied >= self.slots.len() {
            return Err(crate::Error::Busy);
        }
        for _ in 0..256 {
            let idx = self.cursor as usize;
            self.cursor = self.cursor.wrapping_add(1);
            if self.slots[idx].is_none() {
                self.slots[idx] = Some(Entry {
                    kind,
                    callback,
                    deadline_ms: timeout_ms as i64,
                });
                self.occupied += 1;
                return Ok(idx as u16 & SLOW_LANE_MASK);
            }
        }
        Err(crate::Error::Busy)
    }

    /// Remove and return the entry for `seqno`, if the low byte addresses an
    /// occupied slow-lane slot.
    fn take(&mut self, seqno: u16) -> Option<Entry> {
        let idx = (seqno & SLOW_LANE_MASK) as usize;
        let entry = self.slots[idx].take();
        if entry.is_some() {
            self.occupied -= 1;
        }
        entry
    }

    /// Pop the entry matching `seqno` and return its callback for the
    /// caller to invoke. A seqno with no matching entry (late/duplicate/
    /// fast-lane reply) returns `None`.
    ///
    /// Deliberately does not invoke the callback itself: this table is
    /// reached through a lock (`ClientInner::pending`) that a chained call
    /// made from inside the callback — an ordinary, valid usage — would
    /// need to re-acquire. Callers must drop the table's lock before
    /// calling the returned closure.
    pub fn deliver(&mut self, seqno: u16) -> Option<ReplyCallback> {
        self.take(seqno).map(|entry| entry.callback)
    }

    /// Decrement every entry's deadline by `delta_ms`, pop those that cross
    /// zero, and return their callbacks for the caller to invoke with a
    /// null reply. Runs on the shared timer thread's 10 ms tick; the
    /// returned callbacks must be invoked after the tick handler releases
    /// the table's lock — and ideally marshaled onto the client's own event
    /// loop thread rather than run on the timer thread, since a timeout
    /// callback retrying the call would otherwise deadlock or run
    /// off-thread.
    pub fn timeout_tick(&mut self, delta_ms: u32) -> Vec<ReplyCallback> {
        let mut expired = Vec::new();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot {
                entry.deadline_ms -= delta_ms as i64;
                if entry.deadline_ms <= 0 {
                    expired.push(idx);
                }
            }
        }
        let mut callbacks = Vec::with_capacity(expired.len());
        for idx in expired {
            if let Some(entry) = self.slots[idx].take() {
                self.occupied -= 1;
                callbacks.push(entry.callback);
            }
        }
        callbacks
    }

    /// Disconnect handling: pop every entry and return the `Rpc`-kind
    /// callbacks for the caller to invoke with a null reply (surfacing
    /// `NO_RESPONDING`); `Result`-kind entries are dropped without their
    /// callback ever running.
    pub fn abort_all(&mut self) -> Vec<ReplyCallback> {
        let mut callbacks = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(entry) = slot.take() {
                self.occupied -= 1;
                if entry.kind == PendingKind::Rpc {
                    callbacks.push(entry.callback);
                }
            }
        }
        callbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn reserve_and_deliver_round_trip() {
        let mut table = PendingTable::new();
        let got = Arc::new(AtomicUsize::new(0));
        let got2 = got.clone();
        let seqno = table
            .reserve(
                PendingKind::Rpc,
                1_000,
                Box::new(move |reply| {
                    assert!(reply.is_some());
                    got2.store(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(table.len(), 1);
        let cb = table.deliver(seqno).unwrap();
        cb(Some((Status::Ok, b"hi")));
        assert_eq!(got.load(Ordering::SeqCst), 1);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn busy_when_all_256_slots_occupied() {
        let mut table = PendingTable::new();
        for _ in 0..256 {
            table
                .reserve(PendingKind::Rpc, 1_000, Box::new(|_| {}))
                .unwrap();
        }
        assert!(matches!(
            table.reserve(PendingKind::Rpc, 1_000, Box::new(|_| {})),
            Err(crate::Error::Busy)
        ));
    }

    #[test]
    fn timeout_tick_fires_null_reply_and_frees_slot() {
        let mut table = PendingTable::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        table
            .reserve(
                PendingKind::Rpc,
                200,
                Box::new(move |reply| {
                    assert!(reply.is_none());
                    fired2.store(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert!(table.timeout_tick(100).is_empty());
        assert_eq!(table.len(), 1);
        let expired = table.timeout_tick(100);
        assert_eq!(expired.len(), 1);
        for cb in expired {
            cb(None);
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn abort_all_drops_result_kind_silently_but_fires_rpc_kind() {
        let mut table = PendingTable::new();
        let rpc_fired = Arc::new(AtomicUsize::new(0));
        let result_fired = Arc::new(AtomicUsize::new(0));
        let rf = rpc_fired.clone();
        let rs = result_fired.clone();
        table
            .reserve(PendingKind::Rpc, 1_000, Box::new(move |_| rf.store(1, Ordering::SeqCst)))
            .unwrap();
        table
            .reserve(
                PendingKind::Result,
                1_000,
                Box::new(move |_| rs.store(1, Ordering::SeqCst)),
            )
            .unwrap();
        let aborted = table.abort_all();
        assert_eq!(aborted.len(), 1, "only the Rpc-kind entry's callback is returned");
        for cb in aborted {
            cb(None);
        }
        assert_eq!(rpc_fired.load(Ordering::SeqCst), 1);
        assert_eq!(result_fired.load(Ordering::SeqCst), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn fast_lane_seqnos_never_collide_with_slow_lane_range() {
        let mut table = PendingTable::new();
        for _ in 0..10 {
            let s = table.next_fast_seqno();
            assert!(s & FAST_LANE_FLAG != 0);
        }
    }
}
