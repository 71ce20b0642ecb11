//! Concurrent broadcast list of pending evidence.
//!
//! The gossip reactor iterates this list while verification threads append
//! to it and the block executor unlinks committed or expired items from it.
//! Entries are indexed by a monotonically increasing sequence number, so a
//! reader holds nothing but its last-seen sequence: items removed behind or
//! under the cursor never strand it, the next `after()` call simply lands on
//! the next surviving entry.
//!
//! Readers waiting for the list to become non-empty park on an edge-
//! triggered [`tokio::sync::Notify`] signal.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::types::Evidence;
use crate::Hash;

/// An entry handed to broadcast readers: the evidence plus the cursor to
/// resume iteration from.
#[derive(Clone, Debug)]
pub struct ListEntry {
    pub seq: u64,
    pub evidence: Evidence,
}

struct Inner {
    entries: BTreeMap<u64, Evidence>,
    next_seq: u64,
}

/// FIFO list of broadcastable evidence, safe to iterate under concurrent
/// insertion and removal.
pub struct BroadcastList {
    inner: Mutex<Inner>,
    nonempty: Notify,
}

impl BroadcastList {
    pub fn new() -> Self {
        BroadcastList {
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                next_seq: 0,
            }),
            nonempty: Notify::new(),
        }
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        // A poisoning panic cannot leave the map half-mutated (every critical
        // section is a single BTreeMap operation), so recover the guard.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append evidence at the back of the list.
    pub fn push_back(&self, evidence: Evidence) {
        let mut inner = self.locked();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(seq, evidence);
        drop(inner);
        self.nonempty.notify_waiters();
    }

    /// The oldest entry, if any.
    pub fn front(&self) -> Option<ListEntry> {
        let inner = self.locked();
        inner.entries.iter().next().map(|(&seq, ev)| ListEntry {
            seq,
            evidence: ev.clone(),
        })
    }

    /// The oldest entry strictly after `seq`. Readers iterate by feeding the
    /// returned sequence back in.
    pub fn after(&self, seq: u64) -> Option<ListEntry> {
        let inner = self.locked();
        inner
            .entries
            .range((Bound::Excluded(seq), Bound::Unbounded))
            .next()
            .map(|(&seq, ev)| ListEntry {
                seq,
                evidence: ev.clone(),
            })
    }

    /// Unlink every entry whose evidence hash is in `hashes`.
    pub fn remove_hashes(&self, hashes: &HashSet<Hash>) {
        let mut inner = self.locked();
        inner.entries.retain(|_, ev| !hashes.contains(&ev.hash()));
    }

    pub fn len(&self) -> usize {
        self.locked().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().entries.is_empty()
    }

    /// Hashes of all listed evidence in FIFO order.
    pub fn hashes(&self) -> Vec<Hash> {
        self.locked().entries.values().map(|ev| ev.hash()).collect()
    }

    /// Wait until the list is non-empty. Returns immediately if it already
    /// is; otherwise parks until the next `push_back`.
    pub async fn wait_non_empty(&self) {
        loop {
            let notified = self.nonempty.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for BroadcastList {
    fn default() -> Self {
        Self::new()
    }
}
