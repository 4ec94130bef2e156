//! Retransmission bookkeeping for segments in flight.

use crate::tcp::seq::{precedes, precedes_or_eq};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// One sent-but-unacknowledged segment.
#[derive(Debug, Clone)]
struct Unacked {
    /// The encoded wire image, resent verbatim on timeout
    bytes: Vec<u8>,
    /// When this segment was last (re)sent
    sent_at: Instant,
}

/// Segments awaiting cumulative acknowledgment.
///
/// Each entry is keyed by the acknowledgment number that retires it: the
/// sequence number one past the segment's payload (one past the SYN or FIN
/// for those). Keys are compared circularly, so iteration walks the whole map
/// rather than relying on `BTreeMap` range queries, which would split a
/// window that straddles the 2^32 wraparound.
#[derive(Debug, Default)]
pub struct UnackedWindow {
    entries: BTreeMap<u32, Unacked>,
}

impl UnackedWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly sent segment retired by `ack_key`.
    pub fn insert(&mut self, ack_key: u32, bytes: Vec<u8>, now: Instant) {
        self.entries.insert(ack_key, Unacked { bytes, sent_at: now });
    }

    /// Retire every entry whose key is `<= ack` in circular order and return
    /// the retired keys.
    ///
    /// Cumulative semantics: acknowledging key K implicitly acknowledges all
    /// older keys, so a single ACK may retire several segments at once.
    pub fn prune_up_to(&mut self, ack: u32) -> Vec<u32> {
        let retired: Vec<u32> = self
            .entries
            .keys()
            .copied()
            .filter(|&key| precedes_or_eq(key, ack))
            .collect();
        for key in &retired {
            self.entries.remove(key);
        }
        retired
    }

    /// Entries whose last send is more than `rto` in the past, lazily.
    pub fn expired(
        &self,
        now: Instant,
        rto: Duration,
    ) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.entries
            .iter()
            .filter(move |(_, entry)| now.duration_since(entry.sent_at) > rto)
            .map(|(&key, entry)| (key, entry.bytes.as_slice()))
    }

    /// Refresh an entry's send timestamp after a retransmission.
    pub fn refresh(&mut self, key: u32, now: Instant) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.sent_at = now;
        }
    }

    /// The circularly smallest key still outstanding, or `None` once
    /// everything is acknowledged.
    pub fn oldest_key(&self) -> Option<u32> {
        self.entries
            .keys()
            .copied()
            .reduce(|oldest, key| if precedes(key, oldest) { key } else { oldest })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything; used on teardown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
