//! Per-source reassembly table: accepts fragments and hands back completed
//! datagrams.

use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use ahash::AHashMap;
use bytes::{Bytes, BytesMut};

use crate::header;

/// Key identifying one partial (or completed) datagram: the peer it came
/// from, and the datagram identifier the sender stamped on it.
pub type ReassemblyKey = (SocketAddr, u32);

#[derive(Debug)]
struct PartialDatagram {
    timestamp: Instant,
    seen_final: bool,
    expected_frag_count: usize,
    fragments: AHashMap<u16, Bytes>,
}

impl PartialDatagram {
    fn new(now: Instant) -> Self {
        Self {
            timestamp: now,
            seen_final: false,
            expected_frag_count: 0,
            fragments: AHashMap::new(),
        }
    }

    fn is_complete(&self) -> bool {
        self.seen_final
            && self.fragments.len() == self.expected_frag_count
            && (0..self.expected_frag_count).all(|i| self.fragments.contains_key(&(i as u16)))
    }

    fn reassemble(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(
            self.fragments.values().map(Bytes::len).sum::<usize>(),
        );
        for i in 0..self.expected_frag_count {
            out.extend_from_slice(&self.fragments[&(i as u16)]);
        }
        out.freeze()
    }
}

/// Holds partial datagrams keyed by `(peer_address, datagram_id)`, accepts
/// incoming fragments, and reports completed datagrams.
///
/// Not concurrency-safe; owned by a single unreliable endpoint.
#[derive(Debug, Default)]
pub struct ReassemblyTable {
    entries: AHashMap<ReassemblyKey, PartialDatagram>,
}

impl ReassemblyTable {
    /// Creates an empty reassembly table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: AHashMap::new(),
        }
    }

    /// Number of partial datagrams currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table currently holds no partial datagrams.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decodes and stores one inbound fragment from `peer`.
    ///
    /// Fragments that fail to decode (too short to carry a header) are
    /// dropped silently, matching the unreliable path's best-effort
    /// contract: there is no error to report to a peer that already offers
    /// no delivery guarantee.
    pub fn accept(&mut self, now: Instant, fragment: &Bytes, peer: SocketAddr) {
        let (header, body) = match header::decode(fragment) {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::trace!(?peer, "dropping fragment too short to decode");
                return;
            }
        };

        let key = (peer, header.datagram_id);
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| PartialDatagram::new(now));

        // idempotent: overwriting with identical bytes is indistinguishable
        // from a fresh insert, and the table does not detect divergent
        // duplicates.
        entry.fragments.insert(header.frag_index, body);

        if header.is_final {
            entry.seen_final = true;
            entry.expected_frag_count = usize::from(header.frag_index) + 1;
        }
    }

    /// Removes and returns the first completed datagram found, if any.
    pub fn take_completed(&mut self) -> Option<(Bytes, SocketAddr)> {
        let key = self
            .entries
            .iter()
            .find(|(_, partial)| partial.is_complete())
            .map(|(key, _)| *key)?;

        let partial = self.entries.remove(&key).expect("key was just found");
        let (peer, _datagram_id) = key;
        Some((partial.reassemble(), peer))
    }

    /// Removes every entry whose first fragment arrived at least
    /// `fragment_timeout` ago, relative to `now`.
    ///
    /// Returns the number of entries removed. Must be called between
    /// receive operations so a quiescent receiver does not accumulate dead
    /// entries indefinitely.
    pub fn age_out(&mut self, now: Instant, fragment_timeout: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, partial| now.duration_since(partial.timestamp) < fragment_timeout);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "aged out stale partial datagrams");
        }
        removed
    }
}
