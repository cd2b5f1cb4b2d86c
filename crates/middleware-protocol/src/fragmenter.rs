//! Splits an outbound payload into an ordered sequence of wire fragments.

use bytes::Bytes;
use thiserror::Error;

use crate::header::{self, FragHeader, DGRAM_ID_LIMIT, FRAG_IDX_LIMIT, HEADER_LEN};

/// Smallest MTU this crate will configure a socket for.
///
/// [`MAX_DATAGRAM_PAYLOAD`] is derived from this value, not the configured
/// MTU, so the bound stays stable across configurations.
pub const MTU_MIN: u32 = 64;

/// Bytes of IPv4 + UDP header overhead assumed to sit below a fragment.
pub const UDP_IP_HEADER_SIZE: u32 = 28;
/// Bytes of overhead this crate's own fragment header adds.
pub const MW_HEADER_SIZE: u32 = HEADER_LEN as u32;
/// Total per-fragment overhead: [`UDP_IP_HEADER_SIZE`] + [`MW_HEADER_SIZE`].
pub const TOTAL_HEADER_SIZE: u32 = UDP_IP_HEADER_SIZE + MW_HEADER_SIZE;

/// The largest payload [`Fragmenter::fragment`] will accept, derived from
/// [`MTU_MIN`] so it is independent of the configured MTU.
pub const MAX_DATAGRAM_PAYLOAD: usize =
    (MTU_MIN - TOTAL_HEADER_SIZE) as usize * FRAG_IDX_LIMIT as usize;

/// Given a configured `mtu`, the largest fragment body that fits.
///
/// # Panics
///
/// Panics if `mtu < MTU_MIN` (callers are expected to validate MTU at
/// configuration time; see `middleware_config::Config`).
#[must_use]
pub fn max_frag_payload(mtu: u32) -> usize {
    assert!(mtu >= MTU_MIN, "mtu {mtu} below MTU_MIN ({MTU_MIN})");
    (mtu - TOTAL_HEADER_SIZE) as usize
}

/// Error produced when a payload is too large to fragment at all, regardless
/// of MTU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("payload of {len} bytes exceeds the maximum of {MAX_DATAGRAM_PAYLOAD} bytes")]
pub struct PayloadTooLarge {
    /// Length of the rejected payload, in bytes.
    pub len: usize,
}

/// Splits outbound payloads into fragments and assigns monotonic datagram
/// identifiers.
///
/// Not concurrency-safe: a single `Fragmenter` is expected to live behind one
/// endpoint's serialization discipline (see the unreliable endpoint).
#[derive(Debug)]
pub struct Fragmenter {
    max_frag_payload: usize,
    next_datagram_id: u32,
}

impl Fragmenter {
    /// Creates a fragmenter that produces fragments no larger than
    /// `max_frag_payload` bytes of body (use [`max_frag_payload`] to compute
    /// this from an MTU).
    #[must_use]
    pub fn new(max_frag_payload: usize) -> Self {
        assert!(max_frag_payload > 0, "max_frag_payload must be nonzero");
        Self {
            max_frag_payload,
            next_datagram_id: 0,
        }
    }

    /// Splits `payload` into an ordered sequence of encoded wire fragments,
    /// consuming the next datagram identifier.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadTooLarge`] if `payload.len() > MAX_DATAGRAM_PAYLOAD`.
    pub fn fragment(&mut self, payload: Bytes) -> Result<Fragments, PayloadTooLarge> {
        if payload.len() > MAX_DATAGRAM_PAYLOAD {
            return Err(PayloadTooLarge { len: payload.len() });
        }

        let datagram_id = self.next_datagram_id;
        self.next_datagram_id = (self.next_datagram_id + 1) % DGRAM_ID_LIMIT;

        let num_frags = if payload.is_empty() {
            1
        } else {
            payload.len().div_ceil(self.max_frag_payload)
        };

        Ok(Fragments {
            payload,
            datagram_id,
            max_frag_payload: self.max_frag_payload,
            num_frags,
            next_index: 0,
        })
    }
}

/// Iterator over the encoded fragments produced by [`Fragmenter::fragment`].
///
/// Fragments are produced lazily in index order, so a caller can stream them
/// straight to the socket without materializing the whole list.
#[derive(Debug)]
pub struct Fragments {
    payload: Bytes,
    datagram_id: u32,
    max_frag_payload: usize,
    num_frags: usize,
    next_index: usize,
}

impl Fragments {
    /// Total number of fragments this message was split into.
    #[must_use]
    pub fn num_frags(&self) -> usize {
        self.num_frags
    }

    /// Datagram identifier shared by every fragment in this sequence.
    #[must_use]
    pub fn datagram_id(&self) -> u32 {
        self.datagram_id
    }
}

impl Iterator for Fragments {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.num_frags {
            return None;
        }

        let index = self.next_index;
        self.next_index += 1;

        let start = index * self.max_frag_payload;
        let end = (start + self.max_frag_payload).min(self.payload.len());
        let body = self.payload.slice(start..end);

        let header = FragHeader {
            datagram_id: self.datagram_id,
            is_final: index == self.num_frags - 1,
            frag_index: index as u16,
        };

        // header fields are derived from values already validated in
        // `Fragmenter::fragment`, so encoding cannot fail here.
        Some(header::encode(header, &body).expect("fragment header fields are in range"))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.num_frags - self.next_index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Fragments {}
