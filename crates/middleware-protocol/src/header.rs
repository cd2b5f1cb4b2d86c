//! Encoding and decoding of the 5-byte fragment header.
//!
//! The header is a 40-bit integer packed into 5 little-endian bytes:
//!
//! ```text
//! bits [0..11)  frag_index  (11 bits, 0-based)
//! bit  11       is_final    (1 bit)
//! bits [12..40) datagram_id (28 bits, monotonic mod 2^28)
//! ```
//!
//! Packing is done via shift-and-mask on a `u64` accumulator rather than a
//! variable-width integer library, since the header is always exactly 5
//! bytes regardless of the values it carries.

use bytes::{Bytes, BytesMut};

/// Number of bits used to encode [`datagram_id`](Fragment::datagram_id).
pub const DGRAM_ID_BITS: u32 = 28;
/// Number of bits used to encode [`frag_index`](Fragment::frag_index).
pub const FRAG_IDX_BITS: u32 = 11;

/// Exclusive upper bound on a valid `datagram_id`, i.e. `2^28`.
pub const DGRAM_ID_LIMIT: u32 = 1 << DGRAM_ID_BITS;
/// Exclusive upper bound on a valid `frag_index`, i.e. `2^11`.
pub const FRAG_IDX_LIMIT: u16 = 1 << FRAG_IDX_BITS;

/// Size in bytes of an encoded [`Fragment`] header.
pub const HEADER_LEN: usize = 5;

const IS_FINAL_BIT: u64 = 1 << FRAG_IDX_BITS;
const DGRAM_ID_SHIFT: u32 = FRAG_IDX_BITS + 1;

/// The parsed fields of a fragment header.
///
/// This does not own the fragment body; see [`encode`] and [`decode`] for how
/// a header is combined with a body into wire bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragHeader {
    /// Identifier assigned by the sender to the datagram this fragment
    /// belongs to, monotonic modulo `2^28`.
    pub datagram_id: u32,
    /// Set iff this is the last fragment of its datagram.
    pub is_final: bool,
    /// 0-based position of this fragment within its datagram.
    pub frag_index: u16,
}

/// Error produced when [`encode`] is given an out-of-range field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// `datagram_id` did not fit in [`DGRAM_ID_BITS`] bits.
    #[error("datagram id {0} exceeds 2^{DGRAM_ID_BITS} - 1")]
    DatagramIdOutOfRange(u32),
    /// `frag_index` did not fit in [`FRAG_IDX_BITS`] bits.
    #[error("fragment index {0} exceeds 2^{FRAG_IDX_BITS} - 1")]
    FragIndexOutOfRange(u16),
}

/// Error produced when [`decode`] is given too few bytes to contain a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("buffer of {len} bytes is shorter than the {HEADER_LEN}-byte header")]
pub struct DecodingError {
    /// Length of the buffer that was passed to [`decode`].
    pub len: usize,
}

impl FragHeader {
    fn pack(self) -> Result<u64, EncodingError> {
        if self.datagram_id >= DGRAM_ID_LIMIT {
            return Err(EncodingError::DatagramIdOutOfRange(self.datagram_id));
        }
        if self.frag_index >= FRAG_IDX_LIMIT {
            return Err(EncodingError::FragIndexOutOfRange(self.frag_index));
        }

        let mut word = u64::from(self.frag_index);
        if self.is_final {
            word |= IS_FINAL_BIT;
        }
        word |= u64::from(self.datagram_id) << DGRAM_ID_SHIFT;
        Ok(word)
    }

    fn unpack(word: u64) -> Self {
        let frag_index = (word & u64::from(FRAG_IDX_LIMIT - 1)) as u16;
        let is_final = word & IS_FINAL_BIT != 0;
        let datagram_id = ((word >> DGRAM_ID_SHIFT) & u64::from(DGRAM_ID_LIMIT - 1)) as u32;
        Self {
            datagram_id,
            is_final,
            frag_index,
        }
    }
}

/// Encodes `header` followed by `body` into a single fragment.
///
/// # Errors
///
/// Returns [`EncodingError`] if `header.datagram_id` or `header.frag_index`
/// is out of range for its bit width.
pub fn encode(header: FragHeader, body: &[u8]) -> Result<Bytes, EncodingError> {
    let word = header.pack()?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(&word.to_le_bytes()[..HEADER_LEN]);
    buf.extend_from_slice(body);
    Ok(buf.freeze())
}

/// Decodes a fragment into its header and body.
///
/// The returned `Bytes` body is a cheap view into `buf` (no copy).
///
/// # Errors
///
/// Returns [`DecodingError`] if `buf` is shorter than [`HEADER_LEN`] bytes.
pub fn decode(buf: &Bytes) -> Result<(FragHeader, Bytes), DecodingError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodingError { len: buf.len() });
    }

    let mut raw = [0u8; 8];
    raw[..HEADER_LEN].copy_from_slice(&buf[..HEADER_LEN]);
    let word = u64::from_le_bytes(raw);
    let header = FragHeader::unpack(word);
    let body = buf.slice(HEADER_LEN..);
    Ok((header, body))
}
