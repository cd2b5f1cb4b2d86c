//! Fragment codec, fragmenter, and reassembly table for splitting
//! oversized datagram payloads across an MTU-limited transport and putting
//! them back together on the other side.
//!
//! This crate is transport-agnostic: it knows nothing about sockets. The
//! `middleware` crate's unreliable endpoint drives a [`Fragmenter`] and a
//! [`ReassemblyTable`] against a real `UdpSocket`.

pub mod fragmenter;
pub mod header;
pub mod reassembly;

pub use fragmenter::{
    max_frag_payload, Fragmenter, Fragments, PayloadTooLarge, MAX_DATAGRAM_PAYLOAD, MTU_MIN,
    MW_HEADER_SIZE, TOTAL_HEADER_SIZE, UDP_IP_HEADER_SIZE,
};
pub use header::{decode, encode, DecodingError, EncodingError, FragHeader, HEADER_LEN};
pub use reassembly::{ReassemblyKey, ReassemblyTable};
