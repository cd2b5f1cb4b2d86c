//! A user-space transport shim providing two socket-like endpoints —
//! unreliable and reliable — whose payloads may exceed the path MTU.
//!
//! [`UnreliableSocket`] splits outbound payloads into wire fragments that fit
//! within a configured MTU and reassembles inbound fragments back into whole
//! messages, using [`middleware_protocol`] for the framing and reassembly
//! engine. [`ReliableSocket`] is a thin façade over a TCP stream that only
//! configures the kernel's maximum segment size and congestion-control
//! algorithm from the same [`Config`](middleware_config::Config).

mod reliable;
mod unreliable;

pub use reliable::{ReliableSocket, ReliableSocketError};
pub use unreliable::{EndpointError, UnreliableSocket};

pub use middleware_config::{Config, ConfigError};
pub use middleware_protocol::MAX_DATAGRAM_PAYLOAD;
