//! Socket-like façade over a [`UdpSocket`], fragmenting outbound payloads and
//! reassembling inbound ones.

use std::{
    io,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use middleware_protocol::{max_frag_payload, Fragmenter, PayloadTooLarge, ReassemblyTable};
use socket2::SockRef;
use thiserror::Error;

use crate::Config;

/// Initial size of the scratch buffer used to peek/read inbound fragments.
///
/// Grown on demand if a fragment larger than this arrives; see
/// [`UnreliableSocket::recv_from`].
const INITIAL_RECV_BUF: usize = 2048;

/// `std::net` rejects `Some(Duration::ZERO)` with an `Err`; callers use zero
/// to mean "effectively non-blocking", so translate it to the smallest
/// representable positive duration before it reaches the socket.
fn non_blocking_floor(timeout: Option<Duration>) -> Option<Duration> {
    match timeout {
        Some(duration) if duration.is_zero() => Some(Duration::from_nanos(1)),
        other => other,
    }
}

/// Errors surfaced by [`UnreliableSocket`] operations.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// `send_to` was given a payload larger than
    /// [`middleware_protocol::MAX_DATAGRAM_PAYLOAD`].
    #[error(transparent)]
    PayloadTooLarge(#[from] PayloadTooLarge),
    /// The underlying socket reported an I/O error, including a configured
    /// timeout elapsing.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// An unreliable, message-oriented endpoint layered over a UDP socket.
///
/// Owned by a single logical task: concurrent calls from multiple threads on
/// the same `UnreliableSocket` are the caller's responsibility.
pub struct UnreliableSocket {
    socket: UdpSocket,
    fragmenter: Fragmenter,
    reassembly: ReassemblyTable,
    mtu: u32,
    fragment_timeout: Duration,
    recv_buf_len: usize,
}

impl UnreliableSocket {
    /// Binds a new unreliable endpoint to `local_address`, configured from
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's bind error.
    pub fn bind(local_address: impl ToSocketAddrs, config: &Config) -> io::Result<Self> {
        let socket = UdpSocket::bind(local_address)?;
        Ok(Self::from_socket(socket, config))
    }

    fn from_socket(socket: UdpSocket, config: &Config) -> Self {
        Self {
            socket,
            fragmenter: Fragmenter::new(max_frag_payload(config.mtu())),
            reassembly: ReassemblyTable::new(),
            mtu: config.mtu(),
            fragment_timeout: config.fragment_timeout(),
            recv_buf_len: INITIAL_RECV_BUF,
        }
    }

    /// Sets the blocking timeout applied to each underlying socket call.
    ///
    /// `None` blocks indefinitely. `Some(Duration::ZERO)` puts the socket in
    /// effectively non-blocking mode: `std::net` rejects a literal zero
    /// duration outright, so it's translated to the smallest representable
    /// positive duration before being applied. This is not a budget for the
    /// whole `send_to`/`recv_from` call: a payload split into `N` fragments
    /// may spend up to `N * timeout` inside `send_to`, since each fragment
    /// write is a separate underlying call.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's error setting the option.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = non_blocking_floor(timeout);
        self.socket.set_read_timeout(timeout)?;
        self.socket.set_write_timeout(timeout)
    }

    /// Returns the currently configured timeout.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's error reading the option.
    pub fn get_timeout(&self) -> io::Result<Option<Duration>> {
        self.socket.read_timeout()
    }

    /// Sets the IP-layer type-of-service byte on the underlying socket.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's error setting the option.
    pub fn set_tos(&self, tos: u8) -> io::Result<()> {
        SockRef::from(&self.socket).set_tos(u32::from(tos))
    }

    /// Returns the currently configured type-of-service byte.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's error reading the option.
    pub fn get_tos(&self) -> io::Result<u8> {
        SockRef::from(&self.socket).tos().map(|v| v as u8)
    }

    /// The local address this endpoint is bound to.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's error reading the address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// The configured MTU, in bytes.
    #[must_use]
    pub fn get_mtu(&self) -> u32 {
        self.mtu
    }

    /// The maximum fragment body size at the configured MTU:
    /// `mtu - UDP_IP_HEADER_SIZE - MW_HEADER_SIZE`.
    #[must_use]
    pub fn get_mss(&self) -> u32 {
        max_frag_payload(self.mtu) as u32
    }

    /// The largest application payload [`UnreliableSocket::send_to`] will
    /// accept, independent of the configured MTU.
    #[must_use]
    pub fn max_payload_size(&self) -> usize {
        middleware_protocol::MAX_DATAGRAM_PAYLOAD
    }

    /// Fragments `payload` and writes each fragment to `peer` as a separate
    /// datagram, in index order.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::PayloadTooLarge`] if the payload exceeds
    /// [`UnreliableSocket::max_payload_size`], or
    /// [`EndpointError::Transport`] if the underlying socket fails or times
    /// out partway through. A timeout partway through leaves some fragments
    /// sent and the rest not: the unreliable path makes no atomicity
    /// guarantee across fragments of the same message.
    pub fn send_to(&mut self, payload: Bytes, peer: SocketAddr) -> Result<(), EndpointError> {
        for fragment in self.fragmenter.fragment(payload)? {
            self.socket.send_to(&fragment, peer)?;
        }
        Ok(())
    }

    /// Blocks until a complete datagram has been reassembled, returning it
    /// along with the peer that sent it.
    ///
    /// Internally reads one inbound UDP datagram at a time, ages out stale
    /// partial datagrams, and hands the fragment to the reassembly table,
    /// looping until a datagram completes. Never returns a partial
    /// datagram.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Transport`] if the underlying socket fails
    /// or the configured timeout elapses before a datagram completes.
    pub fn recv_from(&mut self) -> Result<(Bytes, SocketAddr), EndpointError> {
        loop {
            let (fragment, peer) = self.recv_one_datagram()?;

            let now = Instant::now();
            self.reassembly.age_out(now, self.fragment_timeout);
            self.reassembly.accept(now, &fragment, peer);

            if let Some(completed) = self.reassembly.take_completed() {
                return Ok(completed);
            }
        }
    }

    /// Reads exactly one inbound UDP datagram, growing the scratch buffer if
    /// a `MSG_PEEK` reveals the datagram is larger than what's currently
    /// allocated.
    fn recv_one_datagram(&mut self) -> io::Result<(Bytes, SocketAddr)> {
        loop {
            let mut buf = BytesMut::zeroed(self.recv_buf_len);
            let (len, _peer) = self.socket.peek_from(&mut buf)?;

            if len >= self.recv_buf_len {
                // datagram may have been truncated by the peek; grow and
                // retry without consuming it.
                self.recv_buf_len *= 2;
                continue;
            }

            let (len, peer) = self.socket.recv_from(&mut buf)?;
            assert!(
                len < self.recv_buf_len,
                "datagram was truncated despite a successful peek"
            );
            buf.truncate(len);
            return Ok((buf.freeze(), peer));
        }
    }

    /// Closes the underlying socket. Subsequent operations will fail.
    pub fn close(self) {
        drop(self.socket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::{io::Write, time::Duration};

    fn test_config(mtu: u32) -> Config {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[middleware_configuration]\nmtu = {mtu}\nfragment_timeout = 30\ncongestion_algorithm = cubic\necho_config_path = false\n"
        )
        .unwrap();
        Config::load(file.path()).unwrap()
    }

    #[test]
    fn round_trips_a_small_message() {
        let config = test_config(512);
        let mut server = UnreliableSocket::bind("127.0.0.1:0", &config).unwrap();
        let mut client = UnreliableSocket::bind("127.0.0.1:0", &config).unwrap();

        let server_addr = server.socket.local_addr().unwrap();
        client.set_timeout(Some(Duration::from_secs(2))).unwrap();
        server.set_timeout(Some(Duration::from_secs(2))).unwrap();

        client
            .send_to(Bytes::from_static(b"hello over udp"), server_addr)
            .unwrap();

        let (payload, _from) = server.recv_from().unwrap();
        assert_eq!(&payload[..], b"hello over udp");
    }

    #[test]
    fn round_trips_a_message_spanning_many_fragments() {
        let config = test_config(64);
        let mut server = UnreliableSocket::bind("127.0.0.1:0", &config).unwrap();
        let mut client = UnreliableSocket::bind("127.0.0.1:0", &config).unwrap();
        let server_addr = server.socket.local_addr().unwrap();
        client.set_timeout(Some(Duration::from_secs(2))).unwrap();
        server.set_timeout(Some(Duration::from_secs(2))).unwrap();

        let payload = Bytes::from(vec![7u8; 500]);
        client.send_to(payload.clone(), server_addr).unwrap();

        let (received, _from) = server.recv_from().unwrap();
        assert_eq!(payload, received);
    }

    #[test]
    fn rejects_oversized_payload_without_touching_the_socket() {
        let config = test_config(512);
        let mut client = UnreliableSocket::bind("127.0.0.1:0", &config).unwrap();
        let oversized = Bytes::from(vec![0u8; middleware_protocol::MAX_DATAGRAM_PAYLOAD + 1]);
        let result = client.send_to(oversized, "127.0.0.1:9".parse().unwrap());
        assert_matches!(result, Err(EndpointError::PayloadTooLarge(_)));
    }

    #[test]
    fn zero_timeout_is_translated_to_a_non_blocking_floor_instead_of_erroring() {
        let config = test_config(512);
        let mut socket = UnreliableSocket::bind("127.0.0.1:0", &config).unwrap();
        socket.set_timeout(Some(Duration::ZERO)).unwrap();
        assert_eq!(Some(Duration::from_nanos(1)), socket.get_timeout().unwrap());
    }
}
