//! Thin façade over a TCP stream/listener: configures MSS and congestion
//! control from the MTU, but performs no user-level segmentation of its own.

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    time::Duration,
};

use socket2::SockRef;
use thiserror::Error;

use crate::Config;

const IP_HEADER: u32 = 20;
const TCP_HEADER: u32 = 20;

/// `std::net` rejects `Some(Duration::ZERO)` with an `Err`; callers use zero
/// to mean "effectively non-blocking", so translate it to the smallest
/// representable positive duration before it reaches the socket.
fn non_blocking_floor(timeout: Option<Duration>) -> Option<Duration> {
    match timeout {
        Some(duration) if duration.is_zero() => Some(Duration::from_nanos(1)),
        other => other,
    }
}

/// Errors surfaced by [`ReliableSocket`] operations.
#[derive(Debug, Error)]
pub enum ReliableSocketError {
    /// The underlying socket reported an I/O error, including a configured
    /// timeout elapsing.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

enum Inner {
    Listener(TcpListener),
    Stream(TcpStream),
}

/// A reliable, byte-stream endpoint over TCP.
///
/// Performs no fragmentation: the kernel's TCP stack segments according to
/// the maximum segment size this façade configures from the MTU.
pub struct ReliableSocket {
    inner: Inner,
    mtu: u32,
    congestion_algorithm: String,
}

impl ReliableSocket {
    /// Binds a listening socket at `local_address`, ready for
    /// [`ReliableSocket::listen`].
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's bind error.
    pub fn bind(local_address: impl ToSocketAddrs, config: &Config) -> io::Result<Self> {
        let listener = TcpListener::bind(local_address)?;
        Ok(Self {
            inner: Inner::Listener(listener),
            mtu: config.mtu(),
            congestion_algorithm: config.congestion_algorithm().to_owned(),
        })
    }

    /// Marks a bound socket as listening with the given backlog.
    ///
    /// A no-op beyond what [`TcpListener::bind`] already performs: the
    /// backlog is applied at bind time on the platforms this crate targets,
    /// so this exists for API parity with the underlying socket contract.
    pub fn listen(&self, _backlog: i32) {}

    /// Connects to `peer`, configuring MSS and congestion control from the
    /// MTU this endpoint was constructed with.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's connect error.
    pub fn connect(peer: impl ToSocketAddrs, config: &Config) -> io::Result<Self> {
        let stream = TcpStream::connect(peer)?;
        let mut endpoint = Self {
            inner: Inner::Stream(stream),
            mtu: config.mtu(),
            congestion_algorithm: config.congestion_algorithm().to_owned(),
        };
        endpoint.apply_socket_options();
        Ok(endpoint)
    }

    /// Accepts one incoming connection, returning a new endpoint that
    /// inherits this listener's MTU and congestion-control configuration.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's accept error, or an I/O error if this
    /// endpoint was not constructed as a listener.
    pub fn accept(&self) -> io::Result<(Self, SocketAddr)> {
        let Inner::Listener(listener) = &self.inner else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "accept called on a non-listening endpoint",
            ));
        };
        let (stream, peer) = listener.accept()?;
        let mut endpoint = Self {
            inner: Inner::Stream(stream),
            mtu: self.mtu,
            congestion_algorithm: self.congestion_algorithm.clone(),
        };
        endpoint.apply_socket_options();
        Ok((endpoint, peer))
    }

    fn stream(&self) -> io::Result<&TcpStream> {
        match &self.inner {
            Inner::Stream(stream) => Ok(stream),
            Inner::Listener(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "operation requires a connected stream, not a listener",
            )),
        }
    }

    /// Applies MSS, IP-options, and congestion-control socket options
    /// derived from the configured MTU. Best-effort: a platform that
    /// doesn't support a given option logs a warning rather than failing
    /// the connection.
    fn apply_socket_options(&mut self) {
        let Inner::Stream(stream) = &self.inner else {
            return;
        };
        let mss = self.mss();
        let sock = SockRef::from(stream);

        if let Err(err) = set_tcp_maxseg(&sock, mss) {
            tracing::warn!(%err, mss, "failed to set TCP_MAXSEG");
        }
        if let Err(err) = set_tcp_congestion(&sock, &self.congestion_algorithm) {
            tracing::warn!(
                %err,
                algorithm = %self.congestion_algorithm,
                "failed to set TCP congestion control algorithm"
            );
        }
    }

    fn mss(&self) -> u32 {
        self.mtu.saturating_sub(IP_HEADER + TCP_HEADER)
    }

    /// Writes `data` via a single underlying `write`, returning the number
    /// of bytes actually written (which may be less than `data.len()`).
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's I/O error.
    pub fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Stream(stream) => stream.write(data),
            Inner::Listener(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "send called on a non-connected endpoint",
            )),
        }
    }

    /// Writes all of `data`, retrying underlying partial writes.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's I/O error.
    pub fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.inner {
            Inner::Stream(stream) => stream.write_all(data),
            Inner::Listener(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "send_all called on a non-connected endpoint",
            )),
        }
    }

    /// Reads up to `max_bytes` from the stream.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's I/O error.
    pub fn recv(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
        match &mut self.inner {
            Inner::Stream(stream) => {
                let mut buf = vec![0u8; max_bytes];
                let n = stream.read(&mut buf)?;
                buf.truncate(n);
                Ok(buf)
            }
            Inner::Listener(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "recv called on a non-connected endpoint",
            )),
        }
    }

    /// Sets the blocking read/write timeout on the underlying stream.
    ///
    /// `Some(Duration::ZERO)` puts the stream in effectively non-blocking
    /// mode: `std::net` rejects a literal zero duration outright, so it's
    /// translated to the smallest representable positive duration before
    /// being applied.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's error setting the option.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = non_blocking_floor(timeout);
        let stream = self.stream()?;
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)
    }

    /// Returns the currently configured timeout.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's error reading the option.
    pub fn get_timeout(&self) -> io::Result<Option<Duration>> {
        self.stream()?.read_timeout()
    }

    /// Sets the IP-layer type-of-service byte on the underlying socket.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's error setting the option.
    pub fn set_tos(&self, tos: u8) -> io::Result<()> {
        SockRef::from(self.stream()?).set_tos(u32::from(tos))
    }

    /// Returns the currently configured type-of-service byte.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's error reading the option.
    pub fn get_tos(&self) -> io::Result<u8> {
        SockRef::from(self.stream()?).tos().map(|v| v as u8)
    }

    /// The local address this endpoint is bound to.
    ///
    /// # Errors
    ///
    /// Returns the underlying socket's error reading the address, or an
    /// I/O error if this endpoint has neither a listener nor a stream.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.inner {
            Inner::Listener(listener) => listener.local_addr(),
            Inner::Stream(stream) => stream.local_addr(),
        }
    }

    /// The configured MTU, in bytes.
    #[must_use]
    pub fn get_mtu(&self) -> u32 {
        self.mtu
    }

    /// The maximum segment size derived from the MTU: `mtu - 20 - 20`.
    #[must_use]
    pub fn get_mss(&self) -> u32 {
        self.mss()
    }

    /// Closes the underlying socket. Subsequent operations will fail.
    pub fn close(self) {
        drop(self.inner);
    }
}

#[cfg(target_os = "linux")]
fn set_tcp_maxseg(sock: &SockRef<'_>, mss: u32) -> io::Result<()> {
    sock.set_mss(mss)
}

#[cfg(not(target_os = "linux"))]
fn set_tcp_maxseg(_sock: &SockRef<'_>, _mss: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(target_os = "linux")]
fn set_tcp_congestion(sock: &SockRef<'_>, algorithm: &str) -> io::Result<()> {
    sock.set_tcp_congestion(algorithm.as_bytes())
}

#[cfg(not(target_os = "linux"))]
fn set_tcp_congestion(_sock: &SockRef<'_>, _algorithm: &str) -> io::Result<()> {
    Ok(())
}
