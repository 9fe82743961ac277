// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end admission scenarios, driven over real loopback UDP sockets
//! against the public `listen` API.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use quic_common::{Decoder, Encoder};
use quic_transport::{
    cid::ConnectionId,
    connection::{ConnectionFactory, ReadyState},
    crypto::{InitialKey, Side},
    listen, ServerConfig, TlsConfig, Version,
};
use test_fixture::{build_handshake, build_initial, build_initial_unpadded, build_zero_rtt, MockFactory};
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_TIMEOUT: Duration = Duration::from_millis(200);

async fn bind() -> quic_udp::Socket {
    quic_udp::Socket::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap()
}

async fn start_server(config: ServerConfig) -> (quic_transport::Listener, Arc<MockFactory>, SocketAddr) {
    let socket = bind().await;
    let addr = socket.local_addr().unwrap();
    let factory = Arc::new(MockFactory::default());
    let listener = listen(
        socket,
        Some(TlsConfig::new()),
        config,
        Arc::clone(&factory) as Arc<dyn ConnectionFactory>,
    )
    .await
    .unwrap();
    (listener, factory, addr)
}

async fn recv_reply(client: &quic_udp::Socket) -> quic_common::Datagram {
    timeout(RECV_TIMEOUT, client.recv())
        .await
        .expect("server should have replied")
        .unwrap()
}

async fn expect_silence(client: &quic_udp::Socket) {
    assert!(
        timeout(QUIET_TIMEOUT, client.recv()).await.is_err(),
        "server should not have replied"
    );
}

/// Build a well-formed, AEAD-sealed client Initial carrying `token`, with a
/// plaintext payload chosen so the whole datagram clears the 1200-byte
/// floor with no trailing bytes after the sealed payload.
fn build_sealed_initial(remote: SocketAddr, local: SocketAddr, dcid: &[u8], scid: &[u8], token: &[u8]) -> quic_common::Datagram {
    let client_dcid = ConnectionId::from(dcid);
    let key = InitialKey::derive(&client_dcid, Side::Client);

    let mut prefix = Encoder::new();
    prefix.encode_byte(0xc0);
    prefix.encode_uint(4, u64::from(Version::VERSION_1.wire_version()));
    prefix.encode_vec(1, dcid);
    prefix.encode_vec(1, scid);
    prefix.encode_vvec(token);
    let prefix_bytes: Vec<u8> = prefix.into();

    let overhead = prefix_bytes.len() + 2 /* length varint */ + 1 /* packet number */ + InitialKey::tag_len();
    let payload_len = 1200usize.saturating_sub(overhead).max(16);
    let plaintext = vec![0u8; payload_len];

    let mut header = Encoder::new();
    header.encode(&prefix_bytes);
    header.encode_varint((1 + plaintext.len() + InitialKey::tag_len()) as u64);
    header.encode_uint(1, 0);
    let header_bytes: Vec<u8> = header.into();

    let mut payload = plaintext;
    key.seal(0, &header_bytes, &mut payload).unwrap();

    let mut packet = header_bytes;
    packet.extend_from_slice(&payload);
    quic_common::Datagram::new(remote, local, 0, packet)
}

#[tokio::test]
async fn short_initial_is_dropped_silently() {
    let (_listener, factory, addr) = start_server(ServerConfig::default()).await;
    let client = bind().await;
    let client_addr = client.local_addr().unwrap();

    let dgram = build_initial_unpadded(client_addr, addr, &[1, 2, 3, 4, 5, 6, 7, 8], &[1, 2], &[]);
    client.send(&dgram).await.unwrap();

    expect_silence(&client).await;
    assert!(factory.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unsupported_version_on_any_connection_initiating_packet_triggers_vn() {
    // Scenario uses a Handshake-type packet deliberately: version
    // negotiation is not specific to Initial packets (RFC 9000 section 6).
    let (_listener, _factory, addr) = start_server(ServerConfig::default()).await;
    let client = bind().await;
    let client_addr = client.local_addr().unwrap();

    let dcid = [1, 2, 3, 4, 5, 6];
    let scid = [9, 8, 7, 6, 5];
    let dgram = build_handshake(client_addr, addr, &dcid, &scid, Version::new(0x1a2a_3a4a));
    client.send(&dgram).await.unwrap();

    let reply = recv_reply(&client).await;
    let mut dec = Decoder::new(&reply[..]);
    let first = dec.decode_byte().unwrap();
    assert_eq!(first & 0x80, 0x80);
    assert_eq!(dec.decode_uint(4), Some(0)); // VN's version field is always 0
    assert_eq!(dec.decode_vec(1), Some(&scid[..])); // VN DCID = client's SCID
    assert_eq!(dec.decode_vec(1), Some(&dcid[..])); // VN SCID = client's DCID
    assert_eq!(dec.decode_uint(4), Some(u64::from(Version::VERSION_1.wire_version())));
    assert_eq!(dec.remaining(), 0);
}

#[tokio::test]
async fn absent_token_triggers_retry() {
    let (_listener, _factory, addr) = start_server(ServerConfig::default()).await;
    let client = bind().await;
    let client_addr = client.local_addr().unwrap();

    let dcid: Vec<u8> = (1..=10).collect();
    let scid = [5, 4, 3, 2, 1];
    let dgram = build_initial(client_addr, addr, &dcid, &scid, &[]);
    client.send(&dgram).await.unwrap();

    let reply = recv_reply(&client).await;
    let mut dec = Decoder::new(&reply[..]);
    let first = dec.decode_byte().unwrap();
    assert_eq!((first >> 4) & 0x3, 3); // Retry packet type
    assert_eq!(dec.decode_uint(4), Some(u64::from(Version::VERSION_1.wire_version())));
    assert_eq!(dec.decode_vec(1), Some(&scid[..])); // Retry DCID = client's SCID
    let retry_src_cid = dec.decode_vec(1).unwrap().to_vec();
    assert_ne!(retry_src_cid, dcid);
    assert!(retry_src_cid.len() >= 8);

    let remainder = dec.decode(dec.remaining()).unwrap();
    assert!(remainder.len() > 16, "token plus 16-byte integrity tag");
}

#[tokio::test]
async fn valid_retry_token_admits_the_connection() {
    let (_listener, factory, addr) = start_server(ServerConfig::default()).await;
    let client = bind().await;
    let client_addr = client.local_addr().unwrap();

    let odcid: Vec<u8> = (1..=10).collect();
    let client_scid = [5, 4, 3, 2, 1];

    let first_try = build_initial(client_addr, addr, &odcid, &client_scid, &[]);
    client.send(&first_try).await.unwrap();
    let retry = recv_reply(&client).await;

    let mut dec = Decoder::new(&retry[..]);
    dec.decode_byte().unwrap();
    dec.decode_uint(4).unwrap();
    dec.decode_vec(1).unwrap(); // echoes client_scid, already known
    let retry_src_cid = dec.decode_vec(1).unwrap().to_vec();
    let rest = dec.decode(dec.remaining()).unwrap();
    let token = &rest[..rest.len() - 16];

    let second_try = build_sealed_initial(client_addr, addr, &retry_src_cid, &client_scid, token);
    client.send(&second_try).await.unwrap();

    let handler = timeout(RECV_TIMEOUT, async {
        loop {
            if let Some(h) = factory.created.lock().unwrap().first().cloned() {
                return h;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("connection should have been created");

    assert_eq!(&handler.params.odcid.as_ref().unwrap()[..], &odcid[..]);
    assert_eq!(&handler.params.retry_src_cid.as_ref().unwrap()[..], &retry_src_cid[..]);
    assert_eq!(&handler.params.client_dcid[..], &retry_src_cid[..]);
}

#[tokio::test]
async fn invalid_token_with_openable_payload_gets_invalid_token_close() {
    let (_listener, factory, addr) = start_server(ServerConfig::default()).await;
    let client = bind().await;
    let client_addr = client.local_addr().unwrap();

    let dcid: Vec<u8> = (1..=10).collect();
    let scid = [5, 4, 3, 2, 1];
    let dgram = build_sealed_initial(client_addr, addr, &dcid, &scid, b"not a real token");
    client.send(&dgram).await.unwrap();

    let reply = recv_reply(&client).await;
    let mut dec = Decoder::new(&reply[..]);
    dec.decode_byte().unwrap();
    dec.decode_uint(4).unwrap();
    assert_eq!(dec.decode_vec(1), Some(&scid[..])); // close DCID = client's SCID

    let client_key = InitialKey::derive(&ConnectionId::from(&dcid[..]), Side::Server);
    let header_len = reply.len() - (InitialKey::tag_len() + 4 /* CONNECTION_CLOSE frame */);
    let mut payload = reply[header_len..].to_vec();
    let opened = client_key.open(0, &reply[..header_len], &mut payload).unwrap();
    assert_eq!(opened[0], 0x1c); // CONNECTION_CLOSE frame type
    assert_eq!(opened[1], 0x0b); // INVALID_TOKEN error code

    assert!(factory.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_token_with_corrupted_payload_is_dropped_silently() {
    let (_listener, factory, addr) = start_server(ServerConfig::default()).await;
    let client = bind().await;
    let client_addr = client.local_addr().unwrap();

    let dcid: Vec<u8> = (1..=10).collect();
    let scid = [5, 4, 3, 2, 1];
    let mut dgram = build_sealed_initial(client_addr, addr, &dcid, &scid, b"not a real token");
    let last = dgram.len() - 1;
    dgram[last] ^= 0xff;
    client.send(&dgram).await.unwrap();

    expect_silence(&client).await;
    assert!(factory.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn zero_rtt_ahead_of_initial_is_replayed_in_order() {
    let mut config = ServerConfig::default();
    config.zero_rtt_enabled = true;
    config.accept_token = Arc::new(|_addr, _token| true); // skip Retry to keep this focused on ordering
    let (_listener, factory, addr) = start_server(config).await;
    let client = bind().await;
    let client_addr = client.local_addr().unwrap();

    let dcid: Vec<u8> = (1..=8).collect();
    let zero_rtt = build_zero_rtt(client_addr, addr, &dcid, b"early data");
    client.send(&zero_rtt).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let scid = [5, 4, 3, 2, 1];
    let initial = build_initial(client_addr, addr, &dcid, &scid, &[]);
    client.send(&initial).await.unwrap();

    let handler = timeout(RECV_TIMEOUT, async {
        loop {
            if let Some(h) = factory.created.lock().unwrap().first().cloned() {
                return h;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("connection should have been created");

    timeout(RECV_TIMEOUT, async {
        while handler.delivered_count() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("both packets should have been delivered");

    let delivered = handler.delivered.lock().unwrap();
    assert!(delivered[0].ends_with(b"early data"), "0-RTT packet must be delivered first");
    assert_eq!(delivered[1][0] & 0xf0, 0xc0, "Initial packet must be delivered second");
}

#[tokio::test]
async fn accept_queue_full_refuses_without_creating_a_second_connection() {
    let mut config = ServerConfig::default();
    config.accept_capacity = 1;
    config.accept_token = Arc::new(|_addr, _token| true); // skip Retry so one Initial admits directly
    let (_listener, factory, addr) = start_server(config).await;
    let client = bind().await;
    let client_addr = client.local_addr().unwrap();

    let first_dcid: Vec<u8> = (1..=8).collect();
    let scid = [5, 4, 3, 2, 1];
    let first = build_initial(client_addr, addr, &first_dcid, &scid, &[]);
    client.send(&first).await.unwrap();

    let handler = timeout(RECV_TIMEOUT, async {
        loop {
            if let Some(h) = factory.created.lock().unwrap().first().cloned() {
                return h;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("first connection should have been created");
    // Reaching "Full" consumes the one accept-queue slot without the test
    // having to call `listener.accept()`.
    handler.set_ready(ReadyState::Full);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second_dcid: Vec<u8> = (21..=28).collect();
    let second = build_initial(client_addr, addr, &second_dcid, &scid, &[]);
    client.send(&second).await.unwrap();

    let reply = recv_reply(&client).await;
    let mut dec = Decoder::new(&reply[..]);
    dec.decode_byte().unwrap();
    dec.decode_uint(4).unwrap();
    assert_eq!(dec.decode_vec(1), Some(&scid[..])); // close DCID = client's SCID

    let client_key = InitialKey::derive(&ConnectionId::from(&second_dcid[..]), Side::Server);
    let header_len = reply.len() - (InitialKey::tag_len() + 4 /* CONNECTION_CLOSE frame */);
    let mut payload = reply[header_len..].to_vec();
    let opened = client_key.open(0, &reply[..header_len], &mut payload).unwrap();
    assert_eq!(opened[0], 0x1c);
    assert_eq!(opened[1], 0x02); // CONNECTION_REFUSED

    assert_eq!(factory.created.lock().unwrap().len(), 1);
}
