// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shared test doubles: a mock connection handler/factory, and helpers to
//! build raw wire datagrams without going through a real handshake.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use quic_common::{Datagram, Encoder, Role};
use quic_transport::{
    connection::{ConnectionFactory, ConnectionHandler, ConnectionParams, ReadyState},
    packet::Version,
};
use tokio::sync::watch;

/// A [`ConnectionHandler`] that just records what it's handed. Readiness is
/// driven explicitly by the test via [`MockHandler::set_ready`].
pub struct MockHandler {
    pub params: ConnectionParams,
    pub delivered: Mutex<Vec<Datagram>>,
    ready_tx: watch::Sender<ReadyState>,
    ready_rx: watch::Receiver<ReadyState>,
    cancelled: AtomicBool,
}

impl MockHandler {
    #[must_use]
    pub fn new(params: ConnectionParams) -> Arc<Self> {
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Pending);
        Arc::new(Self {
            params,
            delivered: Mutex::new(Vec::new()),
            ready_tx,
            ready_rx,
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn set_ready(&self, state: ReadyState) {
        let _ = self.ready_tx.send(state);
    }

    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().expect("not poisoned").len()
    }
}

impl ConnectionHandler for MockHandler {
    fn deliver(&self, dgram: Datagram) {
        self.delivered.lock().expect("not poisoned").push(dgram);
    }

    fn perspective(&self) -> Role {
        Role::Server
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.ready_tx.send(ReadyState::Closed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn ready(&self) -> watch::Receiver<ReadyState> {
        self.ready_rx.clone()
    }

    fn spawn_run(self: Arc<Self>) {}
}

/// A [`ConnectionFactory`] that builds [`MockHandler`]s and remembers every
/// one it created, so a test can inspect what the admission core did with
/// it.
#[derive(Default)]
pub struct MockFactory {
    pub created: Mutex<Vec<Arc<MockHandler>>>,
}

impl ConnectionFactory for MockFactory {
    fn create(&self, params: ConnectionParams) -> Arc<dyn ConnectionHandler> {
        let handler = MockHandler::new(params);
        self.created.lock().expect("not poisoned").push(Arc::clone(&handler));
        handler
    }
}

/// Build a long-header Initial datagram: DCID/SCID/token as given, with no
/// floor on total size -- useful for exercising the "Initial too short"
/// rejection path.
#[must_use]
pub fn build_initial_unpadded(remote: SocketAddr, local: SocketAddr, dcid: &[u8], scid: &[u8], token: &[u8]) -> Datagram {
    let mut enc = Encoder::new();
    enc.encode_byte(0xc0); // long header, fixed bit, type=Initial
    enc.encode_uint(4, u64::from(Version::VERSION_1.wire_version()));
    enc.encode_vec(1, dcid);
    enc.encode_vec(1, scid);
    enc.encode_vvec(token);
    enc.encode_varint(1); // packet number only, empty payload
    enc.encode_byte(0);
    Datagram::new(remote, local, 0, enc.into_vec())
}

/// Build a well-formed long-header Initial datagram: DCID/SCID/token as
/// given, padded to at least the 1200-byte floor.
#[must_use]
pub fn build_initial(remote: SocketAddr, local: SocketAddr, dcid: &[u8], scid: &[u8], token: &[u8]) -> Datagram {
    let mut enc = Encoder::new();
    enc.encode_byte(0xc0); // long header, fixed bit, type=Initial
    enc.encode_uint(4, u64::from(Version::VERSION_1.wire_version()));
    enc.encode_vec(1, dcid);
    enc.encode_vec(1, scid);
    enc.encode_vvec(token);
    let payload_len = 1200usize.saturating_sub(enc.len() + 4);
    enc.encode_varint((1 + payload_len) as u64); // packet number + payload
    enc.encode_byte(0); // 1-byte packet number
    enc.encode(&vec![0u8; payload_len]);
    let mut bytes = enc.into_vec();
    bytes.resize(bytes.len().max(1200), 0);
    Datagram::new(remote, local, 0, bytes)
}

/// Build a Handshake-type long header for `version`, carrying no payload.
/// Used to exercise version negotiation and handshake-without-entry
/// handling, neither of which require an Initial's size floor.
#[must_use]
pub fn build_handshake(remote: SocketAddr, local: SocketAddr, dcid: &[u8], scid: &[u8], version: Version) -> Datagram {
    let mut enc = Encoder::new();
    enc.encode_byte(0xe0); // long header, fixed bit, type=Handshake
    enc.encode_uint(4, u64::from(version.wire_version()));
    enc.encode_vec(1, dcid);
    enc.encode_vec(1, scid);
    enc.encode_varint(1);
    enc.encode_byte(0);
    Datagram::new(remote, local, 0, enc.into_vec())
}

/// Build a 0-RTT datagram for `dcid` carrying `payload` as its (unprotected,
/// for test purposes) body.
#[must_use]
pub fn build_zero_rtt(remote: SocketAddr, local: SocketAddr, dcid: &[u8], payload: &[u8]) -> Datagram {
    let mut enc = Encoder::new();
    enc.encode_byte(0xd0); // long header, fixed bit, type=0-RTT
    enc.encode_uint(4, u64::from(Version::VERSION_1.wire_version()));
    enc.encode_vec(1, dcid);
    enc.encode_vec(1, &[]);
    enc.encode_varint((1 + payload.len()) as u64);
    enc.encode_byte(0);
    enc.encode(payload);
    Datagram::new(remote, local, 0, enc.into_vec())
}
