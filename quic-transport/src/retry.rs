// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Retry Emitter (spec §4.3): builds a stateless Retry packet and its
//! 16-byte integrity tag. Never creates connection state; one Retry per
//! arriving Initial that needs address validation.

use std::net::SocketAddr;

use quic_common::{Datagram, Encoder};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM};

use crate::{
    cid::ConnectionId,
    packet::Version,
};

/// Fixed Retry Integrity key and nonce for QUIC version 1, RFC 9001
/// section 5.8.
const RETRY_INTEGRITY_KEY: [u8; 16] = [
    0xbe, 0x0c, 0x69, 0x0b, 0x9f, 0x66, 0x57, 0x5a, 0x1d, 0x76, 0x6b, 0x54, 0xe3, 0x68, 0xc8, 0x4e,
];
const RETRY_INTEGRITY_NONCE: [u8; 12] = [
    0x46, 0x15, 0x99, 0xd3, 0x5d, 0x63, 0x2b, 0xf2, 0x59, 0x07, 0x65, 0x25,
];

fn retry_integrity_tag(odcid: &ConnectionId, pseudo_header: &[u8]) -> [u8; 16] {
    let unbound = UnboundKey::new(&AES_128_GCM, &RETRY_INTEGRITY_KEY).expect("16-byte key");
    let key = LessSafeKey::new(unbound);

    let mut aad = Encoder::new();
    aad.encode_vec(1, odcid);
    aad.encode(pseudo_header);

    let mut in_out = Vec::new();
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(RETRY_INTEGRITY_NONCE),
        Aad::from(aad.as_ref()),
        &mut in_out,
    )
    .expect("sealing empty plaintext never fails");
    let mut tag = [0u8; 16];
    tag.copy_from_slice(&in_out);
    tag
}

/// Build a Retry datagram in response to `dgram`, which carried an Initial
/// with `client_src` (SCID) and `client_dst` (DCID, a.k.a. ODCID here).
/// `retry_src_cid` is the fresh server-chosen CID the client will be told
/// to address its next Initial to.
#[must_use]
pub fn build_retry(
    remote: SocketAddr,
    local: SocketAddr,
    tos: u8,
    version: Version,
    client_src: &ConnectionId,
    client_dst: &ConnectionId,
    retry_src_cid: &ConnectionId,
    token: &[u8],
) -> Datagram {
    let mut header = Encoder::new();
    header.encode_byte(0xf0); // long header, fixed bit, type=Retry
    header.encode_uint(4, u64::from(version.wire_version()));
    header.encode_vec(1, client_src);
    header.encode_vec(1, retry_src_cid);
    header.encode(token);

    let tag = retry_integrity_tag(client_dst, header.as_ref());

    let mut packet = header;
    packet.encode(&tag);

    Datagram::new(local, remote, tos, packet.into_vec())
}
