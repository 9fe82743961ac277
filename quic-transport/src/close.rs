// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Invalid-Token Responder (spec §4.5) and the analogous
//! CONNECTION_REFUSED response (spec §4.6 step 4): both emit an Initial
//! packet carrying a single CONNECTION_CLOSE frame, sealed under Initial
//! keys derived from the client-chosen DCID.

use std::net::SocketAddr;

use quic_common::{Datagram, Encoder};

use crate::{
    cid::ConnectionId,
    crypto::{InitialKey, Side},
    packet::Version,
};

/// RFC 9000 section 20.1 transport error codes this responder can emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseError {
    InvalidToken,
    ConnectionRefused,
}

impl CloseError {
    const fn code(self) -> u64 {
        match self {
            Self::InvalidToken => 0x0b,
            Self::ConnectionRefused => 0x02,
        }
    }
}

const FRAME_TYPE_CONNECTION_CLOSE: u64 = 0x1c;
const PACKET_NUMBER: u64 = 0;

/// Build an Initial datagram carrying `CONNECTION_CLOSE(error)` with an
/// empty reason phrase, addressed back to `remote`. Keys are derived from
/// `client_dcid` (the DCID the client used to reach us), but the reply
/// header's own DCID field is `client_scid` (spec §4.5: `DCID=clientSrc`),
/// matching the original implementation's
/// `replyHdr.DestConnectionID == hdr.SrcConnectionID`.
#[must_use]
pub fn build_close(
    remote: SocketAddr,
    local: SocketAddr,
    tos: u8,
    version: Version,
    client_dcid: &ConnectionId,
    client_scid: &ConnectionId,
    server_scid: &ConnectionId,
    error: CloseError,
) -> Datagram {
    let mut frame = Encoder::new();
    frame.encode_varint(FRAME_TYPE_CONNECTION_CLOSE);
    frame.encode_varint(error.code());
    frame.encode_varint(0); // frame type that triggered the error; none
    frame.encode_vvec(&[]); // empty reason phrase
    let mut payload = frame.into_vec();

    let key = InitialKey::derive(client_dcid, Side::Server);

    // DCID=client_scid (the client's own SCID), SCID=server_scid.
    let mut header = Encoder::new();
    header.encode_byte(0xc0); // long header, type=Initial
    header.encode_uint(4, u64::from(version.wire_version()));
    header.encode_vec(1, client_scid);
    header.encode_vec(1, server_scid);
    header.encode_vvec(&[]); // no token on a server-sent Initial
    let remainder_len = 1 /* packet number */ + payload.len() + InitialKey::tag_len();
    header.encode_varint(remainder_len as u64);
    header.encode_uint(1, PACKET_NUMBER);
    let header_bytes = header.into_vec();

    key.seal(PACKET_NUMBER, &header_bytes, &mut payload)
        .expect("sealing a small fixed plaintext never fails");

    let mut packet = header_bytes;
    packet.extend_from_slice(&payload);

    Datagram::new(local, remote, tos, packet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_packet_round_trips_under_client_initial_key() {
        let remote = "127.0.0.1:1".parse().unwrap();
        let local = "127.0.0.1:2".parse().unwrap();
        let dcid = ConnectionId::from((1..=10).collect::<Vec<u8>>());
        let client_scid = ConnectionId::from([5, 5, 5, 5, 5]);
        let scid = ConnectionId::from([9, 9, 9, 9, 9, 9, 9, 9]);
        let dgram = build_close(
            remote,
            local,
            0,
            Version::VERSION_1,
            &dcid,
            &client_scid,
            &scid,
            CloseError::InvalidToken,
        );

        // The client derives the matching key the same way a real client
        // would: from the DCID it originally chose.
        let client_key = InitialKey::derive(&dcid, Side::Server);
        // header_len is reconstructed the way the classifier would parse it.
        let header_len = dgram.len() - (InitialKey::tag_len() + /* frame */ 4);
        let mut payload = dgram[header_len..].to_vec();
        let opened = client_key
            .open(PACKET_NUMBER, &dgram[..header_len], &mut payload)
            .unwrap();
        assert_eq!(opened[0], 0x1c);
    }
}
