// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Version Negotiator (spec §4.4).

use std::net::SocketAddr;

use quic_common::{Datagram, Encoder};

use crate::{cid::ConnectionIdRef, packet::Version};

/// Build a Version Negotiation packet in response to a datagram whose
/// long-header version isn't in `supported`. `client_scid`/`client_dcid`
/// are swapped into the VN's DCID/SCID per RFC 9000 section 6.
#[must_use]
pub fn build_version_negotiation(
    remote: SocketAddr,
    local: SocketAddr,
    tos: u8,
    client_scid: ConnectionIdRef<'_>,
    client_dcid: ConnectionIdRef<'_>,
    supported: &[Version],
) -> Datagram {
    let mut enc = Encoder::new();
    enc.encode_byte(0x80); // long header bit set; rest of the byte is unused for VN
    enc.encode_uint(4, u64::from(Version::VERSION_NEGOTIATION.wire_version()));
    enc.encode_vec(1, &client_scid);
    enc.encode_vec(1, &client_dcid);
    for v in supported {
        enc.encode_uint(4, u64::from(v.wire_version()));
    }
    Datagram::new(local, remote, tos, enc.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_common::Decoder;

    #[test]
    fn vn_swaps_cids_and_lists_versions() {
        let remote = "127.0.0.1:1337".parse().unwrap();
        let local = "127.0.0.1:443".parse().unwrap();
        let scid = ConnectionIdRef::new(&[1, 2, 3, 4, 5]);
        let dcid = ConnectionIdRef::new(&[1, 2, 3, 4, 5, 6]);
        let dgram = build_version_negotiation(remote, local, 0, scid, dcid, &[Version::VERSION_1]);

        let mut dec = Decoder::new(&dgram[..]);
        let first = dec.decode_byte().unwrap();
        assert_eq!(first & 0x80, 0x80);
        assert_eq!(dec.decode_uint(4), Some(0));
        assert_eq!(dec.decode_vec(1), Some(&[1, 2, 3, 4, 5][..]));
        assert_eq!(dec.decode_vec(1), Some(&[1, 2, 3, 4, 5, 6][..]));
        assert_eq!(dec.decode_uint(4), Some(u64::from(Version::VERSION_1.wire_version())));
    }
}
