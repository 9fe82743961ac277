// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Packet Classifier (spec §4.1): parses long-header fields from a raw
//! datagram without touching anything that is header-protected or
//! AEAD-sealed.  Classification operates purely on cleartext fields.

use quic_common::Decoder;

use crate::cid::{ConnectionIdRef, MAX_CONNECTION_ID_LEN, MIN_CONNECTION_ID_LEN};

/// The minimum total size of a UDP datagram carrying a client Initial
/// packet (RFC 9000 section 14.1), used to discourage amplification.
pub const MIN_INITIAL_PACKET_SIZE: usize = 1200;

/// A QUIC version number, carried as a raw 32-bit wire value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(u32);

impl Version {
    #[must_use]
    pub const fn new(wire: u32) -> Self {
        Self(wire)
    }

    #[must_use]
    pub const fn wire_version(self) -> u32 {
        self.0
    }

    pub const VERSION_1: Self = Self(0x0000_0001);
    pub const VERSION_NEGOTIATION: Self = Self(0x0000_0000);
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
    VersionNegotiation,
    Short,
}

/// Why a datagram was dropped during classification or admission. Every
/// variant corresponds to an "Input rejection" or "Ambiguous corruption"
/// entry in the error taxonomy; none of these are surfaced to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    NotLongHeader,
    OversizeCid,
    InitialTooShort,
    ShortCidForNewState,
    Truncated,
    UnknownConnection,
    AeadOpenFailed,
}

/// Parsed view over a datagram's first packet.  Borrows from the datagram;
/// never holds decrypted state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LongHeader<'a> {
    pub packet_type: PacketType,
    pub version: Version,
    pub dcid: ConnectionIdRef<'a>,
    pub scid: ConnectionIdRef<'a>,
    pub token: &'a [u8],
    /// The packet's `Length` field (RFC 9000 section 17.2): the number of
    /// bytes remaining after `header_len`, covering the packet number and
    /// the AEAD-protected payload. `0` for packet types that carry neither
    /// (`Retry`).
    pub length: u64,
    /// Offset of the first byte after the parsed cleartext header -- up to
    /// and including the `Length` field, not including the packet number
    /// (whose own length isn't recoverable without removing header
    /// protection, which classification never does).
    pub header_len: usize,
}

/// Classify the first packet in a datagram.  `supported_versions` is only
/// used to decide whether an unrecognized version is routed to
/// `PacketType::VersionNegotiation`-worthy handling by the caller; this
/// function always reports the wire version it saw.
pub fn classify<'a>(dgram: &'a [u8], supported: &[Version]) -> Result<LongHeader<'a>, DropReason> {
    let mut dec = Decoder::new(dgram);
    let first = dec.decode_byte().ok_or(DropReason::Truncated)?;

    if first & 0x80 == 0 {
        return Err(DropReason::NotLongHeader);
    }

    let version = Version::new(
        u32::try_from(dec.decode_uint(4).ok_or(DropReason::Truncated)?)
            .map_err(|_| DropReason::Truncated)?,
    );

    let dcid_len = usize::try_from(dec.decode_uint(1).ok_or(DropReason::Truncated)?).unwrap();
    if dcid_len > MAX_CONNECTION_ID_LEN {
        return Err(DropReason::OversizeCid);
    }
    let dcid = ConnectionIdRef::new(dec.decode(dcid_len).ok_or(DropReason::Truncated)?);

    let scid_len = usize::try_from(dec.decode_uint(1).ok_or(DropReason::Truncated)?).unwrap();
    if scid_len > MAX_CONNECTION_ID_LEN {
        return Err(DropReason::OversizeCid);
    }
    let scid = ConnectionIdRef::new(dec.decode(scid_len).ok_or(DropReason::Truncated)?);

    if version == Version::VERSION_NEGOTIATION {
        // Clients never send VN; a cleartext VN-shaped datagram is noise.
        return Err(DropReason::NotLongHeader);
    }

    let long_type = (first >> 4) & 0x3;
    let packet_type = match long_type {
        0 => PacketType::Initial,
        1 => PacketType::ZeroRtt,
        2 => PacketType::Handshake,
        3 => PacketType::Retry,
        _ => unreachable!("2 bits"),
    };

    let token: &[u8] = if packet_type == PacketType::Initial {
        dec.decode_vvec().ok_or(DropReason::Truncated)?
    } else {
        &[]
    };

    if packet_type == PacketType::Initial {
        if dgram.len() < MIN_INITIAL_PACKET_SIZE {
            return Err(DropReason::InitialTooShort);
        }
        if dcid.len() < MIN_CONNECTION_ID_LEN {
            return Err(DropReason::ShortCidForNewState);
        }
    }

    let length = if packet_type == PacketType::Retry {
        0
    } else {
        dec.decode_varint().ok_or(DropReason::Truncated)?
    };

    // Version not in our supported set is handled by the admission
    // controller (it still needs the parsed SCID/DCID to emit VN), so we
    // don't reject here -- only record what we saw.
    let _ = supported;

    Ok(LongHeader {
        packet_type,
        version,
        dcid,
        scid,
        token,
        length,
        header_len: dec.offset(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quic_common::Encoder;

    fn build_initial(dcid: &[u8], scid: &[u8], token: &[u8], total_len: usize) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.encode_byte(0xc0); // long header, type=Initial
        enc.encode_uint(4, u64::from(Version::VERSION_1.wire_version()));
        enc.encode_vec(1, dcid);
        enc.encode_vec(1, scid);
        enc.encode_vvec(token);
        enc.encode_varint(0); // length placeholder
        let mut bytes = enc.into_vec();
        bytes.resize(total_len.max(bytes.len()), 0);
        bytes
    }

    #[test]
    fn rejects_short_header() {
        let dgram = [0x00u8, 1, 2, 3];
        assert_eq!(
            classify(&dgram, &[Version::VERSION_1]),
            Err(DropReason::NotLongHeader)
        );
    }

    #[test]
    fn rejects_short_initial() {
        let dgram = build_initial(&[1, 2, 3, 4, 5, 6, 7, 8], &[], &[], 100);
        assert_eq!(
            classify(&dgram, &[Version::VERSION_1]),
            Err(DropReason::InitialTooShort)
        );
    }

    #[test]
    fn rejects_short_dcid_on_initial() {
        let dgram = build_initial(&[1, 2, 3], &[], &[], MIN_INITIAL_PACKET_SIZE);
        assert_eq!(
            classify(&dgram, &[Version::VERSION_1]),
            Err(DropReason::ShortCidForNewState)
        );
    }

    #[test]
    fn accepts_well_formed_initial() {
        let dgram = build_initial(
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
            &[],
            b"tok",
            MIN_INITIAL_PACKET_SIZE,
        );
        let parsed = classify(&dgram, &[Version::VERSION_1]).unwrap();
        assert_eq!(parsed.packet_type, PacketType::Initial);
        assert_eq!(&parsed.dcid[..], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(parsed.token, b"tok");
    }
}
