// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Initial packet protection keys (RFC 9001 section 5.2). TLS/AEAD/HKDF
//! primitives are out of scope for the admission core per the design
//! brief; this module is the "black-box callable" boundary the rest of the
//! core talks to; `QuicVersion1` is the only implementation, but the
//! `Role`-keyed split lets a test fixture play the client side.

use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, NONCE_LEN},
    hkdf::{Salt, HKDF_SHA256},
};

use crate::cid::ConnectionId;

/// The version-1 Initial salt from RFC 9001 section 5.2.
const INITIAL_SALT: [u8; 20] = [
    0x38, 0x76, 0x2c, 0xf7, 0xf5, 0x59, 0x34, 0xb3, 0x4d, 0x17, 0x9a, 0xe6, 0xa4, 0xc8, 0x0c, 0xad,
    0xcc, 0xbb, 0x7f, 0x0a,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// A derived Initial AEAD key plus its static IV, ready to seal/open a
/// single Initial packet's payload.
pub struct InitialKey {
    key: LessSafeKey,
    iv: [u8; NONCE_LEN],
}

fn hkdf_expand_label(secret: &ring::hkdf::Prk, label: &str, out: &mut [u8]) {
    struct Len(usize);
    impl ring::hkdf::KeyType for Len {
        fn len(&self) -> usize {
            self.0
        }
    }
    // RFC 8446 HkdfLabel, restricted to the fixed "tls13 " prefix QUIC uses.
    let mut info = Vec::with_capacity(2 + 1 + 6 + label.len() + 1);
    info.extend_from_slice(&(out.len() as u16).to_be_bytes());
    let full_label = format!("tls13 {label}");
    info.push(full_label.len() as u8);
    info.extend_from_slice(full_label.as_bytes());
    info.push(0); // empty context
    let info_refs = [info.as_slice()];
    let okm = secret
        .expand(&info_refs, Len(out.len()))
        .expect("label sizes are fixed and small");
    okm.fill(out).expect("length matches");
}

impl InitialKey {
    /// Derive the Initial key this `side` uses to protect/unprotect
    /// traffic keyed off `dcid` -- the destination connection ID the
    /// client chose in its first Initial.
    #[must_use]
    pub fn derive(dcid: &ConnectionId, side: Side) -> Self {
        let salt = Salt::new(HKDF_SHA256, &INITIAL_SALT);
        let initial_secret = salt.extract(dcid);

        let mut client_secret = [0u8; 32];
        hkdf_expand_label(&initial_secret, "client in", &mut client_secret);
        let mut server_secret = [0u8; 32];
        hkdf_expand_label(&initial_secret, "server in", &mut server_secret);

        let secret = match side {
            Side::Client => client_secret,
            Side::Server => server_secret,
        };
        let prk = ring::hkdf::Prk::new_less_safe(HKDF_SHA256, &secret);

        let mut key_bytes = [0u8; 16];
        hkdf_expand_label(&prk, "quic key", &mut key_bytes);
        let mut iv = [0u8; NONCE_LEN];
        hkdf_expand_label(&prk, "quic iv", &mut iv);

        let unbound = UnboundKey::new(&AES_128_GCM, &key_bytes).expect("16-byte key");
        Self {
            key: LessSafeKey::new(unbound),
            iv,
        }
    }

    fn nonce(&self, packet_number: u64) -> Nonce {
        let mut n = self.iv;
        let pn_bytes = packet_number.to_be_bytes();
        for (i, b) in pn_bytes.iter().enumerate() {
            n[NONCE_LEN - 8 + i] ^= b;
        }
        Nonce::assume_unique_for_key(n)
    }

    /// Open `payload` in place (header bytes are AAD). Returns the
    /// plaintext slice on success.
    pub fn open<'a>(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &'a mut [u8],
    ) -> Result<&'a mut [u8], ring::error::Unspecified> {
        self.key
            .open_in_place(self.nonce(packet_number), Aad::from(header), payload)
    }

    /// Seal `in_out` in place (plaintext in, ciphertext+tag out), with
    /// `header` as AAD.
    pub fn seal(
        &self,
        packet_number: u64,
        header: &[u8],
        in_out: &mut Vec<u8>,
    ) -> Result<(), ring::error::Unspecified> {
        self.key
            .seal_in_place_append_tag(self.nonce(packet_number), Aad::from(header), in_out)
    }

    #[must_use]
    pub fn tag_len() -> usize {
        AES_128_GCM.tag_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_and_server_keys_interoperate() {
        // `Side` names which direction of traffic a key protects, not which
        // physical endpoint derived it: the client seals with its
        // client-direction key, and the server, to read it, derives that
        // *same* direction's key independently from the shared DCID.
        let dcid = ConnectionId::from([0xaa; 8]);
        let client_write = InitialKey::derive(&dcid, Side::Client);
        let server_read = InitialKey::derive(&dcid, Side::Client);

        let header = b"header-aad";
        let mut buf = b"hello server".to_vec();
        client_write.seal(0, header, &mut buf).unwrap();
        let opened = server_read.open(0, header, &mut buf).unwrap();
        assert_eq!(opened, b"hello server");

        // The two directions use genuinely different keys.
        let server_write = InitialKey::derive(&dcid, Side::Server);
        let mut buf2 = b"hello client".to_vec();
        server_write.seal(0, header, &mut buf2).unwrap();
        assert!(client_write.open(0, header, &mut buf2).is_err());
    }

    #[test]
    fn tampered_payload_fails_to_open() {
        let dcid = ConnectionId::from([0xbb; 8]);
        let client = InitialKey::derive(&dcid, Side::Client);

        let header = b"header-aad";
        let mut buf = b"hello server".to_vec();
        client.seal(0, header, &mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        assert!(client.open(0, header, &mut buf).is_err());
    }
}
