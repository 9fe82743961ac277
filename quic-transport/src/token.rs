// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Token Authenticator (spec §4.2): mints and validates address-validation
//! tokens (Retry tokens and NEW_TOKEN tokens).  Tokens are opaque,
//! AEAD-sealed records; a decryption failure collapses to "no token" in the
//! caller's eyes, which is what keeps us from acting as an oracle for
//! whether a token was merely stale vs. forged outright (see
//! `AdmissionController`).

use std::{
    net::{IpAddr, SocketAddr},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use quic_common::{Decoder, Encoder};
use rand::RngCore;
use ring::aead::{self, Nonce, UnboundKey, AES_256_GCM};

use crate::cid::ConnectionId;

/// Retry tokens must be replayed within this window of issuance.
pub const RETRY_VALIDITY: Duration = Duration::from_secs(10);
/// `NEW_TOKEN` tokens (handed out after a successful handshake) live much
/// longer, since they are meant to survive until a future connection.
pub const TOKEN_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

const NONCE_LEN: usize = 12;
const KIND_RETRY: u8 = 0;
const KIND_NEW: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyResult {
    ValidRetry {
        odcid: ConnectionId,
        retry_src_cid: ConnectionId,
    },
    ValidNew,
    Invalid,
    Absent,
}

/// Canonical form an address is reduced to before being bound into a
/// token. IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are normalized to
/// their IPv4 form so that mint and verify agree regardless of which
/// socket API handed us the address; see `DESIGN.md` for the decision this
/// resolves (spec §9 open question).
fn canonical_addr_bytes(addr: SocketAddr) -> Vec<u8> {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => IpAddr::V4(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(IpAddr::V6(v6), IpAddr::V4),
    };
    let mut out = match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };
    out.extend_from_slice(&addr.port().to_be_bytes());
    out
}

fn now_millis(now: SystemTime) -> u64 {
    now.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Mints and verifies address-validation tokens. Immutable after
/// construction; the sealing key never changes for the lifetime of a
/// `Server`.
pub struct TokenAuthenticator {
    key: aead::LessSafeKey,
}

impl std::fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthenticator").finish_non_exhaustive()
    }
}

impl TokenAuthenticator {
    /// Construct with a fresh random key. Each `Server` gets its own key,
    /// generated once at `listen` time.
    #[must_use]
    pub fn new() -> Self {
        let mut key_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key_bytes);
        Self::from_key_bytes(&key_bytes)
    }

    #[must_use]
    pub fn from_key_bytes(key_bytes: &[u8; 32]) -> Self {
        let unbound = UnboundKey::new(&AES_256_GCM, key_bytes).expect("32-byte key");
        Self {
            key: aead::LessSafeKey::new(unbound),
        }
    }

    fn seal(&self, kind: u8, remote: SocketAddr, odcid: Option<&[u8]>, retry_src_cid: Option<&[u8]>, now: SystemTime) -> Vec<u8> {
        let mut plaintext = Encoder::new();
        plaintext.encode_byte(kind);
        plaintext.encode_uint(8, now_millis(now));
        plaintext.encode_vec(1, &canonical_addr_bytes(remote));
        if let Some(odcid) = odcid {
            plaintext.encode_vec(1, odcid);
        }
        if let Some(rscid) = retry_src_cid {
            plaintext.encode_vec(1, rscid);
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.into_vec();
        self.key
            .seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
            .expect("sealing never fails with a fixed-size plaintext");

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        out
    }

    #[must_use]
    pub fn mint_retry(&self, remote: SocketAddr, odcid: &ConnectionId, retry_src_cid: &ConnectionId, now: SystemTime) -> Vec<u8> {
        self.seal(KIND_RETRY, remote, Some(odcid), Some(retry_src_cid), now)
    }

    #[must_use]
    pub fn mint_new(&self, remote: SocketAddr, now: SystemTime) -> Vec<u8> {
        self.seal(KIND_NEW, remote, None, None, now)
    }

    /// Verify `token` was minted for `remote`. See module docs: any
    /// decryption failure, expiry, or address mismatch is reported
    /// identically as `Invalid` so a forged token can't be distinguished
    /// from a stale real one.
    #[must_use]
    pub fn verify(&self, token: &[u8], remote: SocketAddr, now: SystemTime) -> VerifyResult {
        if token.is_empty() {
            return VerifyResult::Absent;
        }
        if token.len() < NONCE_LEN {
            return VerifyResult::Invalid;
        }
        let (nonce_bytes, ciphertext) = token.split_at(NONCE_LEN);
        let mut nonce_arr = [0u8; NONCE_LEN];
        nonce_arr.copy_from_slice(nonce_bytes);
        let mut in_out = ciphertext.to_vec();
        let Ok(plaintext) = self.key.open_in_place(
            Nonce::assume_unique_for_key(nonce_arr),
            aead::Aad::empty(),
            &mut in_out,
        ) else {
            return VerifyResult::Invalid;
        };

        let mut dec = Decoder::new(plaintext);
        let Some(kind) = dec.decode_byte() else {
            return VerifyResult::Invalid;
        };
        let Some(issued_ms) = dec.decode_uint(8) else {
            return VerifyResult::Invalid;
        };
        let Some(addr_bytes) = dec.decode_vec(1) else {
            return VerifyResult::Invalid;
        };
        if addr_bytes != canonical_addr_bytes(remote) {
            return VerifyResult::Invalid;
        }

        let age_ms = now_millis(now).saturating_sub(issued_ms);
        match kind {
            KIND_RETRY => {
                let Some(odcid) = dec.decode_vec(1) else {
                    return VerifyResult::Invalid;
                };
                let Some(retry_src_cid) = dec.decode_vec(1) else {
                    return VerifyResult::Invalid;
                };
                if age_ms > u128::from(RETRY_VALIDITY.as_millis() as u64) as u64 {
                    return VerifyResult::Invalid;
                }
                VerifyResult::ValidRetry {
                    odcid: ConnectionId::from(odcid),
                    retry_src_cid: ConnectionId::from(retry_src_cid),
                }
            }
            KIND_NEW => {
                if age_ms > u128::from(TOKEN_VALIDITY.as_millis() as u64) as u64 {
                    return VerifyResult::Invalid;
                }
                VerifyResult::ValidNew
            }
            _ => VerifyResult::Invalid,
        }
    }
}

impl Default for TokenAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}
