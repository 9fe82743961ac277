// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! QUIC connection identifiers.

use std::{borrow::Borrow, fmt, ops::Deref};

use quic_common::hex;
use rand::RngCore;

/// Maximum connection ID length allowed by the wire format.
pub const MAX_CONNECTION_ID_LEN: usize = 20;
/// Minimum length the admission core requires of any CID it mints, and of
/// any DCID it is willing to create new state for.
pub const MIN_CONNECTION_ID_LEN: usize = 8;
/// Length of a stateless reset token.
pub const STATELESS_RESET_TOKEN_LEN: usize = 16;

pub type StatelessResetToken = [u8; STATELESS_RESET_TOKEN_LEN];

/// An owned connection ID (0-20 bytes).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    bytes: Vec<u8>,
}

impl ConnectionId {
    /// # Panics
    /// If `bytes` is longer than `MAX_CONNECTION_ID_LEN`.
    #[must_use]
    pub fn from(bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        assert!(bytes.len() <= MAX_CONNECTION_ID_LEN);
        Self {
            bytes: bytes.to_vec(),
        }
    }

    /// Generate a fresh, random connection ID of the given length, in
    /// `[MIN_CONNECTION_ID_LEN, MAX_CONNECTION_ID_LEN]`.
    #[must_use]
    pub fn generate(rng: &mut dyn RngCore, len: usize) -> Self {
        debug_assert!((MIN_CONNECTION_ID_LEN..=MAX_CONNECTION_ID_LEN).contains(&len));
        let mut bytes = vec![0; len];
        rng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    #[must_use]
    pub fn as_cid_ref(&self) -> ConnectionIdRef<'_> {
        ConnectionIdRef { bytes: &self.bytes }
    }
}

impl Deref for ConnectionId {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl Borrow<[u8]> for ConnectionId {
    fn borrow(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.bytes))
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cid:{self}")
    }
}

/// A borrowed view of a connection ID, as parsed straight out of a
/// datagram without copying.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionIdRef<'a> {
    bytes: &'a [u8],
}

impl<'a> ConnectionIdRef<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl Deref for ConnectionIdRef<'_> {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        self.bytes
    }
}

impl AsRef<[u8]> for ConnectionIdRef<'_> {
    fn as_ref(&self) -> &[u8] {
        self.bytes
    }
}

impl fmt::Display for ConnectionIdRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(self.bytes))
    }
}

impl fmt::Debug for ConnectionIdRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cid:{self}")
    }
}

impl From<ConnectionIdRef<'_>> for ConnectionId {
    fn from(r: ConnectionIdRef<'_>) -> Self {
        Self::from(r.bytes)
    }
}

/// Mints fresh server-chosen connection IDs.  A real embedding might
/// deterministically encrypt routing information into the CID; the
/// admission core only requires uniqueness and a minimum length, so the
/// default implementation is a CSPRNG.
pub trait ConnectionIdGenerator: Send + Sync {
    fn generate_cid(&self) -> ConnectionId;
}

/// Default generator: fixed-length random connection IDs.
#[derive(Debug, Clone, Copy)]
pub struct RandomConnectionIdGenerator {
    len: usize,
}

impl RandomConnectionIdGenerator {
    /// # Panics
    /// If `len` is out of `[MIN_CONNECTION_ID_LEN, MAX_CONNECTION_ID_LEN]`.
    #[must_use]
    pub fn new(len: usize) -> Self {
        assert!((MIN_CONNECTION_ID_LEN..=MAX_CONNECTION_ID_LEN).contains(&len));
        Self { len }
    }
}

impl Default for RandomConnectionIdGenerator {
    fn default() -> Self {
        Self::new(MIN_CONNECTION_ID_LEN)
    }
}

impl ConnectionIdGenerator for RandomConnectionIdGenerator {
    fn generate_cid(&self) -> ConnectionId {
        let mut rng = rand::thread_rng();
        ConnectionId::generate(&mut rng, self.len)
    }
}
