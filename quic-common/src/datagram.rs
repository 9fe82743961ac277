// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::{
    net::SocketAddr,
    ops::{Deref, DerefMut},
};

/// An inbound or outbound UDP datagram together with the addresses it
/// travelled, or will travel, between.
///
/// `Datagram` owns its payload.  Pooling/reuse of the backing buffer is a
/// concern of the socket layer (see `quic-udp`); once a `Datagram` is handed
/// to the admission core it is the sole owner and is responsible for
/// dropping (releasing) it on every exit path.
#[derive(Clone, PartialEq, Eq)]
pub struct Datagram {
    src: SocketAddr,
    dst: SocketAddr,
    tos: u8,
    data: Vec<u8>,
}

impl Datagram {
    pub fn new(src: SocketAddr, dst: SocketAddr, tos: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            src,
            dst,
            tos,
            data: data.into(),
        }
    }

    #[must_use]
    pub fn source(&self) -> SocketAddr {
        self.src
    }

    #[must_use]
    pub fn destination(&self) -> SocketAddr {
        self.dst
    }

    #[must_use]
    pub fn tos(&self) -> u8 {
        self.tos
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Deref for Datagram {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for Datagram {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl std::fmt::Debug for Datagram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Datagram {} -> {} ({} bytes)",
            self.src,
            self.dst,
            self.data.len()
        )
    }
}
