// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A thin async UDP socket wrapper. The admission core treats the socket
//! implementation itself as an external collaborator (batching, GSO/GRO,
//! pacing are all out of scope); this crate exists only to give the
//! embedding layer something concrete to read datagrams from and write
//! responses to.

use std::{io, net::SocketAddr, sync::Arc};

use quic_common::{qdebug, Datagram};
use tokio::net::UdpSocket;

/// Largest UDP payload this wrapper will read in one `recv`. Comfortably
/// above the largest packet a conforming QUIC implementation sends without
/// a negotiated larger `max_udp_payload_size`.
pub const RECV_BUF_SIZE: usize = 2048;

#[derive(Clone)]
pub struct Socket {
    inner: Arc<UdpSocket>,
}

impl Socket {
    /// Bind a fresh UDP socket to `addr`.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(addr).await?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Wrap an already-bound socket (e.g. one with platform-specific socket
    /// options applied by the caller).
    #[must_use]
    pub fn new(inner: UdpSocket) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Receive one datagram. ToS/ECN marking isn't read back here -- that's
    /// a platform-specific cmsg dance this wrapper doesn't attempt.
    pub async fn recv(&self) -> io::Result<Datagram> {
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        let (len, remote) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(len);
        let local = self.inner.local_addr()?;
        Ok(Datagram::new(remote, local, 0, buf))
    }

    /// Send one datagram to its recorded destination.
    pub async fn send(&self, dgram: &Datagram) -> io::Result<()> {
        let sent = self.inner.send_to(dgram, dgram.destination()).await?;
        if sent != dgram.len() {
            qdebug!("short send: {} of {} bytes", sent, dgram.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrips_a_datagram() {
        let a = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let dgram = Datagram::new(a.local_addr().unwrap(), b.local_addr().unwrap(), 0, b"hello".to_vec());
        a.send(&dgram).await.unwrap();
        let received = b.recv().await.unwrap();
        assert_eq!(&received[..], b"hello");
        assert_eq!(received.source(), a.local_addr().unwrap());
    }
}
