// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! 0-RTT Buffer (spec §4.6, §4.9): a short-lived per-DCID queue of 0-RTT
//! packets that arrived before their Initial. Owned exclusively by the
//! Worker -- it is the sole mutator of admission-local state -- so this
//! type needs no internal locking.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use quic_common::{qdebug, qtrace, Datagram};

use crate::cid::ConnectionId;

/// Per-DCID cap on buffered 0-RTT packets (spec §4.6 "e.g. 32").
const PER_DCID_CAP: usize = 32;
/// Global cap on total buffered bytes across all DCIDs (spec §3 P4).
const GLOBAL_BYTE_CAP: usize = 1 << 20; // 1 MiB

struct Entry {
    packets: VecDeque<Datagram>,
    bytes: usize,
    first_seen: Instant,
}

pub struct ZeroRttBuffer {
    by_dcid: HashMap<ConnectionId, Entry>,
    total_bytes: usize,
    ttl: Duration,
}

impl ZeroRttBuffer {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            by_dcid: HashMap::new(),
            total_bytes: 0,
            ttl,
        }
    }

    /// Park `dgram` under `dcid`. Returns `false` (drop-tail) if the
    /// per-DCID or global cap would be exceeded.
    pub fn push(&mut self, dcid: ConnectionId, dgram: Datagram, now: Instant) -> bool {
        let len = dgram.len();
        if self.total_bytes + len > GLOBAL_BYTE_CAP {
            qdebug!("0-RTT buffer at global cap ({} bytes), dropping", self.total_bytes());
            return false;
        }
        let entry = self.by_dcid.entry(dcid.clone()).or_insert_with(|| Entry {
            packets: VecDeque::new(),
            bytes: 0,
            first_seen: now,
        });
        if entry.packets.len() >= PER_DCID_CAP {
            qdebug!("0-RTT buffer for {:?} at per-DCID cap ({}), dropping", dcid, entry.packets.len());
            return false;
        }
        entry.packets.push_back(dgram);
        entry.bytes += len;
        self.total_bytes += len;
        true
    }

    /// Drain every buffered packet for `dcid`, in arrival order, for
    /// replay into a newly admitted connection.
    pub fn take(&mut self, dcid: &[u8]) -> Vec<Datagram> {
        qtrace!("replaying {} buffered 0-RTT packet(s) for {:?}", self.len_for(dcid), dcid);
        let Some(entry) = self.by_dcid.remove(dcid) else {
            return Vec::new();
        };
        self.total_bytes -= entry.bytes;
        entry.packets.into_iter().collect()
    }

    /// Drop every DCID's buffer whose age exceeds the configured TTL.
    /// Called periodically by the Worker.
    pub fn expire(&mut self, now: Instant) {
        let ttl = self.ttl;
        let mut freed = 0;
        self.by_dcid.retain(|_, entry| {
            let keep = now.saturating_duration_since(entry.first_seen) < ttl;
            if !keep {
                freed += entry.bytes;
            }
            keep
        });
        self.total_bytes -= freed;
    }

    #[must_use]
    pub fn len_for(&self, dcid: &[u8]) -> usize {
        self.by_dcid.get(dcid).map_or(0, |e| e.packets.len())
    }

    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn clear(&mut self) {
        self.by_dcid.clear();
        self.total_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn dgram(n: usize) -> Datagram {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        Datagram::new(addr, addr, 0, vec![0u8; n])
    }

    #[test]
    fn preserves_arrival_order() {
        let mut buf = ZeroRttBuffer::new(Duration::from_secs(10));
        let dcid = ConnectionId::from([1; 8]);
        let now = Instant::now();
        buf.push(dcid.clone(), dgram(1), now);
        buf.push(dcid.clone(), dgram(2), now);
        buf.push(dcid.clone(), dgram(3), now);
        let drained = buf.take(&dcid);
        assert_eq!(drained.iter().map(Datagram::len).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn per_dcid_cap_drops_tail() {
        let mut buf = ZeroRttBuffer::new(Duration::from_secs(10));
        let dcid = ConnectionId::from([1; 8]);
        let now = Instant::now();
        for _ in 0..PER_DCID_CAP {
            assert!(buf.push(dcid.clone(), dgram(1), now));
        }
        assert!(!buf.push(dcid.clone(), dgram(1), now));
        assert_eq!(buf.len_for(&dcid), PER_DCID_CAP);
    }

    #[test]
    fn expiry_drops_stale_entries() {
        let mut buf = ZeroRttBuffer::new(Duration::from_millis(10));
        let dcid = ConnectionId::from([1; 8]);
        let now = Instant::now();
        buf.push(dcid.clone(), dgram(5), now);
        buf.expire(now + Duration::from_millis(20));
        assert_eq!(buf.len_for(&dcid), 0);
        assert_eq!(buf.total_bytes(), 0);
    }
}
