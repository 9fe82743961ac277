// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The handoff contract to the per-connection protocol engine (spec §9
//! design notes: "polymorphism over handlers"). The admission core only
//! ever depends on the small capability set defined here -- `deliver`,
//! `spawn_run`, `cancel`/`is_cancelled`, `ready`, and `perspective` -- so a
//! test suite can substitute a mock handler without any of the real
//! handshake/loss-recovery machinery.  Handshake progression, stream flow
//! control, and congestion control are out of scope for this crate.

use std::{net::SocketAddr, sync::Arc};

use quic_common::{Datagram, Role};
use tokio::sync::watch;

use crate::{cid::ConnectionId, packet::Version};

/// What state a connection has reached as far as the Accept Queue cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    /// Still handshaking, no 0-RTT acceptance yet.
    Pending,
    /// 0-RTT data was accepted; usable in "early" accept mode.
    Early,
    /// Handshake completed; usable in both accept modes.
    Full,
    /// Torn down before becoming ready; the Accept Queue discards it
    /// instead of surfacing it (spec §4.9).
    Closed,
}

/// Everything the Admission Controller learned while setting up a new
/// connection attempt, collapsed into one record so that the
/// callback-heavy constructor signature of the original design becomes a
/// single-argument factory method (spec §9).
#[derive(Clone, Debug)]
pub struct ConnectionParams {
    pub remote: SocketAddr,
    pub local: SocketAddr,
    pub version: Version,
    /// The DCID the client chose for this flow; every packet for the
    /// connection is registered under this CID until the handshake hands
    /// out others.
    pub client_dcid: ConnectionId,
    pub client_scid: ConnectionId,
    /// Fresh, server-chosen CID the connection is also registered under.
    pub server_scid: ConnectionId,
    pub stateless_reset_token: [u8; crate::cid::STATELESS_RESET_TOKEN_LEN],
    /// Set when this connection was admitted via a validated Retry token.
    pub odcid: Option<ConnectionId>,
    pub retry_src_cid: Option<ConnectionId>,
    pub zero_rtt_enabled: bool,
}

/// The capability set the admission core needs from a per-connection
/// handler. Implemented by the real protocol engine in production and by a
/// mock in tests.
pub trait ConnectionHandler: Send + Sync {
    /// Hand a datagram belonging to this connection to the handler. Never
    /// blocks; the handler is expected to queue internally.
    fn deliver(&self, dgram: Datagram);

    /// Which side of the handshake this handler is playing (always
    /// `Role::Server` in production; test doubles may differ).
    fn perspective(&self) -> Role;

    /// Signal that this connection's context has been cancelled (e.g. by
    /// server shutdown); handlers should wind down on the next chance they
    /// get.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;

    /// Subscribe to this handler's readiness transitions. The Accept
    /// Queue polls this to decide when (and whether) to surface the
    /// connection.
    fn ready(&self) -> watch::Receiver<ReadyState>;

    /// Start the handler's cooperative task. Called once, immediately
    /// after registration, from a task separate from the Worker so the
    /// Worker is never blocked on a single connection's progress (spec
    /// §5).
    fn spawn_run(self: Arc<Self>);
}

/// Constructs connection handlers from a single `ConnectionParams` record.
pub trait ConnectionFactory: Send + Sync {
    fn create(&self, params: ConnectionParams) -> Arc<dyn ConnectionHandler>;
}
