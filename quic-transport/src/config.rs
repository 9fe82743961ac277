// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Server configuration (spec §6 options table). Immutable once handed to
//! `listen`/`listen_early`.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use crate::packet::Version;

/// Observes admission-core events without participating in the decision.
/// The only "global" state the core allows; callers that don't need one can
/// use the no-op default.
pub trait Tracer: Send + Sync {
    fn dropped(&self, _reason: &str) {}
    fn retried(&self, _remote: SocketAddr) {}
    fn admitted(&self, _remote: SocketAddr) {}
    fn refused(&self, _remote: SocketAddr) {}
}

/// A [`Tracer`] that discards every event.
pub struct NullTracer;
impl Tracer for NullTracer {}

/// The accept-token predicate's signature (spec §6 table). Called only when
/// the Token Authenticator reports `Absent` or `Invalid` -- by the time it
/// runs, any token that was present has already failed to decode or
/// validate, so it is always invoked with `token = None`; the parameter is
/// kept for fidelity with embeddings that want to log what was presented.
pub type AcceptTokenFn = dyn Fn(SocketAddr, Option<&[u8]>) -> bool + Send + Sync;

/// Declines to admit without a validated token; this is what makes the
/// "no token, policy requires validation" scenario trigger a Retry and the
/// "invalid token" scenario trigger an INVALID_TOKEN close by default.
#[must_use]
pub fn default_accept_token() -> Arc<AcceptTokenFn> {
    Arc::new(|_addr, _token| false)
}

#[derive(Clone)]
pub struct ServerConfig {
    /// Supported versions in preference order; the first entry is offered
    /// first and is what `Version Negotiator` advertises.
    pub versions: Vec<Version>,
    pub accept_token: Arc<AcceptTokenFn>,
    pub handshake_timeout: Duration,
    pub max_idle_timeout: Duration,
    pub keep_alive: bool,
    pub stateless_reset_key: Option<[u8; 32]>,
    pub zero_rtt_enabled: bool,
    pub tracer: Arc<dyn Tracer>,
    /// Capacity of the Ingress Queue (spec §4.7 "Q").
    pub ingress_capacity: usize,
    /// Capacity of the Accept Queue (spec §4.9 "K").
    pub accept_capacity: usize,
}

impl ServerConfig {
    #[must_use]
    pub fn new(versions: Vec<Version>) -> Self {
        Self {
            versions,
            accept_token: default_accept_token(),
            handshake_timeout: Duration::from_secs(10),
            max_idle_timeout: Duration::from_secs(30),
            keep_alive: false,
            stateless_reset_key: None,
            zero_rtt_enabled: false,
            tracer: Arc::new(NullTracer),
            ingress_capacity: 1024,
            accept_capacity: 32,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(vec![Version::VERSION_1])
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("versions", &self.versions)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("max_idle_timeout", &self.max_idle_timeout)
            .field("keep_alive", &self.keep_alive)
            .field("stateless_reset_key_set", &self.stateless_reset_key.is_some())
            .field("zero_rtt_enabled", &self.zero_rtt_enabled)
            .field("ingress_capacity", &self.ingress_capacity)
            .field("accept_capacity", &self.accept_capacity)
            .finish_non_exhaustive()
    }
}
