// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Admission Controller (spec §4.6): the state machine that decides
//! drop / negotiate version / retry / close-invalid-token / create
//! connection for every arriving datagram. This is the sole mutator of
//! admission-local state (the 0-RTT Buffer); the Worker in `ingress`
//! drives it exclusively.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Instant, SystemTime},
};

use quic_common::{qdebug, qinfo, qtrace, Datagram};
use tokio::sync::mpsc;

use crate::{
    accept::{AcceptMode, AcceptQueue},
    cid::{ConnectionId, ConnectionIdGenerator},
    close::{build_close, CloseError},
    config::ServerConfig,
    connection::{ConnectionFactory, ConnectionHandler, ConnectionParams, ReadyState},
    packet::{classify, PacketType},
    registry::ConnectionRegistry,
    retry::build_retry,
    token::{TokenAuthenticator, VerifyResult},
    version::build_version_negotiation,
    zero_rtt::ZeroRttBuffer,
};

pub struct AdmissionController {
    local: SocketAddr,
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    accept_queue: Arc<AcceptQueue>,
    token_auth: Arc<TokenAuthenticator>,
    cid_generator: Arc<dyn ConnectionIdGenerator>,
    factory: Arc<dyn ConnectionFactory>,
    zero_rtt: ZeroRttBuffer,
    out: mpsc::UnboundedSender<Datagram>,
}

impl AdmissionController {
    #[must_use]
    #[allow(clippy::too_many_arguments, reason = "internal constructor, not public API")]
    pub fn new(
        local: SocketAddr,
        config: Arc<ServerConfig>,
        registry: Arc<ConnectionRegistry>,
        accept_queue: Arc<AcceptQueue>,
        token_auth: Arc<TokenAuthenticator>,
        cid_generator: Arc<dyn ConnectionIdGenerator>,
        factory: Arc<dyn ConnectionFactory>,
        out: mpsc::UnboundedSender<Datagram>,
    ) -> Self {
        Self {
            local,
            zero_rtt: ZeroRttBuffer::new(config.handshake_timeout),
            config,
            registry,
            accept_queue,
            token_auth,
            cid_generator,
            factory,
            out,
        }
    }

    pub fn purge_zero_rtt(&mut self) {
        self.zero_rtt.clear();
    }

    fn send(&self, dgram: Datagram) {
        // The channel only disconnects if the socket-writer task has shut
        // down, which only happens alongside this Worker; dropping the
        // datagram in that race is fine.
        let _ = self.out.send(dgram);
    }

    pub async fn process(&mut self, dgram: Datagram) {
        let now = Instant::now();
        self.zero_rtt.expire(now);

        let supported = self.config.versions.clone();
        let header = match classify(&dgram, &supported) {
            Ok(h) => h,
            Err(reason) => {
                qtrace!("dropping datagram: {:?}", reason);
                self.config.tracer.dropped(&format!("{reason:?}"));
                return;
            }
        };

        // Forward to an already-registered connection first; this
        // handles retransmits and coalesced packets for any packet type.
        if let Some(handler) = self.registry.lookup(&header.dcid) {
            handler.deliver(dgram);
            return;
        }

        // Version checking is not specific to Initial: any long-header
        // packet that might be initiating a connection we don't yet know
        // about gets a VN reply if its version is unrecognized (spec §4.4,
        // §4.6 step 1).
        let is_connection_initiating = matches!(
            header.packet_type,
            PacketType::Initial | PacketType::ZeroRtt | PacketType::Handshake
        );
        if is_connection_initiating && !self.config.versions.contains(&header.version) {
            let vn = build_version_negotiation(
                dgram.source(),
                self.local,
                dgram.tos(),
                header.scid,
                header.dcid,
                &self.config.versions,
            );
            self.send(vn);
            return;
        }

        match header.packet_type {
            PacketType::Initial => {
                let client_dcid = ConnectionId::from(header.dcid);
                let client_scid = ConnectionId::from(header.scid);
                let token = header.token.to_vec();
                let version = header.version;
                let header_len = header.header_len;
                drop(header);
                self.handle_initial(dgram, client_dcid, client_scid, token, version, header_len)
                    .await;
            }
            PacketType::ZeroRtt => {
                let dcid = ConnectionId::from(header.dcid);
                drop(header);
                self.handle_zero_rtt(dgram, dcid, now);
            }
            PacketType::Handshake => {
                qdebug!("handshake packet for unknown connection, dropping");
            }
            PacketType::Retry | PacketType::VersionNegotiation | PacketType::Short => {
                qtrace!("unexpected packet type from client, dropping");
            }
        }
    }

    fn handle_zero_rtt(&mut self, dgram: Datagram, dcid: ConnectionId, now: Instant) {
        if !self.config.zero_rtt_enabled {
            qtrace!("0-RTT disabled, dropping");
            return;
        }
        if !self.zero_rtt.push(dcid.clone(), dgram, now) {
            qdebug!("0-RTT buffer full for {:?}, dropping", dcid);
        }
    }

    async fn handle_initial(
        &mut self,
        dgram: Datagram,
        client_dcid: ConnectionId,
        client_scid: ConnectionId,
        token: Vec<u8>,
        version: crate::packet::Version,
        header_len: usize,
    ) {
        let remote = dgram.source();
        let wall_now = SystemTime::now();

        let mut odcid = None;
        let mut retry_src_cid = None;

        match self.token_auth.verify(&token, remote, wall_now) {
            VerifyResult::ValidRetry {
                odcid: o,
                retry_src_cid: r,
            } => {
                odcid = Some(o);
                retry_src_cid = Some(r);
            }
            VerifyResult::ValidNew => {}
            VerifyResult::Absent => {
                if !(self.config.accept_token)(remote, None) {
                    self.config.tracer.retried(remote);
                    self.send_retry(&dgram, &client_scid, &client_dcid, version, remote);
                    return;
                }
            }
            VerifyResult::Invalid => {
                if !(self.config.accept_token)(remote, None) {
                    self.maybe_send_invalid_token(&dgram, &client_dcid, &client_scid, version, header_len);
                    return;
                }
            }
        }

        let Some(permit) = self.accept_queue.try_reserve() else {
            qinfo!("accept queue full, refusing connection from {}", remote);
            self.config.tracer.refused(remote);
            let scid = self.registry.generate_unique_cid();
            let close = build_close(
                remote,
                self.local,
                dgram.tos(),
                version,
                &client_dcid,
                &client_scid,
                &scid,
                CloseError::ConnectionRefused,
            );
            self.send(close);
            return;
        };

        let server_scid = self.registry.generate_unique_cid();
        let stateless_reset_token = self.registry.stateless_reset_token(&server_scid);
        let params = ConnectionParams {
            remote,
            local: self.local,
            version,
            client_dcid: client_dcid.clone(),
            client_scid,
            server_scid: server_scid.clone(),
            stateless_reset_token,
            odcid,
            retry_src_cid,
            zero_rtt_enabled: self.config.zero_rtt_enabled,
        };

        let handler = self.factory.create(params);

        if !self
            .registry
            .add(client_dcid.clone(), server_scid, Arc::clone(&handler))
        {
            // Another Initial for this DCID won the race; this is a
            // duplicate, not a new connection (spec §7 "admission race").
            qdebug!("duplicate Initial for {:?}, dropping", client_dcid);
            self.config.tracer.dropped("duplicate initial");
            drop(permit);
            return;
        }

        self.config.tracer.admitted(remote);
        for buffered in self.zero_rtt.take(&client_dcid) {
            handler.deliver(buffered);
        }
        handler.deliver(dgram);

        Arc::clone(&handler).spawn_run();
        spawn_teardown_watcher(Arc::clone(&handler), Arc::clone(&self.registry));
        spawn_ready_watcher(handler, permit, self.accept_queue.mode());
    }

    fn send_retry(
        &self,
        dgram: &Datagram,
        client_scid: &ConnectionId,
        client_dcid: &ConnectionId,
        version: crate::packet::Version,
        remote: SocketAddr,
    ) {
        let retry_src_cid = self.cid_generator.generate_cid();
        let token = self
            .token_auth
            .mint_retry(remote, client_dcid, &retry_src_cid, SystemTime::now());
        let retry = build_retry(
            remote,
            self.local,
            dgram.tos(),
            version,
            client_scid,
            client_dcid,
            &retry_src_cid,
            &token,
        );
        self.send(retry);
    }

    /// Only reply if the payload actually opens under Initial keys derived
    /// from the client's DCID; otherwise this datagram is corrupted (or
    /// forged) and replying would make us an amplifier for an attacker who
    /// doesn't control the address (spec §4.5, P1). Header protection isn't
    /// modeled here, so the packet number is assumed to be the 1-byte
    /// encoding our own `build_close`/`build_retry` always use; a real
    /// client's multi-byte packet number will fail to open and fall
    /// through to "drop silently", which is the safe direction to err in.
    fn maybe_send_invalid_token(
        &self,
        dgram: &Datagram,
        client_dcid: &ConnectionId,
        client_scid: &ConnectionId,
        version: crate::packet::Version,
        header_len: usize,
    ) {
        const ASSUMED_PN_LEN: usize = 1;
        if dgram.len() < header_len + ASSUMED_PN_LEN {
            qtrace!("invalid token on truncated Initial, dropping silently");
            self.config.tracer.dropped("invalid token: truncated");
            return;
        }
        let aad_end = header_len + ASSUMED_PN_LEN;
        let key = crate::crypto::InitialKey::derive(client_dcid, crate::crypto::Side::Client);
        let mut payload = dgram[aad_end..].to_vec();
        if key.open(0, &dgram[..aad_end], &mut payload).is_err() {
            qtrace!("invalid token with unopenable payload, dropping silently");
            self.config.tracer.dropped("invalid token: unopenable payload");
            return;
        }
        let scid = self.registry.generate_unique_cid();
        let close = build_close(
            dgram.source(),
            self.local,
            dgram.tos(),
            version,
            client_dcid,
            client_scid,
            &scid,
            CloseError::InvalidToken,
        );
        self.send(close);
    }
}

/// Watch a newly created connection's readiness and, once it reaches the
/// Accept Queue's trigger condition, consume the reserved permit to push
/// it to the caller. If the connection is torn down before that happens,
/// the permit (and thus the reservation) is simply dropped -- the
/// connection is discarded, not surfaced (spec §4.9).
fn spawn_ready_watcher(
    handler: Arc<dyn ConnectionHandler>,
    permit: mpsc::OwnedPermit<Arc<dyn ConnectionHandler>>,
    mode: AcceptMode,
) {
    tokio::spawn(async move {
        let mut rx = handler.ready();
        loop {
            let state = *rx.borrow();
            match state {
                ReadyState::Closed => return,
                ReadyState::Full => {
                    permit.send(handler);
                    return;
                }
                ReadyState::Early if mode == AcceptMode::Early => {
                    permit.send(handler);
                    return;
                }
                ReadyState::Early | ReadyState::Pending => {}
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    });
}

/// Watch a registered connection independently of accept-queue handoff and
/// unregister it from the Connection Registry once it closes (spec §4.8:
/// entries are removed when the handler terminates). Runs for the
/// connection's whole lifetime, not just until it is first accepted.
fn spawn_teardown_watcher(handler: Arc<dyn ConnectionHandler>, registry: Arc<ConnectionRegistry>) {
    tokio::spawn(async move {
        let mut rx = handler.ready();
        loop {
            if *rx.borrow() == ReadyState::Closed {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        registry.remove(&handler);
    });
}
