// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The embedding-facing façade (spec §6): `listen`/`listen_early`, and the
//! `Listener` handle they return. This is the one place that wires the
//! Ingress Queue, Admission Controller, Connection Registry and Accept
//! Queue together against a real socket.

use std::{net::SocketAddr, sync::Arc};

use tokio::sync::mpsc;

use crate::{
    accept::{AcceptMode, AcceptQueue},
    admission::AdmissionController,
    cancel::CancelToken,
    cid::{ConnectionIdGenerator, RandomConnectionIdGenerator},
    config::ServerConfig,
    connection::{ConnectionFactory, ConnectionHandler},
    error::{Error, Res},
    ingress,
    packet::Version,
    registry::ConnectionRegistry,
    token::TokenAuthenticator,
};

/// Certificate material and the rest of the TLS configuration. Treated as
/// an opaque, externally-supplied blob: TLS itself is out of scope here
/// (spec §1), so this type exists purely to let `listen` enforce "fails
/// when `tls_config` is absent" without this crate depending on a TLS
/// library.
#[derive(Clone, Default)]
pub struct TlsConfig {
    _private: (),
}

impl TlsConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// A running listener: owns the reader/writer/worker tasks for one bound
/// socket until `close()` or drop.
pub struct Listener {
    local_addr: SocketAddr,
    accept_queue: Arc<AcceptQueue>,
    registry: Arc<ConnectionRegistry>,
    ingress: ingress::IngressQueue,
    cancel: CancelToken,
}

impl Listener {
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections currently registered (spec §4.8); an
    /// embedder-facing gauge, not used by the admission core itself.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len() / 2
    }

    /// Datagrams dropped because the Ingress Queue was full (spec §4.7).
    #[must_use]
    pub fn dropped_datagram_count(&self) -> u64 {
        self.ingress.dropped_count()
    }

    /// Block until a ready connection is available, `cancel` fires, or the
    /// listener is closed.
    pub async fn accept(&self, cancel: &CancelToken) -> Res<Arc<dyn ConnectionHandler>> {
        self.accept_queue.accept(cancel).await
    }

    /// Stop admitting new connections, cancel the reader/writer/worker
    /// tasks, signal every registered connection handler to close, and
    /// latch a close error for every pending and future `accept()` (spec
    /// §5, P6: no task belonging to the listener remains runnable).
    pub fn close(&self) {
        self.registry.close_server();
        self.cancel.cancel();
        self.registry.cancel_all();
        self.accept_queue.close(Error::Closed("listener closed".into()));
    }
}

/// Start a listener in "full" accept mode: a connection is only surfaced
/// once its handshake completes.
pub async fn listen(
    socket: quic_udp::Socket,
    tls_config: Option<TlsConfig>,
    server_config: ServerConfig,
    factory: Arc<dyn ConnectionFactory>,
) -> Res<Listener> {
    listen_inner(socket, tls_config, server_config, factory, AcceptMode::Full).await
}

/// Identical to [`listen`] but surfaces a connection as soon as it is
/// early-ready (0-RTT accepted) or fully handshaked, whichever comes
/// first.
pub async fn listen_early(
    socket: quic_udp::Socket,
    tls_config: Option<TlsConfig>,
    server_config: ServerConfig,
    factory: Arc<dyn ConnectionFactory>,
) -> Res<Listener> {
    listen_inner(socket, tls_config, server_config, factory, AcceptMode::Early).await
}

async fn listen_inner(
    socket: quic_udp::Socket,
    tls_config: Option<TlsConfig>,
    server_config: ServerConfig,
    factory: Arc<dyn ConnectionFactory>,
    mode: AcceptMode,
) -> Res<Listener> {
    if tls_config.is_none() {
        return Err(Error::MissingTlsConfig);
    }
    if server_config.versions.iter().any(|v| *v != Version::VERSION_1) {
        return Err(Error::UnsupportedVersion);
    }

    let local_addr = socket
        .local_addr()
        .map_err(|e| Error::Closed(e.to_string()))?;

    let config = Arc::new(server_config);
    let cid_generator: Arc<dyn ConnectionIdGenerator> = Arc::new(RandomConnectionIdGenerator::default());
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::clone(&cid_generator),
        config.stateless_reset_key,
    ));
    let accept_queue = Arc::new(AcceptQueue::new(mode, config.accept_capacity));
    let token_auth = Arc::new(TokenAuthenticator::new());
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();

    let controller = AdmissionController::new(
        local_addr,
        Arc::clone(&config),
        Arc::clone(&registry),
        Arc::clone(&accept_queue),
        token_auth,
        cid_generator,
        factory,
        out_tx,
    );

    let cancel = CancelToken::new();
    let (ingress, worker) = ingress::new(config.ingress_capacity, controller, cancel.clone());
    let ingress_handle = ingress.clone();
    tokio::spawn(worker.run());

    let writer_socket = socket.clone();
    tokio::spawn(async move {
        while let Some(dgram) = out_rx.recv().await {
            let _ = writer_socket.send(&dgram).await;
        }
    });

    let reader_socket = socket;
    let reader_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = reader_cancel.cancelled() => break,
                res = reader_socket.recv() => {
                    match res {
                        Ok(dgram) => ingress.push(dgram),
                        Err(_) => break,
                    }
                }
            }
        }
    });

    Ok(Listener {
        local_addr,
        accept_queue,
        registry,
        ingress: ingress_handle,
        cancel,
    })
}
