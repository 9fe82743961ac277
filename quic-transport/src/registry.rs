// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Connection Registry (spec §4.8): maps connection IDs to handlers and
//! allocates fresh server-chosen CIDs with stateless reset tokens.
//! Independently mutex-protected from the Worker; no lock is held across
//! I/O or across a call into a handler.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use rand::RngCore;
use ring::hmac;

use crate::{
    cid::{ConnectionId, ConnectionIdGenerator, StatelessResetToken, STATELESS_RESET_TOKEN_LEN},
    connection::ConnectionHandler,
};

type HandlerId = usize;

fn handler_id(handler: &Arc<dyn ConnectionHandler>) -> HandlerId {
    Arc::as_ptr(handler).cast::<()>() as HandlerId
}

enum ResetKey {
    Hmac(hmac::Key),
    /// No stateless-reset key configured: tokens are random but stored so
    /// that repeated lookups for the same CID are stable.
    Random { seed: [u8; 32] },
}

struct Inner {
    by_cid: HashMap<ConnectionId, Arc<dyn ConnectionHandler>>,
    owned_by: HashMap<HandlerId, Vec<ConnectionId>>,
    /// Recently-removed server-chosen CIDs, kept around briefly so a
    /// stateless-reset token minted just before removal stays unambiguous
    /// (spec §3 global invariants).
    recent: Vec<ConnectionId>,
    closed: bool,
}

pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    reset_key: ResetKey,
    cid_generator: Arc<dyn ConnectionIdGenerator>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(cid_generator: Arc<dyn ConnectionIdGenerator>, stateless_reset_key: Option<[u8; 32]>) -> Self {
        let reset_key = match stateless_reset_key {
            Some(k) => ResetKey::Hmac(hmac::Key::new(hmac::HMAC_SHA256, &k)),
            None => {
                let mut seed = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut seed);
                ResetKey::Random { seed }
            }
        };
        Self {
            inner: Mutex::new(Inner {
                by_cid: HashMap::new(),
                owned_by: HashMap::new(),
                recent: Vec::new(),
                closed: false,
            }),
            reset_key,
            cid_generator,
        }
    }

    /// Generate a server-chosen CID that collides with neither a live
    /// entry nor the recent-past window, retrying on the rare collision
    /// (spec §4.8 "uniqueness ... enforced by retry-on-collision").
    #[must_use]
    pub fn generate_unique_cid(&self) -> ConnectionId {
        loop {
            let cid = self.cid_generator.generate_cid();
            let inner = self.inner.lock().expect("registry mutex poisoned");
            if !inner.by_cid.contains_key(&cid) && !inner.recent.contains(&cid) {
                return cid;
            }
        }
    }

    #[must_use]
    pub fn stateless_reset_token(&self, scid: &ConnectionId) -> StatelessResetToken {
        match &self.reset_key {
            ResetKey::Hmac(key) => {
                let tag = hmac::sign(key, scid);
                let mut out = [0u8; STATELESS_RESET_TOKEN_LEN];
                out.copy_from_slice(&tag.as_ref()[..STATELESS_RESET_TOKEN_LEN]);
                out
            }
            ResetKey::Random { seed } => {
                let key = hmac::Key::new(hmac::HMAC_SHA256, seed);
                let tag = hmac::sign(&key, scid);
                let mut out = [0u8; STATELESS_RESET_TOKEN_LEN];
                out.copy_from_slice(&tag.as_ref()[..STATELESS_RESET_TOKEN_LEN]);
                out
            }
        }
    }

    /// Register `handler` under both `client_dcid` and `server_scid`.
    /// Fails without mutating anything if `client_dcid` is already
    /// present (spec §3: at most one entry per `clientChosenDCID`).
    #[must_use]
    pub fn add(
        &self,
        client_dcid: ConnectionId,
        server_scid: ConnectionId,
        handler: Arc<dyn ConnectionHandler>,
    ) -> bool {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        if inner.closed || inner.by_cid.contains_key(&client_dcid) {
            return false;
        }
        let id = handler_id(&handler);
        inner.by_cid.insert(client_dcid.clone(), Arc::clone(&handler));
        inner.by_cid.insert(server_scid.clone(), handler);
        inner
            .owned_by
            .entry(id)
            .or_default()
            .extend([client_dcid, server_scid]);
        true
    }

    #[must_use]
    pub fn lookup(&self, cid: &[u8]) -> Option<Arc<dyn ConnectionHandler>> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner.by_cid.get(cid).map(Arc::clone)
    }

    /// Remove every CID registered to `handler`.
    pub fn remove(&self, handler: &Arc<dyn ConnectionHandler>) {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let id = handler_id(handler);
        if let Some(cids) = inner.owned_by.remove(&id) {
            for cid in cids {
                inner.by_cid.remove(&cid);
                inner.recent.push(cid);
            }
            // Bound the recent-past window; exact size isn't
            // safety-critical, it only needs to outlast in-flight
            // stateless-reset tokens.
            let len = inner.recent.len();
            if len > 4096 {
                inner.recent.drain(0..len - 4096);
            }
        }
    }

    /// Refuse further `add`s; existing entries continue operating.
    pub fn close_server(&self) {
        self.inner.lock().expect("registry mutex poisoned").closed = true;
    }

    /// Signal every distinct registered handler to close (spec §5: shutdown
    /// "signals every registered handler to close"). Collects the live set
    /// under the lock, then calls `cancel()` after releasing it, since no
    /// lock may be held across a call into a handler.
    pub fn cancel_all(&self) {
        let handlers: Vec<Arc<dyn ConnectionHandler>> = {
            let inner = self.inner.lock().expect("registry mutex poisoned");
            let mut seen = std::collections::HashSet::new();
            inner
                .by_cid
                .values()
                .filter(|h| seen.insert(handler_id(h)))
                .cloned()
                .collect()
        };
        for handler in handlers {
            handler.cancel();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry mutex poisoned").by_cid.len()
    }
}
