// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Accept Queue (spec §4.9): a bounded handoff from the admission core to
//! the embedding caller. Overflow is rejected *before* a slot is consumed
//! (spec §9 open question: "refuse before create", the cheaper of the two
//! choices the source code permitted -- see `DESIGN.md`).

use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};

use crate::{cancel::CancelToken, connection::ConnectionHandler, error::Error, Res};
use std::sync::Arc;

/// Which condition makes a connection eligible to be handed to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcceptMode {
    /// Only a fully handshaked connection is accepted.
    Full,
    /// A connection is accepted as soon as it is early-ready (0-RTT
    /// accepted) or fully handshaked, whichever comes first.
    Early,
}

pub struct AcceptQueue {
    mode: AcceptMode,
    tx: mpsc::Sender<Arc<dyn ConnectionHandler>>,
    rx: AsyncMutex<mpsc::Receiver<Arc<dyn ConnectionHandler>>>,
    closed: StdMutex<Option<Error>>,
    closed_notify: Notify,
}

impl AcceptQueue {
    #[must_use]
    pub fn new(mode: AcceptMode, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            mode,
            tx,
            rx: AsyncMutex::new(rx),
            closed: StdMutex::new(None),
            closed_notify: Notify::new(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> AcceptMode {
        self.mode
    }

    /// Reserve a slot for a connection attempt that has not yet reached
    /// its ready state. Returns `None` (and thus "reject: queue full") if
    /// no slot is available; the caller never creates the connection in
    /// that case.
    #[must_use]
    pub fn try_reserve(&self) -> Option<mpsc::OwnedPermit<Arc<dyn ConnectionHandler>>> {
        self.tx.clone().try_reserve_owned().ok()
    }

    /// Block until a ready connection is available, the cancellation
    /// signal fires, or the queue is closed. A close error latches
    /// permanently.
    pub async fn accept(&self, cancel: &CancelToken) -> Res<Arc<dyn ConnectionHandler>> {
        loop {
            if let Some(err) = self.closed.lock().expect("not poisoned").clone() {
                return Err(err);
            }
            let mut rx = self.rx.lock().await;
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = self.closed_notify.notified() => continue,
                item = rx.recv() => {
                    return match item {
                        Some(handler) => Ok(handler),
                        None => {
                            // Sender side dropped without an explicit close;
                            // treat like a close with a generic reason.
                            Err(Error::Closed("accept queue sender dropped".into()))
                        }
                    };
                }
            }
        }
    }

    /// Latch `err` as the permanent close reason and wake every pending
    /// `accept()`.
    pub fn close(&self, err: Error) {
        *self.closed.lock().expect("not poisoned") = Some(err);
        self.closed_notify.notify_waiters();
    }
}
