// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Ingress Queue & Worker (spec §4.7): a bounded FIFO fed by socket-reader
//! producers and drained by a single Worker task that is the sole mutator
//! of admission-local state.

use std::sync::atomic::{AtomicU64, Ordering};

use quic_common::{qdebug, Datagram};
use tokio::sync::mpsc;

use crate::{admission::AdmissionController, cancel::CancelToken};

/// Producer-facing handle. Cheaply cloneable; one per socket reader.
#[derive(Clone)]
pub struct IngressQueue {
    tx: mpsc::Sender<Datagram>,
    dropped: std::sync::Arc<AtomicU64>,
}

impl IngressQueue {
    /// Enqueue `dgram`, dropping it (and counting the drop) if the queue
    /// of capacity `Q` is already full. Never blocks.
    pub fn push(&self, dgram: Datagram) {
        if let Err(mpsc::error::TrySendError::Full(_) | mpsc::error::TrySendError::Closed(_)) =
            self.tx.try_send(dgram)
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            qdebug!("dropped: queue full");
        }
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The sole consumer of the Ingress Queue. Owns the `AdmissionController`,
/// which in turn owns the 0-RTT Buffer and any other admission-local
/// scratch state -- nothing here needs its own lock.
pub struct Worker {
    rx: mpsc::Receiver<Datagram>,
    controller: AdmissionController,
    cancel: CancelToken,
}

/// Build a fresh Ingress Queue plus its Worker, bound to `controller`.
#[must_use]
pub fn new(capacity: usize, controller: AdmissionController, cancel: CancelToken) -> (IngressQueue, Worker) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        IngressQueue {
            tx,
            dropped: std::sync::Arc::new(AtomicU64::new(0)),
        },
        Worker {
            rx,
            controller,
            cancel,
        },
    )
}

impl Worker {
    /// Run until cancelled. On exit, drains whatever is left in the
    /// Ingress Queue (releasing buffers) and purges the 0-RTT Buffer, per
    /// the shutdown contract in spec §5.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                maybe = self.rx.recv() => {
                    match maybe {
                        Some(dgram) => self.controller.process(dgram).await,
                        None => break,
                    }
                }
            }
        }
        self.rx.close();
        while self.rx.try_recv().is_ok() {
            // Drop buffers of whatever was left in flight.
        }
        self.controller.purge_zero_rtt();
    }
}
